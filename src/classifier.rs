//! Decides which budget a previously unseen identity falls under.

use regex::Regex;
use std::sync::LazyLock;

use crate::record::IdentityKind;

// Syntactic only: octet ranges are not checked and IPv6 is not recognised.
static DOTTED_QUAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\d{1,3}\.){3}\d{1,3}$").expect("valid dotted-quad pattern"));

/// Dotted-quad strings are network addresses, everything else is a token subject.
pub fn classify(identity: &str) -> IdentityKind {
    if DOTTED_QUAD.is_match(identity) {
        IdentityKind::Ip
    } else {
        IdentityKind::Jwt
    }
}
