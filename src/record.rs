//! Per-identity throttling state.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ThrottlerError;

/// Which budget applies to an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
    /// Anonymous caller keyed by its dotted-quad network address.
    Ip,
    /// Authenticated caller keyed by its bearer-token subject.
    Jwt,
}

impl IdentityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityKind::Ip => "ip",
            IdentityKind::Jwt => "jwt",
        }
    }
}

impl fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdentityKind {
    type Err = ThrottlerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ip" => Ok(IdentityKind::Ip),
            "jwt" => Ok(IdentityKind::Jwt),
            other => Err(ThrottlerError::Internal(format!(
                "unknown identity kind '{}'",
                other
            ))),
        }
    }
}

/// Stored throttling state for one identity.
///
/// The engine treats this as an owned value: it reads a copy from the store,
/// mutates the copy and writes it back whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub tries: u32,
    pub kind: IdentityKind,
    pub window_expiry: DateTime<Utc>,
    pub blocked_until: Option<DateTime<Utc>>,
}

impl TrialRecord {
    /// Opens a fresh window of `window` starting at `now`.
    pub fn new(kind: IdentityKind, now: DateTime<Utc>, window: Duration) -> Self {
        Self {
            tries: 0,
            kind,
            window_expiry: offset(now, window),
            blocked_until: None,
        }
    }

    pub fn is_blocked(&self, now: DateTime<Utc>) -> bool {
        self.blocked_until.is_some_and(|until| until > now)
    }

    pub fn window_expired(&self, now: DateTime<Utc>) -> bool {
        self.window_expiry < now
    }

    /// Counts one more attempt. Saturates instead of wrapping.
    pub fn record_attempt(&mut self) -> u32 {
        self.tries = self.tries.saturating_add(1);
        self.tries
    }

    pub fn block(&mut self, now: DateTime<Utc>, duration: Duration) {
        self.blocked_until = Some(offset(now, duration));
    }
}

/// `now + duration`, saturating at the latest representable instant.
pub(crate) fn offset(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    ChronoDuration::from_std(duration)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_new_record_opens_window() {
        let record = TrialRecord::new(IdentityKind::Ip, at(0), Duration::from_secs(10));
        assert_eq!(record.tries, 0);
        assert_eq!(record.window_expiry, at(10));
        assert!(record.blocked_until.is_none());
        assert!(!record.is_blocked(at(0)));
    }

    #[test]
    fn test_block_lasts_until_deadline() {
        let mut record = TrialRecord::new(IdentityKind::Jwt, at(0), Duration::from_secs(10));
        record.block(at(5), Duration::from_secs(300));
        assert!(record.is_blocked(at(5)));
        assert!(record.is_blocked(at(304)));
        assert!(!record.is_blocked(at(305)));
    }

    #[test]
    fn test_window_expiry_is_strict() {
        let record = TrialRecord::new(IdentityKind::Ip, at(0), Duration::from_secs(10));
        assert!(!record.window_expired(at(10)));
        assert!(record.window_expired(at(11)));
    }

    #[test]
    fn test_json_encoding_keeps_null_block() {
        let record = TrialRecord::new(IdentityKind::Ip, at(0), Duration::from_secs(10));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "ip");
        assert_eq!(json["tries"], 0);
        assert!(json["blocked_until"].is_null());

        let decoded: TrialRecord = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_json_encoding_keeps_block_timestamp() {
        let mut record = TrialRecord::new(IdentityKind::Jwt, at(0), Duration::from_millis(1500));
        record.tries = 7;
        record.block(at(1), Duration::from_secs(60));

        let encoded = serde_json::to_string(&record).unwrap();
        let decoded: TrialRecord = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("ip".parse::<IdentityKind>().unwrap(), IdentityKind::Ip);
        assert_eq!("jwt".parse::<IdentityKind>().unwrap(), IdentityKind::Jwt);
        assert!("bearer".parse::<IdentityKind>().is_err());
    }
}
