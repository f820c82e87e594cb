use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::{Validate, ValidationError};

use crate::error::{ThrottlerError, ThrottlerResult};
use crate::record::IdentityKind;

/// Budgets and windows applied by the throttle engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ThrottleConfig {
    /// Window for anonymous callers keyed by address
    #[serde(with = "humantime_serde")]
    #[validate(custom(function = "positive_duration"))]
    pub ip_window: Duration,

    /// Window for callers presenting a bearer token
    #[serde(with = "humantime_serde")]
    #[validate(custom(function = "positive_duration"))]
    pub jwt_window: Duration,

    #[validate(range(min = 1, message = "ip_try_max must be at least 1"))]
    pub ip_try_max: u32,

    #[validate(range(min = 1, message = "jwt_try_max must be at least 1"))]
    pub jwt_try_max: u32,

    /// How long an identity stays blocked once it exhausts its budget
    #[serde(with = "humantime_serde")]
    #[validate(custom(function = "positive_duration"))]
    pub block_duration: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            ip_window: Duration::from_secs(10),
            jwt_window: Duration::from_secs(10),
            ip_try_max: 5,
            jwt_try_max: 10,
            block_duration: Duration::from_secs(5 * 60),
        }
    }
}

impl ThrottleConfig {
    pub fn window(&self, kind: IdentityKind) -> Duration {
        match kind {
            IdentityKind::Ip => self.ip_window,
            IdentityKind::Jwt => self.jwt_window,
        }
    }

    pub fn try_max(&self, kind: IdentityKind) -> u32 {
        match kind {
            IdentityKind::Ip => self.ip_try_max,
            IdentityKind::Jwt => self.jwt_try_max,
        }
    }

    pub fn check(&self) -> ThrottlerResult<()> {
        self.validate().map_err(ThrottlerError::from)
    }
}

fn positive_duration(value: &Duration) -> Result<(), ValidationError> {
    if value.is_zero() {
        let mut err = ValidationError::new("positive_duration");
        err.message = Some("duration must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(ThrottleConfig::default().check().is_ok());
    }

    #[test]
    fn test_zero_try_max_rejected() {
        let config = ThrottleConfig {
            jwt_try_max: 0,
            ..ThrottleConfig::default()
        };
        assert!(matches!(config.check(), Err(ThrottlerError::ValidationError(_))));
    }

    #[test]
    fn test_zero_durations_rejected() {
        let config = ThrottleConfig {
            block_duration: Duration::ZERO,
            ..ThrottleConfig::default()
        };
        assert!(config.check().is_err());

        let config = ThrottleConfig {
            ip_window: Duration::ZERO,
            ..ThrottleConfig::default()
        };
        assert!(config.check().is_err());
    }

    #[test]
    fn test_budget_lookup_by_kind() {
        let config = ThrottleConfig::default();
        assert_eq!(config.try_max(IdentityKind::Ip), 5);
        assert_eq!(config.try_max(IdentityKind::Jwt), 10);
        assert_eq!(config.window(IdentityKind::Ip), Duration::from_secs(10));
    }

    #[test]
    fn test_humantime_deserialization() {
        let config: ThrottleConfig = serde_json::from_str(
            r#"{"ip_window":"10s","jwt_window":"1m","ip_try_max":5,"jwt_try_max":10,"block_duration":"5m"}"#,
        )
        .unwrap();
        assert_eq!(config.jwt_window, Duration::from_secs(60));
        assert_eq!(config.block_duration, Duration::from_secs(300));
    }
}
