use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Identity
// =============================================================================

/// Normalized identity of the person on the other end of the channel.
///
/// Transports hand us identities such as `whatsapp:+52 1 555-000-1234`; the
/// normalized form keeps only the digits so the same person always lands on
/// the same session key regardless of formatting.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

/// Channel prefixes stripped before normalization.
const CHANNEL_PREFIXES: &[&str] = &["whatsapp:", "sms:", "tel:"];

impl IdentityKey {
    /// Normalize a raw transport identity.
    ///
    /// Returns `None` when nothing usable is left after stripping the channel
    /// prefix and every non-digit character.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut rest = raw.trim();
        for prefix in CHANNEL_PREFIXES {
            let matches = rest
                .get(..prefix.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(prefix));
            if matches {
                rest = &rest[prefix.len()..];
                break;
            }
        }

        let digits: String = rest.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            None
        } else {
            Some(Self(digits))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Timestamp
// =============================================================================

/// Seconds since the Unix epoch, UTC.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp())
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.0, 0).unwrap_or_default()
    }

    /// Whole seconds elapsed since this timestamp (zero for future values).
    pub fn elapsed_secs(&self) -> u64 {
        let elapsed = Timestamp::now().0 - self.0;
        elapsed.max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_strips_channel_prefix() {
        let key = IdentityKey::parse("whatsapp:+5215550001234").unwrap();
        assert_eq!(key.as_str(), "5215550001234");
    }

    #[test]
    fn test_identity_strips_formatting() {
        let key = IdentityKey::parse(" +52 (1) 555-000-1234 ").unwrap();
        assert_eq!(key.as_str(), "5215550001234");
    }

    #[test]
    fn test_identity_prefix_is_case_insensitive() {
        let a = IdentityKey::parse("WhatsApp:+15550001111").unwrap();
        let b = IdentityKey::parse("15550001111").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_identity_without_digits_is_rejected() {
        assert!(IdentityKey::parse("whatsapp:").is_none());
        assert!(IdentityKey::parse("   ").is_none());
        assert!(IdentityKey::parse("anonymous").is_none());
    }

    #[test]
    fn test_identity_display_matches_key() {
        let key = IdentityKey::parse("sms:555-0100").unwrap();
        assert_eq!(key.to_string(), "5550100");
    }

    #[test]
    fn test_timestamp_roundtrip_datetime() {
        let ts = Timestamp(1_700_000_000);
        assert_eq!(Timestamp::from_datetime(ts.to_datetime()), ts);
    }

    #[test]
    fn test_timestamp_elapsed_future_is_zero() {
        let future = Timestamp(Timestamp::now().0 + 600);
        assert_eq!(future.elapsed_secs(), 0);
    }

    #[test]
    fn test_timestamp_serializes_as_integer() {
        let json = serde_json::to_string(&Timestamp(42)).unwrap();
        assert_eq!(json, "42");
    }
}
