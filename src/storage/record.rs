//! On-Disk Record Layout and TTL Resolution
//!
//! Every value stored in the cache file is wrapped in a small record that
//! carries its absolute expiration time.
//!
//! ## Layout
//!
//! ```text
//! ┌──────────────────────────┬──────────────────────────────┐
//! │ expires_at (8 bytes, BE) │ value (remaining bytes)      │
//! └──────────────────────────┴──────────────────────────────┘
//! ```
//!
//! `expires_at` is an absolute Unix timestamp in whole seconds. The sentinel
//! `0` means the record never expires.
//!
//! Both the stored stamp and the clock it is checked against are whole
//! seconds, so a record lives at least its TTL and less than one second
//! longer.
//!
//! ## Expiry Is Lazy
//!
//! Nothing here deletes anything. A record past its expiration stays in the
//! file until it is overwritten or deleted; readers simply report it as
//! expired.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Size of the `expires_at` prefix in bytes.
pub const EXPIRES_AT_SIZE: usize = 8;

/// Sentinel for "never expires".
pub const NEVER_EXPIRES: u64 = 0;

/// Returns the current wall-clock time as a duration since the Unix epoch.
///
/// A clock set before 1970 is treated as the epoch itself.
pub fn now_since_epoch() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
}

/// Resolves the absolute expiration for a write.
///
/// - a non-zero `ttl` wins
/// - otherwise a non-zero `default_ttl` applies
/// - otherwise the record never expires
///
/// The result is truncated to whole seconds.
pub fn resolve_expires_at(now: Duration, ttl: Duration, default_ttl: Duration) -> u64 {
    let effective = if !ttl.is_zero() { ttl } else { default_ttl };

    if effective.is_zero() {
        return NEVER_EXPIRES;
    }

    now.saturating_add(effective).as_secs().max(1)
}

/// Encodes a record: `expires_at` followed by the raw value bytes.
pub fn encode(expires_at: u64, value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(EXPIRES_AT_SIZE + value.len());
    buf.extend_from_slice(&expires_at.to_be_bytes());
    buf.extend_from_slice(value);
    buf
}

/// A decoded view over a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record<'a> {
    /// Absolute expiration in epoch seconds, or [`NEVER_EXPIRES`].
    pub expires_at: u64,
    /// The value bytes, without the prefix.
    pub value: &'a [u8],
}

impl<'a> Record<'a> {
    /// Splits raw record bytes. Returns `None` if the prefix is truncated.
    pub fn decode(raw: &'a [u8]) -> Option<Self> {
        if raw.len() < EXPIRES_AT_SIZE {
            return None;
        }

        let (prefix, value) = raw.split_at(EXPIRES_AT_SIZE);
        let mut stamp = [0u8; EXPIRES_AT_SIZE];
        stamp.copy_from_slice(prefix);

        Some(Self {
            expires_at: u64::from_be_bytes(stamp),
            value,
        })
    }

    /// Checks whether the whole second containing `now` is past the
    /// record's expiration.
    #[inline]
    pub fn is_expired_at(&self, now: Duration) -> bool {
        self.expires_at != NEVER_EXPIRES && now.as_secs() > self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_ttl_wins() {
        let now = Duration::from_secs(1_000);
        let expires = resolve_expires_at(now, Duration::from_secs(5), Duration::from_secs(60));
        assert_eq!(expires, 1_005);
    }

    #[test]
    fn test_default_ttl_applies() {
        let now = Duration::from_secs(1_000);
        let expires = resolve_expires_at(now, Duration::ZERO, Duration::from_secs(60));
        assert_eq!(expires, 1_060);
    }

    #[test]
    fn test_no_ttl_never_expires() {
        let now = Duration::from_secs(1_000);
        assert_eq!(
            resolve_expires_at(now, Duration::ZERO, Duration::ZERO),
            NEVER_EXPIRES
        );
    }

    #[test]
    fn test_expires_at_truncates_to_seconds() {
        let now = Duration::from_millis(1_000_900);
        let expires = resolve_expires_at(now, Duration::from_secs(1), Duration::ZERO);
        assert_eq!(expires, 1_001);
    }

    #[test]
    fn test_write_late_in_second_is_not_expired_early() {
        let written = Duration::from_millis(1_000_900);
        let record = Record {
            expires_at: resolve_expires_at(written, Duration::from_secs(1), Duration::ZERO),
            value: b"",
        };

        // 150ms later the clock has ticked into the next second
        assert!(!record.is_expired_at(written + Duration::from_millis(150)));
        assert!(!record.is_expired_at(written + Duration::from_millis(1_050)));
        assert!(record.is_expired_at(written + Duration::from_millis(1_150)));
    }

    #[test]
    fn test_layout_is_big_endian_prefix() {
        let raw = encode(0x0102_0304_0506_0708, b"hello");
        assert_eq!(&raw[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&raw[8..], b"hello");

        let record = Record::decode(&raw).unwrap();
        assert_eq!(record.expires_at, 0x0102_0304_0506_0708);
        assert_eq!(record.value, b"hello");
    }

    #[test]
    fn test_decode_truncated() {
        assert!(Record::decode(&[0, 0, 0]).is_none());
        assert!(Record::decode(&[0u8; 8]).is_some());
    }

    #[test]
    fn test_expiry_is_strict_in_whole_seconds() {
        let record = Record {
            expires_at: 100,
            value: b"",
        };
        assert!(!record.is_expired_at(Duration::from_secs(99)));
        assert!(!record.is_expired_at(Duration::from_secs(100)));
        assert!(!record.is_expired_at(Duration::from_millis(100_999)));
        assert!(record.is_expired_at(Duration::from_secs(101)));

        let forever = Record {
            expires_at: NEVER_EXPIRES,
            value: b"",
        };
        assert!(!forever.is_expired_at(Duration::from_secs(u32::MAX as u64)));
    }
}
