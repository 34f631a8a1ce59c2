//! Relay constants.

/// Default monthly gas allowance granted to a profile's quota on first touch.
pub const DEFAULT_MONTHLY_ALLOWANCE: u64 = 650_000;

/// Maximum clock skew accepted for signed timestamp attestations.
///
/// A signed timestamp further than this from server time is rejected as stale,
/// regardless of signature validity.
pub const TIMESTAMP_FRESHNESS_MS: i64 = 5_000;

/// Number of low bits of a call nonce that belong to the per-channel counter.
///
/// The remaining high bits encode the channel id, so extraction is
/// `call_nonce >> CHANNEL_ID_SHIFT`.
pub const CHANNEL_ID_SHIFT: usize = 128;

/// Unit reported by the quota status endpoint.
pub const QUOTA_UNIT: &str = "gas";
