use crate::error::ValidationError;

/// 2021-01-01T00:00:00Z in milliseconds. No NFT data exists before it.
pub const MINIMUM_TIMESTAMP_MS: i64 = 1_609_459_200_000;

/// Parses an inbound millisecond timestamp. Fractions, signs and junk are rejected.
pub fn parse_timestamp(raw: &str) -> Result<i64, ValidationError> {
    let trimmed = raw.trim();
    let invalid = || ValidationError::InvalidFormat { provided: raw.to_string() };
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let ts = trimmed.parse::<i64>().map_err(|_| invalid())?;
    if ts <= 0 {
        return Err(invalid());
    }
    Ok(ts)
}

pub fn validate_timestamp(timestamp: i64, now_ms: i64) -> Result<(), ValidationError> {
    if timestamp <= 0 {
        return Err(ValidationError::InvalidFormat { provided: timestamp.to_string() });
    }
    if timestamp > now_ms {
        return Err(ValidationError::FutureTimestamp { provided: timestamp, current: now_ms });
    }
    if timestamp < MINIMUM_TIMESTAMP_MS {
        return Err(ValidationError::TooOld { provided: timestamp, minimum: MINIMUM_TIMESTAMP_MS });
    }
    Ok(())
}
