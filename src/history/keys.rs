//! Composite key encoding for history records.

use chrono::{DateTime, Utc};

/// Build the 16-byte record key: big-endian chat ID followed by big-endian
/// timestamp nanos. Big-endian is mandatory so lexical byte order equals
/// numeric order within a chat.
pub fn composite_key(chat_id: i64, timestamp: &DateTime<Utc>) -> [u8; 16] {
    let nanos = timestamp.timestamp_nanos_opt().unwrap_or(i64::MAX);

    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&(chat_id as u64).to_be_bytes());
    key[8..].copy_from_slice(&(nanos as u64).to_be_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_lexical_order_equals_time_order() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let keys: Vec<[u8; 16]> = (0..100)
            .map(|i| composite_key(42, &(t0 + Duration::milliseconds(i * 37))))
            .collect();

        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(sorted, keys);
    }

    #[test]
    fn test_chat_id_prefixes_key() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let a = composite_key(1, &t);
        let b = composite_key(2, &t);
        assert_eq!(a[..8], 1u64.to_be_bytes());
        assert_eq!(b[..8], 2u64.to_be_bytes());
        assert_eq!(a[8..], b[8..]);
    }

    #[test]
    fn test_negative_chat_id_round_trips_bit_pattern() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let key = composite_key(-1001, &t);
        let decoded = u64::from_be_bytes(key[..8].try_into().unwrap()) as i64;
        assert_eq!(decoded, -1001);
    }
}
