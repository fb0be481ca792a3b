//! Wall-clock and base-62 helpers shared by the ID generator and the
//! record model.

use std::time::{SystemTime, UNIX_EPOCH};

const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Fractional seconds since the Unix epoch. Not monotonic across threads
/// — only used for the `timestamp` field on `Record`.
pub fn wall_clock_secs() -> f64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    now.as_secs() as f64 + f64::from(now.subsec_nanos()) / 1_000_000_000.0
}

/// Encode `value` as unpadded base-62, most significant digit first.
/// `0` encodes as `"0"`, never an empty string.
pub fn base62_encode(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::with_capacity(11);
    while value > 0 {
        let digit = (value % 62) as usize;
        digits.push(ALPHABET[digit]);
        value /= 62;
    }
    digits.reverse();
    String::from_utf8(digits).expect("base62 alphabet is ASCII")
}
