//! Wall-clock timestamps
//!
//! Broker scores and record timestamps are epoch seconds as `f64`, the
//! resolution the sorted-set protocol is defined in.

use chrono::Utc;

/// Current wall-clock time as fractional epoch seconds.
pub fn now_ts() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ts_is_recent() {
        let ts = now_ts();
        // Sometime after 2020 and before 2100.
        assert!(ts > 1_577_836_800.0);
        assert!(ts < 4_102_444_800.0);
    }

    #[test]
    fn test_now_ts_monotonic_enough() {
        let a = now_ts();
        let b = now_ts();
        assert!(b >= a);
    }
}
