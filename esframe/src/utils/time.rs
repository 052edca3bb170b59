//! Time-base conversions shared by the readers and the seeker.

pub const MICROS_PER_SECOND: i64 = 1_000_000;

/// MPEG system clock rate for PES timestamps.
pub const TS_TIMEBASE: i64 = 90_000;

/// Mask for the 33-bit PES timestamp field.
pub const TS_TIMESTAMP_MASK: u64 = (1 << 33) - 1;

/// Duration of `samples` at `sample_rate`, truncated to whole microseconds.
#[inline]
pub fn samples_to_us(samples: u32, sample_rate: u32) -> i64 {
    if sample_rate == 0 {
        return 0;
    }

    MICROS_PER_SECOND * samples as i64 / sample_rate as i64
}

#[inline]
pub fn pes_to_us(timestamp: u64) -> i64 {
    (timestamp & TS_TIMESTAMP_MASK) as i64 * MICROS_PER_SECOND / TS_TIMEBASE
}

#[inline]
pub fn us_to_pes(time_us: i64) -> u64 {
    (time_us * TS_TIMEBASE / MICROS_PER_SECOND) as u64 & TS_TIMESTAMP_MASK
}

#[test]
fn conversions() {
    assert_eq!(samples_to_us(1024, 48_000), 21_333);
    assert_eq!(samples_to_us(1024, 0), 0);
    assert_eq!(pes_to_us(90_000), 1_000_000);
    assert_eq!(pes_to_us((1 << 33) + 9_000), 100_000);
    assert_eq!(us_to_pes(100_000), 9_000);
}
