use std::io::{self, Read, Seek, SeekFrom};

use log::{debug, trace};

use crate::structs::ts::{
    TS_PACKET_SIZE, TS_SYNC_BYTE, find_packet_start, is_start_of_packet, read_pcr_from_packet, read_pes_timestamp,
};
use crate::utils::time::{TS_TIMESTAMP_MASK, pes_to_us};

pub const DEFAULT_TIMESTAMP_SEARCH_BYTES: usize = 600 * TS_PACKET_SIZE;
pub const DEFAULT_SEEK_TOLERANCE_US: i64 = 100_000;
pub const DEFAULT_MIN_SEARCH_RANGE: u64 = 5 * TS_PACKET_SIZE as u64;

/// Random-access byte source for the seeker.
pub trait SeekSource {
    fn length(&mut self) -> io::Result<u64>;

    /// Reads up to `max_len` bytes at `offset`. Fewer bytes are returned only
    /// at the end of the source.
    fn read_at(&mut self, offset: u64, max_len: usize) -> io::Result<Vec<u8>>;
}

impl SeekSource for &[u8] {
    fn length(&mut self) -> io::Result<u64> {
        Ok(self.len() as u64)
    }

    fn read_at(&mut self, offset: u64, max_len: usize) -> io::Result<Vec<u8>> {
        let start = usize::try_from(offset)
            .unwrap_or(usize::MAX)
            .min(self.len());
        let end = start.saturating_add(max_len).min(self.len());

        Ok(self[start..end].to_vec())
    }
}

/// [`SeekSource`] over any seekable reader, such as a file.
pub struct ReaderSource<R> {
    inner: R,
    length: Option<u64>,
}

impl<R: Read + Seek> ReaderSource<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, length: None }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Seek> SeekSource for ReaderSource<R> {
    fn length(&mut self) -> io::Result<u64> {
        if let Some(length) = self.length {
            return Ok(length);
        }

        let length = self.inner.seek(SeekFrom::End(0))?;
        self.length = Some(length);
        Ok(length)
    }

    fn read_at(&mut self, offset: u64, max_len: usize) -> io::Result<Vec<u8>> {
        self.inner.seek(SeekFrom::Start(offset))?;

        let mut buf = Vec::with_capacity(max_len);
        self.inner.by_ref().take(max_len as u64).read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// Classification of one sampling window against the target time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampSearchResult {
    /// The first timestamp in the window is already past the target.
    Overestimated { timestamp_us: i64, position: u64 },
    /// Every timestamp in the window is before the target; the search
    /// continues after the last packet that carried one.
    Underestimated { timestamp_us: i64, position: u64 },
    TargetFound { position: u64 },
    NoTimestampInRange,
}

/// Per-format strategy that samples timestamps near a byte position.
pub trait TimestampSeeker {
    fn search_for_timestamp(
        &mut self,
        source: &mut dyn SeekSource,
        position: u64,
        target_us: i64,
    ) -> io::Result<TimestampSearchResult>;

    /// Typical distance in bytes between two timestamped units.
    fn approx_bytes_per_frame(&self) -> u64;

    fn min_search_range(&self) -> u64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsSeekConfig {
    pub timestamp_search_bytes: usize,
    pub tolerance_us: i64,
    pub min_search_range: u64,
}

impl Default for TsSeekConfig {
    fn default() -> Self {
        Self {
            timestamp_search_bytes: DEFAULT_TIMESTAMP_SEARCH_BYTES,
            tolerance_us: DEFAULT_SEEK_TOLERANCE_US,
            min_search_range: DEFAULT_MIN_SEARCH_RANGE,
        }
    }
}

impl TsSeekConfig {
    pub fn with_timestamp_search_bytes(mut self, bytes: usize) -> Self {
        self.timestamp_search_bytes = bytes.max(TS_PACKET_SIZE);
        self
    }

    pub fn with_tolerance_us(mut self, tolerance_us: i64) -> Self {
        self.tolerance_us = tolerance_us;
        self
    }

    pub fn with_min_search_range(mut self, bytes: u64) -> Self {
        self.min_search_range = bytes;
        self
    }
}

/// Microseconds from `base` to `timestamp`, across a 33-bit wrap.
fn relative_us(timestamp: u64, base: u64) -> i64 {
    pes_to_us(timestamp.wrapping_sub(base) & TS_TIMESTAMP_MASK)
}

/// Samples PES timestamps of one PID in a transport stream.
#[derive(Debug, Clone)]
pub struct TsTimestampSeeker {
    pid: u16,
    base_timestamp: u64,
    config: TsSeekConfig,
}

impl TsTimestampSeeker {
    pub fn new(pid: u16, config: TsSeekConfig) -> Self {
        Self {
            pid,
            base_timestamp: 0,
            config,
        }
    }

    /// Raw 90 kHz timestamp that maps to time zero, usually the first one
    /// in the stream.
    pub fn with_base_timestamp(mut self, base_timestamp: u64) -> Self {
        self.base_timestamp = base_timestamp;
        self
    }

    fn search_window(&self, window: &[u8], window_start: u64, target_us: i64) -> TimestampSearchResult {
        let limit = window.len();
        let mut last_time_in_range = None;
        let mut start_of_last_packet_in_range = 0;

        let mut start_of_packet = find_packet_start(window, 0, limit);
        let mut end_of_last_packet = start_of_packet;

        while start_of_packet + TS_PACKET_SIZE <= limit {
            if window[start_of_packet] != TS_SYNC_BYTE {
                start_of_packet = find_packet_start(window, start_of_packet + 1, limit);
                continue;
            }

            let end_of_packet = start_of_packet + TS_PACKET_SIZE;
            let packet = &window[start_of_packet..end_of_packet];

            if let Some(timestamp) = read_pes_timestamp(packet, self.pid) {
                let time_us = relative_us(timestamp, self.base_timestamp);
                trace!("PES timestamp {time_us} us at {}", window_start + start_of_packet as u64);

                if time_us > target_us {
                    return match last_time_in_range {
                        None => TimestampSearchResult::Overestimated {
                            timestamp_us: time_us,
                            position: window_start,
                        },
                        Some(_) => TimestampSearchResult::TargetFound {
                            position: window_start + start_of_last_packet_in_range as u64,
                        },
                    };
                }

                if time_us + self.config.tolerance_us > target_us {
                    return TimestampSearchResult::TargetFound {
                        position: window_start + start_of_packet as u64,
                    };
                }

                last_time_in_range = Some(time_us);
                start_of_last_packet_in_range = start_of_packet;
            }

            start_of_packet = end_of_packet;
            end_of_last_packet = end_of_packet;
        }

        match last_time_in_range {
            Some(timestamp_us) => TimestampSearchResult::Underestimated {
                timestamp_us,
                position: window_start + end_of_last_packet as u64,
            },
            None => TimestampSearchResult::NoTimestampInRange,
        }
    }
}

impl TimestampSeeker for TsTimestampSeeker {
    fn search_for_timestamp(
        &mut self,
        source: &mut dyn SeekSource,
        position: u64,
        target_us: i64,
    ) -> io::Result<TimestampSearchResult> {
        let length = source.length()?;
        let bytes_to_search = (self.config.timestamp_search_bytes as u64).min(length.saturating_sub(position));
        let window = source.read_at(position, bytes_to_search as usize)?;

        Ok(self.search_window(&window, position, target_us))
    }

    fn approx_bytes_per_frame(&self) -> u64 {
        TS_PACKET_SIZE as u64
    }

    fn min_search_range(&self) -> u64 {
        self.config.min_search_range
    }
}

/// Bounds of the current search. Times are in microseconds.
#[derive(Debug, Clone, Copy)]
struct SearchInterval {
    target_time: i64,
    floor_time: i64,
    ceiling_time: i64,
    floor_position: u64,
    ceiling_position: u64,
    approx_bytes_per_frame: u64,
    next_position: u64,
}

impl SearchInterval {
    fn update_floor(&mut self, time: i64, position: u64) {
        self.floor_time = time;
        self.floor_position = position;
        self.update_next_position();
    }

    fn update_ceiling(&mut self, time: i64, position: u64) {
        self.ceiling_time = time;
        self.ceiling_position = position;
        self.update_next_position();
    }

    /// Linear interpolation between floor and ceiling, backed off by one frame
    /// and a 5% confidence margin so that the window tends to start early.
    fn update_next_position(&mut self) {
        if self.floor_position + 1 >= self.ceiling_position || self.floor_time + 1 >= self.ceiling_time {
            self.next_position = self.floor_position;
            return;
        }

        let time_to_skip = (self.target_time - self.floor_time) as f64;
        let bytes_per_time = (self.ceiling_position - self.floor_position) as f64
            / (self.ceiling_time - self.floor_time) as f64;
        let bytes_to_skip = (time_to_skip * bytes_per_time) as i64;
        let confidence = bytes_to_skip / 20;

        let estimate = self.floor_position as i64 + bytes_to_skip
            - self.approx_bytes_per_frame as i64
            - confidence;
        self.next_position = estimate.clamp(
            self.floor_position as i64,
            self.ceiling_position as i64 - 1,
        ) as u64;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekOutcome {
    pub position: u64,
    /// A timestamp within tolerance of the target was found at `position`.
    /// Otherwise the interval collapsed and `position` is its floor.
    pub exact: bool,
}

/// Interpolation search for the byte position of a target time, driven by a
/// [`TimestampSeeker`].
pub struct BinarySearchSeeker<T> {
    timestamp_seeker: T,
    duration_us: i64,
    floor_position: u64,
}

impl<T: TimestampSeeker> BinarySearchSeeker<T> {
    pub fn new(timestamp_seeker: T, duration_us: i64) -> Self {
        Self {
            timestamp_seeker,
            duration_us,
            floor_position: 0,
        }
    }

    /// First byte that may hold media, e.g. after a file header.
    pub fn with_floor_position(mut self, position: u64) -> Self {
        self.floor_position = position;
        self
    }

    pub fn duration_us(&self) -> i64 {
        self.duration_us
    }

    pub fn timestamp_seeker(&self) -> &T {
        &self.timestamp_seeker
    }

    pub fn seek(&mut self, source: &mut dyn SeekSource, time_us: i64) -> io::Result<SeekOutcome> {
        let target_time = time_us.clamp(0, self.duration_us.max(0));
        let min_search_range = self.timestamp_seeker.min_search_range();

        let mut interval = SearchInterval {
            target_time,
            floor_time: 0,
            ceiling_time: self.duration_us.max(0) + 1,
            floor_position: self.floor_position,
            ceiling_position: source.length()?,
            approx_bytes_per_frame: self.timestamp_seeker.approx_bytes_per_frame(),
            next_position: self.floor_position,
        };
        interval.update_next_position();

        loop {
            if interval.ceiling_position.saturating_sub(interval.floor_position) <= min_search_range {
                debug!("Search range collapsed at {}", interval.floor_position);
                return Ok(SeekOutcome {
                    position: interval.floor_position,
                    exact: false,
                });
            }

            let position = interval.next_position;
            let result = self
                .timestamp_seeker
                .search_for_timestamp(source, position, target_time)?;
            trace!("Search at {position}: {result:?}");

            match result {
                TimestampSearchResult::Overestimated {
                    timestamp_us,
                    position,
                } => interval.update_ceiling(timestamp_us, position),
                TimestampSearchResult::Underestimated {
                    timestamp_us,
                    position,
                } => interval.update_floor(timestamp_us, position),
                TimestampSearchResult::TargetFound { position } => {
                    debug!("Seek target {time_us} us found at {position}");
                    return Ok(SeekOutcome {
                        position,
                        exact: true,
                    });
                }
                TimestampSearchResult::NoTimestampInRange => {
                    return Ok(SeekOutcome {
                        position,
                        exact: false,
                    });
                }
            }
        }
    }
}

/// Clock a [`TsDuration`] was measured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampClock {
    /// PES DTS, or PTS when no DTS is present.
    Pes,
    /// Program clock reference base from adaptation fields.
    Pcr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsDuration {
    /// First timestamp of the stream, in 90 kHz ticks of `clock`.
    pub first_timestamp: u64,
    pub duration_us: i64,
    pub clock: TimestampClock,
}

/// Reads the duration of one PID from timestamps at both ends of a stream.
#[derive(Debug, Clone, Copy)]
pub struct TsDurationReader {
    timestamp_search_bytes: usize,
}

impl Default for TsDurationReader {
    fn default() -> Self {
        Self::new(DEFAULT_TIMESTAMP_SEARCH_BYTES)
    }
}

impl TsDurationReader {
    pub fn new(timestamp_search_bytes: usize) -> Self {
        Self {
            timestamp_search_bytes: timestamp_search_bytes.max(TS_PACKET_SIZE),
        }
    }

    /// First value `read` extracts from a packet at or after `offset`, with
    /// the end of that packet. Packets are visited on confirmed boundaries.
    fn read_first<F>(&self, source: &mut dyn SeekSource, offset: u64, read: F) -> io::Result<Option<(u64, u64)>>
    where
        F: Fn(&[u8]) -> Option<u64>,
    {
        let window = source.read_at(offset, self.timestamp_search_bytes)?;

        let mut position = find_packet_start(&window, 0, window.len());
        while position + TS_PACKET_SIZE <= window.len() {
            if window[position] != TS_SYNC_BYTE {
                position = find_packet_start(&window, position, window.len());
                continue;
            }
            if let Some(value) = read(&window[position..]) {
                return Ok(Some((value, offset + (position + TS_PACKET_SIZE) as u64)));
            }
            position += TS_PACKET_SIZE;
        }

        Ok(None)
    }

    /// Last value `read` extracts from a whole packet near the end of the stream.
    fn read_last<F>(&self, source: &mut dyn SeekSource, read: F) -> io::Result<Option<u64>>
    where
        F: Fn(&[u8]) -> Option<u64>,
    {
        let length = source.length()?;
        let bytes_to_search = (self.timestamp_search_bytes as u64).min(length);
        let window = source.read_at(length - bytes_to_search, bytes_to_search as usize)?;

        let Some(mut position) = window.len().checked_sub(TS_PACKET_SIZE) else {
            return Ok(None);
        };
        loop {
            if is_start_of_packet(&window, 0, window.len(), position)
                && let Some(value) = read(&window[position..])
            {
                return Ok(Some(value));
            }
            if position == 0 {
                return Ok(None);
            }
            position -= 1;
        }
    }

    /// Duration from the first to the last timestamp plus one frame, the
    /// frame length being the distance between the first two timestamps.
    /// Streams of `pid` without PES timestamps fall back to its PCR.
    pub fn read_duration(&self, source: &mut dyn SeekSource, pid: u16) -> io::Result<Option<TsDuration>> {
        match self.read_pes_duration(source, pid)? {
            Some(duration) => Ok(Some(duration)),
            None => self.read_pcr_duration(source, pid),
        }
    }

    fn read_pes_duration(&self, source: &mut dyn SeekSource, pid: u16) -> io::Result<Option<TsDuration>> {
        let pes = |packet: &[u8]| read_pes_timestamp(packet, pid);

        let Some(last) = self.read_last(source, pes)? else {
            debug!("No PES timestamp for PID {pid} at the end of the stream");
            return Ok(None);
        };
        let Some((first, first_end)) = self.read_first(source, 0, pes)? else {
            return Ok(None);
        };
        let Some((second, _)) = self.read_first(source, first_end, pes)? else {
            return Ok(None);
        };

        let frame_duration = relative_us(second, first);
        let duration_us = relative_us(last, first) + frame_duration;
        debug!("PID {pid}: first timestamp {first}, duration {duration_us} us");

        Ok(Some(TsDuration {
            first_timestamp: first,
            duration_us,
            clock: TimestampClock::Pes,
        }))
    }

    /// Duration between the first and the last PCR carried on `pcr_pid`.
    pub fn read_pcr_duration(&self, source: &mut dyn SeekSource, pcr_pid: u16) -> io::Result<Option<TsDuration>> {
        let pcr = |packet: &[u8]| read_pcr_from_packet(packet, pcr_pid);

        let Some(last) = self.read_last(source, pcr)? else {
            debug!("No PCR for PID {pcr_pid} at the end of the stream");
            return Ok(None);
        };
        let Some((first, _)) = self.read_first(source, 0, pcr)? else {
            return Ok(None);
        };

        let duration_us = relative_us(last, first);
        debug!("PCR PID {pcr_pid}: first PCR {first}, duration {duration_us} us");

        Ok(Some(TsDuration {
            first_timestamp: first,
            duration_us,
            clock: TimestampClock::Pcr,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::testutil::{ts_pcr_stream, ts_pes_packet, ts_stream};

    const PID: u16 = 0x100;

    /// Timestamp of the first PES packet at or after `position`.
    fn timestamp_at(data: &[u8], position: u64) -> Option<i64> {
        let start = find_packet_start(data, position as usize, data.len());
        (start..data.len().saturating_sub(TS_PACKET_SIZE - 1))
            .step_by(TS_PACKET_SIZE)
            .find_map(|p| read_pes_timestamp(&data[p..], PID))
            .map(pes_to_us)
    }

    #[test]
    fn duration() -> anyhow::Result<()> {
        // 101 PES packets at 100 ms spacing, starting at 1 s.
        let data = ts_stream(PID, 90_000, 9_000, 101);

        let duration = TsDurationReader::default()
            .read_duration(&mut data.as_slice(), PID)?
            .unwrap();
        assert_eq!(duration.first_timestamp, 90_000);
        assert_eq!(duration.duration_us, 10_100_000);
        assert_eq!(duration.clock, TimestampClock::Pes);

        assert_eq!(TsDurationReader::default().read_duration(&mut data.as_slice(), 0x200)?, None);
        Ok(())
    }

    #[test]
    fn duration_skips_unaligned_sync_bytes() -> anyhow::Result<()> {
        // A torn packet whose stray sync byte is followed by a plausible PES
        // header on the same PID.
        let mut data = ts_pes_packet(PID, Some(0), None);
        data.truncate(30);
        data.extend(ts_stream(PID, 90_000, 9_000, 101));

        let duration = TsDurationReader::default()
            .read_duration(&mut data.as_slice(), PID)?
            .unwrap();
        assert_eq!(duration.first_timestamp, 90_000);
        assert_eq!(duration.duration_us, 10_100_000);
        Ok(())
    }

    #[test]
    fn pcr_only_duration() -> anyhow::Result<()> {
        let data = ts_pcr_stream(PID, 0, 9_000, 200);
        let reader = TsDurationReader::default();

        let duration = reader.read_duration(&mut data.as_slice(), PID)?.unwrap();
        assert_eq!(duration.clock, TimestampClock::Pcr);
        assert_eq!(duration.first_timestamp, 0);
        assert_eq!(duration.duration_us, 19_900_000);

        assert_eq!(reader.read_pcr_duration(&mut data.as_slice(), PID)?, Some(duration));
        assert_eq!(reader.read_duration(&mut data.as_slice(), 0x200)?, None);
        Ok(())
    }

    #[test]
    fn pcr_duration_across_wrap() -> anyhow::Result<()> {
        // Starts 5 s before the 33-bit wrap.
        let first = TS_TIMESTAMP_MASK + 1 - 450_000;
        let data = ts_pcr_stream(PID, first, 9_000, 200);

        let duration = TsDurationReader::default()
            .read_pcr_duration(&mut data.as_slice(), PID)?
            .unwrap();
        assert_eq!(duration.first_timestamp, first);
        assert_eq!(duration.duration_us, 19_900_000);
        Ok(())
    }

    #[test]
    fn seeks_within_tolerance() -> anyhow::Result<()> {
        let data = ts_stream(PID, 0, 9_000, 101);
        let mut source = data.as_slice();

        for window_packets in [600, 20, 6] {
            let config = TsSeekConfig::default().with_timestamp_search_bytes(window_packets * TS_PACKET_SIZE);
            let mut seeker = BinarySearchSeeker::new(TsTimestampSeeker::new(PID, config), 10_000_000);

            let outcome = seeker.seek(&mut source, 5_030_000)?;
            let time = timestamp_at(&data, outcome.position).unwrap();
            assert!(
                (4_930_000..=5_130_000).contains(&time),
                "window {window_packets}: {time} at {}",
                outcome.position
            );
        }
        Ok(())
    }

    #[test]
    fn seek_to_ends() -> anyhow::Result<()> {
        let data = ts_stream(PID, 0, 9_000, 101);
        let mut source = data.as_slice();
        let config = TsSeekConfig::default().with_timestamp_search_bytes(20 * TS_PACKET_SIZE);
        let mut seeker = BinarySearchSeeker::new(TsTimestampSeeker::new(PID, config), 10_000_000);

        let start = seeker.seek(&mut source, -5)?;
        assert_eq!(timestamp_at(&data, start.position), Some(0));

        // Clamped to the duration; lands past the 9.9 s unit.
        let end = seeker.seek(&mut source, 60_000_000)?;
        assert!(end.position >= 99 * 5 * TS_PACKET_SIZE as u64, "{}", end.position);
        Ok(())
    }

    #[test]
    fn base_timestamp_and_wrap() -> anyhow::Result<()> {
        // Starts 2 s before the 33-bit wrap.
        let first = TS_TIMESTAMP_MASK + 1 - 180_000;
        let data = ts_stream(PID, first, 9_000, 101);
        let mut source = data.as_slice();

        let duration = TsDurationReader::default()
            .read_duration(&mut source, PID)?
            .unwrap();
        assert_eq!(duration.duration_us, 10_100_000);

        let timestamp_seeker = TsTimestampSeeker::new(PID, TsSeekConfig::default())
            .with_base_timestamp(duration.first_timestamp);
        let mut seeker = BinarySearchSeeker::new(timestamp_seeker, duration.duration_us);
        let outcome = seeker.seek(&mut source, 3_000_000)?;

        let packet = &data[outcome.position as usize..];
        let time = relative_us(read_pes_timestamp(packet, PID).unwrap(), first);
        assert!((2_900_000..=3_100_000).contains(&time), "{time}");
        Ok(())
    }

    #[test]
    fn window_classification() {
        let data = ts_stream(PID, 0, 9_000, 10);
        let seeker = TsTimestampSeeker::new(PID, TsSeekConfig::default());

        // Window starts on the 300 ms unit.
        let offset = 3 * 5 * TS_PACKET_SIZE;
        assert_eq!(
            seeker.search_window(&data[offset..], offset as u64, 100_000),
            TimestampSearchResult::Overestimated {
                timestamp_us: 300_000,
                position: offset as u64,
            }
        );
        assert_eq!(
            seeker.search_window(&data, 0, 350_000),
            TimestampSearchResult::TargetFound {
                position: offset as u64,
            }
        );
        assert!(matches!(
            seeker.search_window(&data[..offset], 0, 5_000_000),
            TimestampSearchResult::Underestimated {
                timestamp_us: 200_000,
                ..
            }
        ));
        assert_eq!(
            seeker.search_window(&[0xFF; 400], 0, 0),
            TimestampSearchResult::NoTimestampInRange
        );
    }

    #[test]
    fn reader_source() -> anyhow::Result<()> {
        let data = ts_stream(PID, 0, 9_000, 3);
        let mut source = ReaderSource::new(Cursor::new(data.clone()));

        assert_eq!(source.length()?, data.len() as u64);
        assert_eq!(source.read_at(10, 5)?, &data[10..15]);
        assert_eq!(source.read_at(data.len() as u64 - 2, 10)?.len(), 2);
        assert!(source.read_at(data.len() as u64 + 10, 10)?.is_empty());
        Ok(())
    }
}
