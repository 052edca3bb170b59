use std::collections::VecDeque;

use log::{debug, trace, warn};

use crate::process::output::StreamOutput;
use crate::process::{ElementaryStreamReader, PacketFlags};
use crate::structs::format::{Format, TrackHandle, TrackType};
use crate::utils::time::MICROS_PER_SECOND;

/// Default bound on bytes held while waiting for a complete frame.
pub const DEFAULT_MAX_PENDING_BYTES: usize = 1 << 20;

/// Number of staged emissions after which the queue is flushed early.
const EMISSION_QUEUE_CAPACITY: usize = 16;

/// Whether the front of the pending buffer holds a complete frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCheck {
    /// A frame of this many bytes is buffered.
    Complete(usize),
    Incomplete,
    /// The leading bytes cannot start a frame.
    Malformed,
}

/// A frame decoded from the front of the pending buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFrame {
    pub frame_bytes: usize,
    pub frame_samples: u32,
    pub sample_rate: u32,
    /// The frame carries a full configuration and can start decoding.
    pub random_access: bool,
    /// Set when the configuration in this frame changes the track format.
    pub format: Option<Format>,
}

/// A parse failure along with the number of bytes the parser got through.
#[derive(Debug)]
pub struct FrameParseError {
    pub consumed: usize,
    pub reason: anyhow::Error,
}

/// Codec-specific half of a [`ConfigAwareFrameReader`].
pub trait ConfigFrameParser {
    /// Byte pattern that marks a resynchronization point.
    const SYNC_PATTERN: &'static [u8];

    fn check_frame(&self, data: &[u8]) -> FrameCheck;

    fn parse_frame(&mut self, data: &[u8]) -> Result<ParsedFrame, FrameParseError>;
}

#[derive(Debug)]
enum Emission {
    Format(Format),
    Frame {
        time_us: i64,
        key_frame: bool,
        data: Vec<u8>,
    },
}

/// Emissions of one extraction pass, kept in sequence order until flushed.
#[derive(Debug)]
struct EmissionQueue {
    next_seq: u64,
    entries: VecDeque<(u64, Emission)>,
    capacity: usize,
}

impl EmissionQueue {
    fn new(capacity: usize) -> Self {
        Self {
            next_seq: 0,
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, emission: Emission, output: &mut dyn StreamOutput, track: TrackHandle) {
        if self.entries.len() >= self.capacity {
            self.flush(output, track);
        }

        self.entries.push_back((self.next_seq, emission));
        self.next_seq += 1;
    }

    fn flush(&mut self, output: &mut dyn StreamOutput, track: TrackHandle) {
        while let Some((seq, emission)) = self.entries.pop_front() {
            match emission {
                Emission::Format(format) => {
                    debug!("Format changed: {format}");
                    output.emit_format(track, format);
                }
                Emission::Frame {
                    time_us,
                    key_frame,
                    data,
                } => {
                    trace!("#{seq}: {} bytes at {time_us} us, key {key_frame}", data.len());
                    output.emit_payload(track, &data);
                    output.emit_frame_boundary(track, time_us, key_frame, data.len());
                }
            }
        }
    }
}

/// Frame reader for packetized codecs whose frames start with an in-band
/// configuration and are only found by parsing packet headers.
///
/// Input is appended to a pending buffer on every
/// [`consume`](ElementaryStreamReader::consume); frames are extracted when
/// the container packet completes. Until a random access frame has been
/// decoded, data is discarded unless the container flags a random access
/// point, and unaligned data is searched for the codec's sync pattern.
#[derive(Debug)]
pub struct ConfigAwareFrameReader<P: ConfigFrameParser> {
    parser: P,
    language: Option<String>,
    format_id: Option<String>,
    track: Option<TrackHandle>,
    max_pending_bytes: usize,

    buffer: Vec<u8>,
    random_access: bool,
    data_aligned: bool,
    rap_pending: bool,
    data_pending: bool,

    time_us: Option<f64>,
    time_pending_us: Option<f64>,

    queue: EmissionQueue,
}

impl<P: ConfigFrameParser> ConfigAwareFrameReader<P> {
    pub fn new(parser: P) -> Self {
        Self {
            parser,
            language: None,
            format_id: None,
            track: None,
            max_pending_bytes: DEFAULT_MAX_PENDING_BYTES,
            buffer: Vec::new(),
            random_access: false,
            data_aligned: false,
            rap_pending: true,
            data_pending: false,
            time_us: None,
            time_pending_us: None,
            queue: EmissionQueue::new(EMISSION_QUEUE_CAPACITY),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_format_id(mut self, id: impl Into<String>) -> Self {
        self.format_id = Some(id.into());
        self
    }

    pub fn with_max_pending_bytes(mut self, max_pending_bytes: usize) -> Self {
        self.max_pending_bytes = max_pending_bytes;
        self
    }

    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    fn track(&mut self, output: &mut dyn StreamOutput) -> TrackHandle {
        *self
            .track
            .get_or_insert_with(|| output.declare_track(TrackType::Audio))
    }

    fn clear_data_buffer(&mut self) {
        self.buffer.clear();
        self.data_pending = false;
        self.rap_pending = true;
    }

    fn remove_used(&mut self, n: usize) {
        self.buffer.drain(..n.min(self.buffer.len()));
    }

    /// Drops data that cannot lead to a random access frame.
    fn maybe_find_sync(&mut self) {
        if !self.rap_pending {
            return;
        }

        if !self.random_access {
            if !self.buffer.is_empty() {
                debug!("Dropping {} bytes without random access point", self.buffer.len());
            }
            self.clear_data_buffer();
        } else if !self.data_aligned {
            match memchr::memmem::find(&self.buffer, P::SYNC_PATTERN) {
                Some(pos) => self.remove_used(pos),
                None => self.clear_data_buffer(),
            }
        }
    }

    fn advance_clock(&mut self, duration_us: f64) {
        let next = self.time_us.map(|t| t + duration_us);

        if self.data_pending {
            self.data_pending = false;
            self.time_us = self.time_pending_us.take().or(next);
        } else {
            self.time_us = next;
        }
    }

    fn extract_frames(&mut self, output: &mut dyn StreamOutput, track: TrackHandle) {
        self.maybe_find_sync();

        loop {
            match self.parser.check_frame(&self.buffer) {
                FrameCheck::Incomplete => break,
                FrameCheck::Malformed => {
                    warn!("Malformed packet at the start of the buffer, resyncing");
                    self.remove_used(1);
                    self.rap_pending = true;
                    self.maybe_find_sync();
                    continue;
                }
                FrameCheck::Complete(_) => {}
            }

            let frame = match self.parser.parse_frame(&self.buffer) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Frame parse failed, resyncing: {:#}", e.reason);
                    self.remove_used(e.consumed.max(1));
                    self.rap_pending = true;
                    self.maybe_find_sync();
                    continue;
                }
            };

            if let Some(format) = frame.format {
                let format = format
                    .with_language(self.language.clone())
                    .with_id(self.format_id.clone());
                self.queue.push(Emission::Format(format), output, track);
            }

            if frame.random_access {
                self.rap_pending = false;
            }

            let duration_us = if frame.sample_rate > 0 {
                MICROS_PER_SECOND as f64 * frame.frame_samples as f64 / frame.sample_rate as f64
            } else {
                0.0
            };
            let pts = self.time_us.map(|t| t.round() as i64);
            self.advance_clock(duration_us);

            let frame_bytes = frame.frame_bytes.min(self.buffer.len());
            match pts {
                Some(time_us) => {
                    let data = self.buffer[..frame_bytes].to_vec();
                    self.queue.push(
                        Emission::Frame {
                            time_us,
                            key_frame: frame.random_access,
                            data,
                        },
                        output,
                        track,
                    );
                }
                None => debug!("Dropping {frame_bytes} byte frame without a timestamp"),
            }

            self.remove_used(frame_bytes.max(1));
        }

        self.queue.flush(output, track);
    }
}

impl<P: ConfigFrameParser> ElementaryStreamReader for ConfigAwareFrameReader<P> {
    fn seek(&mut self) {
        self.clear_data_buffer();
        self.time_us = None;
        self.time_pending_us = None;
    }

    fn create_tracks(&mut self, output: &mut dyn StreamOutput) {
        self.track = Some(output.declare_track(TrackType::Audio));
    }

    fn packet_started(&mut self, time_us: Option<i64>, flags: PacketFlags) {
        self.random_access = flags.random_access;
        self.data_aligned = flags.data_aligned;

        if self.data_aligned && !self.buffer.is_empty() {
            warn!(
                "{} bytes left over at a data aligned packet, discarding",
                self.buffer.len()
            );
            self.clear_data_buffer();
        }

        if !self.buffer.is_empty() {
            self.data_pending = true;
        }

        if let Some(time_us) = time_us {
            if self.data_pending {
                self.time_pending_us = Some(time_us as f64);
            } else {
                self.time_us = Some(time_us as f64);
            }
        }
    }

    fn consume(&mut self, data: &[u8], output: &mut dyn StreamOutput) {
        self.track(output);
        self.buffer.extend_from_slice(data);

        if self.buffer.len() > self.max_pending_bytes {
            warn!(
                "Pending buffer exceeded {} bytes without a complete frame, resyncing",
                self.max_pending_bytes
            );
            self.clear_data_buffer();
        }
    }

    fn packet_finished(&mut self, output: &mut dyn StreamOutput) {
        let track = self.track(output);
        self.extract_frames(output, track);
    }
}
