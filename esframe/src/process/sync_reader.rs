use anyhow::Result;
use log::{debug, trace, warn};

use crate::process::output::StreamOutput;
use crate::process::{ElementaryStreamReader, PacketFlags};
use crate::structs::format::{Format, MimeType, TrackHandle, TrackType};
use crate::utils::errors::SyncFrameError;
use crate::utils::time::samples_to_us;

/// Which family of sync word opened the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    /// Frame carries the full stream parameters.
    Sync,
    /// Frame relies on parameters from the last sync frame.
    NonSync,
}

/// Decoder-relevant parameters carried by a sync frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub channel_count: u32,
    pub sample_rate: u32,
    /// Samples per frame at `sample_rate`.
    pub sample_count: u32,
}

/// Result of decoding one frame header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Total frame length in bytes, header included.
    pub frame_size: usize,
    /// Present on frames that carry stream parameters.
    pub stream_info: Option<StreamInfo>,
}

/// Codec-specific half of a [`SyncFrameReader`].
pub trait SyncFrameCodec {
    /// Sync word width in bytes, at most four.
    const SYNC_WIDTH: usize;
    /// Bytes needed before [`header_size`](SyncFrameCodec::header_size) can run.
    const HEADER_SIZE_MIN: usize;
    /// Largest header the codec can declare; longer headers force a resync.
    const HEADER_SIZE_MAX: usize;
    const MIME_TYPE: MimeType;

    /// Classifies the last `SYNC_WIDTH` bytes seen, packed big-endian.
    fn match_sync(&self, window: u32) -> Option<SyncKind>;

    /// Decodes the header length from the first `HEADER_SIZE_MIN` bytes.
    fn header_size(&self, prefix: &[u8]) -> Result<usize>;

    fn parse_header(&mut self, header: &[u8], kind: SyncKind) -> Result<FrameHeader>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    FindingSync,
    FindHeaderSize,
    ReadingHeader,
    ReadingSample,
}

/// Extracts frames from a byte stream delimited by codec sync words.
///
/// Bytes may arrive in chunks of any size; header and payload accumulation
/// persist across [`consume`](ElementaryStreamReader::consume) calls. Frames
/// are forwarded to the sink header first, followed by a frame boundary once
/// the last payload byte has arrived and a presentation time is known.
///
/// # Example
///
/// ```rust,no_run
/// use esframe::process::ElementaryStreamReader;
/// use esframe::process::output::FrameCollector;
/// use esframe::process::sync_reader::SyncFrameReader;
/// use esframe::structs::dts_uhd::DtsUhdCodec;
///
/// let mut reader = SyncFrameReader::new(DtsUhdCodec::default());
/// let mut output = FrameCollector::default();
/// reader.create_tracks(&mut output);
///
/// let data = std::fs::read("stream.dtsx")?;
/// reader.packet_started(Some(0), Default::default());
/// for chunk in data.chunks(4096) {
///     reader.consume(chunk, &mut output);
/// }
///
/// for frame in output.frames() {
///     println!("{} us: {} bytes", frame.time_us, frame.as_ref().len());
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct SyncFrameReader<C: SyncFrameCodec> {
    codec: C,
    language: Option<String>,
    format_id: Option<String>,
    track: Option<TrackHandle>,

    state: State,
    sync_window: u32,
    sync_kind: SyncKind,
    header: Vec<u8>,
    bytes_read: usize,

    header_size: usize,
    frame_size: usize,
    forward_frame: bool,
    format: Option<Format>,
    stream_info: Option<StreamInfo>,
    sample_duration_us: i64,

    time_us: Option<i64>,
}

impl<C: SyncFrameCodec> SyncFrameReader<C> {
    pub fn new(codec: C) -> Self {
        Self {
            codec,
            language: None,
            format_id: None,
            track: None,
            state: State::FindingSync,
            sync_window: 0,
            sync_kind: SyncKind::Sync,
            header: vec![0; C::HEADER_SIZE_MAX],
            bytes_read: 0,
            header_size: 0,
            frame_size: 0,
            forward_frame: false,
            format: None,
            stream_info: None,
            sample_duration_us: 0,
            time_us: None,
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

    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Last format pushed to the sink.
    pub fn format(&self) -> Option<&Format> {
        self.format.as_ref()
    }

    fn track(&mut self, output: &mut dyn StreamOutput) -> TrackHandle {
        *self
            .track
            .get_or_insert_with(|| output.declare_track(TrackType::Audio))
    }

    fn resync(&mut self) {
        self.state = State::FindingSync;
        self.sync_window = 0;
        self.bytes_read = 0;
    }

    fn sync_mask() -> u32 {
        if C::SYNC_WIDTH >= 4 {
            u32::MAX
        } else {
            (1 << (C::SYNC_WIDTH * 8)) - 1
        }
    }

    /// Scans for the next sync word, leaving `pos` just past it on success and
    /// at the end of `data` otherwise.
    fn skip_to_next_sync(&mut self, data: &[u8], pos: &mut usize) -> bool {
        let mask = Self::sync_mask();

        while *pos < data.len() {
            self.sync_window = ((self.sync_window << 8) | data[*pos] as u32) & mask;
            *pos += 1;

            if let Some(kind) = self.codec.match_sync(self.sync_window) {
                let sync_bytes = self.sync_window.to_be_bytes();
                self.header[..C::SYNC_WIDTH].copy_from_slice(&sync_bytes[4 - C::SYNC_WIDTH..]);
                self.bytes_read = C::SYNC_WIDTH;
                self.sync_kind = kind;
                self.sync_window = 0;
                return true;
            }
        }

        false
    }

    /// Copies bytes into the header scratch buffer until `target` bytes are held.
    fn continue_read(&mut self, data: &[u8], pos: &mut usize, target: usize) -> bool {
        let n = (data.len() - *pos).min(target.saturating_sub(self.bytes_read));
        self.header[self.bytes_read..self.bytes_read + n].copy_from_slice(&data[*pos..*pos + n]);
        self.bytes_read += n;
        *pos += n;

        self.bytes_read >= target
    }

    fn find_header_size(&mut self) -> Result<usize> {
        let size = self.codec.header_size(&self.header[..C::HEADER_SIZE_MIN])?;
        if size > C::HEADER_SIZE_MAX {
            anyhow::bail!(SyncFrameError::HeaderTooLarge {
                size,
                max: C::HEADER_SIZE_MAX,
            });
        }

        // Sync and prefix bytes already consumed stay part of the header.
        Ok(size.max(self.bytes_read))
    }

    fn parse_header(&mut self, output: &mut dyn StreamOutput, track: TrackHandle) -> Result<()> {
        let frame = self
            .codec
            .parse_header(&self.header[..self.header_size], self.sync_kind)?;

        if let Some(info) = frame.stream_info {
            let format = Format::new(C::MIME_TYPE, info.sample_rate)
                .with_channel_count(info.channel_count)
                .with_language(self.language.clone())
                .with_id(self.format_id.clone());

            if self
                .format
                .as_ref()
                .is_none_or(|current| current.layout_differs(&format))
            {
                debug!("Format changed: {format}");
                output.emit_format(track, format.clone());
                self.format = Some(format);
            }

            self.stream_info = Some(info);
        }

        let Some(info) = self.stream_info else {
            debug!("Skipping {:?} frame ahead of the first sync frame", self.sync_kind);
            self.forward_frame = false;
            self.frame_size = frame.frame_size.max(self.header_size);
            return Ok(());
        };

        let sample_rate = self
            .format
            .as_ref()
            .map_or(info.sample_rate, |format| format.sample_rate);
        self.sample_duration_us = samples_to_us(info.sample_count, sample_rate);
        self.frame_size = frame.frame_size.max(self.header_size);
        self.forward_frame = true;

        trace!(
            "{:?} frame: header {} bytes, frame {} bytes",
            self.sync_kind, self.header_size, self.frame_size
        );
        output.emit_payload(track, &self.header[..self.header_size]);

        Ok(())
    }

    fn finish_frame(&mut self, output: &mut dyn StreamOutput, track: TrackHandle) {
        if self.forward_frame {
            if let Some(time_us) = self.time_us {
                output.emit_frame_boundary(track, time_us, true, self.frame_size);
                self.time_us = Some(time_us + self.sample_duration_us);
            }
        }

        self.state = State::FindingSync;
        self.bytes_read = 0;
    }

    /// States that can complete without new input once their target is reached.
    fn can_advance_without_input(&self) -> bool {
        match self.state {
            State::ReadingHeader => self.bytes_read >= self.header_size,
            State::ReadingSample => self.bytes_read >= self.frame_size,
            _ => false,
        }
    }
}

impl<C: SyncFrameCodec> ElementaryStreamReader for SyncFrameReader<C> {
    fn seek(&mut self) {
        self.resync();
        self.time_us = None;
    }

    fn create_tracks(&mut self, output: &mut dyn StreamOutput) {
        self.track = Some(output.declare_track(TrackType::Audio));
    }

    fn packet_started(&mut self, time_us: Option<i64>, _flags: PacketFlags) {
        if time_us.is_some() {
            self.time_us = time_us;
        }
    }

    fn consume(&mut self, data: &[u8], output: &mut dyn StreamOutput) {
        let track = self.track(output);
        let mut pos = 0;

        while pos < data.len() || self.can_advance_without_input() {
            match self.state {
                State::FindingSync => {
                    if self.skip_to_next_sync(data, &mut pos) {
                        self.state = State::FindHeaderSize;
                    }
                }
                State::FindHeaderSize => {
                    if self.continue_read(data, &mut pos, C::HEADER_SIZE_MIN) {
                        match self.find_header_size() {
                            Ok(size) => {
                                self.header_size = size;
                                self.state = State::ReadingHeader;
                            }
                            Err(e) => {
                                warn!("Invalid header size, resyncing: {e}");
                                self.resync();
                            }
                        }
                    }
                }
                State::ReadingHeader => {
                    if self.continue_read(data, &mut pos, self.header_size) {
                        match self.parse_header(output, track) {
                            Ok(()) => self.state = State::ReadingSample,
                            Err(e) => {
                                warn!("Dropping frame with invalid header: {e}");
                                self.resync();
                            }
                        }
                    }
                }
                State::ReadingSample => {
                    let n = (data.len() - pos).min(self.frame_size - self.bytes_read);
                    if self.forward_frame && n > 0 {
                        output.emit_payload(track, &data[pos..pos + n]);
                    }
                    pos += n;
                    self.bytes_read += n;

                    if self.bytes_read == self.frame_size {
                        self.finish_frame(output, track);
                    }
                }
            }
        }
    }

    fn packet_finished(&mut self, _output: &mut dyn StreamOutput) {}
}
