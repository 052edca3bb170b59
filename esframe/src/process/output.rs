//! Output sink abstraction and a collecting sink.

use std::sync::Arc;

use log::warn;

use crate::structs::format::{Format, TrackHandle, TrackType};

/// Receives track metadata, payload bytes and frame boundaries from a reader.
///
/// Payload bytes for a frame are delivered through one or more
/// [`emit_payload`](StreamOutput::emit_payload) calls, after which
/// [`emit_frame_boundary`](StreamOutput::emit_frame_boundary) closes the
/// frame: its `size` is the number of most recently emitted bytes that belong
/// to it.
pub trait StreamOutput {
    fn declare_track(&mut self, track_type: TrackType) -> TrackHandle;

    fn emit_format(&mut self, track: TrackHandle, format: Format);

    fn emit_payload(&mut self, track: TrackHandle, bytes: &[u8]);

    fn emit_frame_boundary(&mut self, track: TrackHandle, time_us: i64, key_frame: bool, size: usize);
}

/// A complete frame reassembled by [`FrameCollector`].
#[derive(Debug, Clone)]
pub struct Frame {
    pub track: TrackHandle,
    pub time_us: i64,
    pub key_frame: bool,
    pub data: Arc<[u8]>,
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

#[derive(Debug, Clone)]
pub enum OutputEvent {
    Format(TrackHandle, Format),
    Frame(Frame),
}

/// Sink that keeps every event in emission order.
///
/// Payload bytes that are never claimed by a frame boundary (readers drop
/// frames whose presentation time is unknown) are discarded when the next
/// boundary arrives.
#[derive(Debug, Default)]
pub struct FrameCollector {
    tracks: Vec<TrackType>,
    pending: Vec<Vec<u8>>,
    events: Vec<OutputEvent>,
}

impl FrameCollector {
    pub fn events(&self) -> &[OutputEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<OutputEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn frames(&self) -> impl Iterator<Item = &Frame> {
        self.events.iter().filter_map(|event| match event {
            OutputEvent::Frame(frame) => Some(frame),
            OutputEvent::Format(..) => None,
        })
    }

    pub fn formats(&self) -> impl Iterator<Item = &Format> {
        self.events.iter().filter_map(|event| match event {
            OutputEvent::Format(_, format) => Some(format),
            OutputEvent::Frame(_) => None,
        })
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn pending_mut(&mut self, track: TrackHandle) -> Option<&mut Vec<u8>> {
        self.pending.get_mut(track.0)
    }
}

impl StreamOutput for FrameCollector {
    fn declare_track(&mut self, track_type: TrackType) -> TrackHandle {
        self.tracks.push(track_type);
        self.pending.push(Vec::new());
        TrackHandle(self.tracks.len() - 1)
    }

    fn emit_format(&mut self, track: TrackHandle, format: Format) {
        self.events.push(OutputEvent::Format(track, format));
    }

    fn emit_payload(&mut self, track: TrackHandle, bytes: &[u8]) {
        match self.pending_mut(track) {
            Some(pending) => pending.extend_from_slice(bytes),
            None => warn!("Payload for undeclared track {}", track.0),
        }
    }

    fn emit_frame_boundary(&mut self, track: TrackHandle, time_us: i64, key_frame: bool, size: usize) {
        let Some(pending) = self.pending_mut(track) else {
            warn!("Frame boundary for undeclared track {}", track.0);
            return;
        };

        if size > pending.len() {
            warn!(
                "Frame of {size} bytes closed with only {} payload bytes",
                pending.len()
            );
        }

        let start = pending.len().saturating_sub(size);
        let data: Arc<[u8]> = pending[start..].into();
        pending.clear();

        self.events.push(OutputEvent::Frame(Frame {
            track,
            time_us,
            key_frame,
            data,
        }));
    }
}

#[test]
fn collector_assembles_frames() {
    use crate::structs::format::MimeType;

    let mut collector = FrameCollector::default();
    let track = collector.declare_track(TrackType::Audio);

    collector.emit_format(track, Format::new(MimeType::Ac4, 48_000));
    collector.emit_payload(track, &[1, 2]);
    collector.emit_payload(track, &[3]);
    collector.emit_frame_boundary(track, 0, true, 3);

    // Unclaimed bytes in front of the next frame are dropped.
    collector.emit_payload(track, &[9, 9, 4, 5]);
    collector.emit_frame_boundary(track, 10, false, 2);

    let frames = collector.frames().collect::<Vec<_>>();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].as_ref(), &[1, 2, 3]);
    assert!(frames[0].key_frame);
    assert_eq!(frames[1].as_ref(), &[4, 5]);
    assert_eq!(frames[1].time_us, 10);
    assert_eq!(collector.formats().count(), 1);
}
