use crate::process::output::StreamOutput;

/// Output sink trait and the collecting sink used by the tools.
pub mod output;

/// Sync-word driven frame reader.
///
/// Provides [`SyncFrameReader`](sync_reader::SyncFrameReader), generic over a
/// [`SyncFrameCodec`](sync_reader::SyncFrameCodec) such as DTS-UHD or AC-4.
pub mod sync_reader;

/// Buffering reader for configuration-bearing packetized streams.
///
/// Provides [`ConfigAwareFrameReader`](config_reader::ConfigAwareFrameReader),
/// generic over a [`ConfigFrameParser`](config_reader::ConfigFrameParser) such
/// as the MPEG-H MHAS parser.
pub mod config_reader;

/// Timestamp based seeking over a random-access byte source.
pub mod seek;

/// Container-level signalling attached to the start of a packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketFlags {
    /// The packet starts with a random access point.
    pub random_access: bool,
    /// The packet payload starts on an access unit boundary.
    pub data_aligned: bool,
}

/// Common interface of the elementary stream readers.
///
/// A reader is driven by one logical caller: `packet_started`, then any
/// number of `consume` calls for the packet's bytes, then `packet_finished`.
/// [`seek`](ElementaryStreamReader::seek) discards all buffered state.
pub trait ElementaryStreamReader {
    fn seek(&mut self);

    fn create_tracks(&mut self, output: &mut dyn StreamOutput);

    fn packet_started(&mut self, time_us: Option<i64>, flags: PacketFlags);

    fn consume(&mut self, data: &[u8], output: &mut dyn StreamOutput);

    fn packet_finished(&mut self, output: &mut dyn StreamOutput);
}
