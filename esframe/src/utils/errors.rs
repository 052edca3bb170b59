use std::io;

#[derive(thiserror::Error, Debug)]
pub enum SyncFrameError {
    #[error("Unrecognized sync word {0:#010X}")]
    InvalidSyncWord(u32),

    #[error("Header size {size} exceeds the maximum of {max} bytes")]
    HeaderTooLarge { size: usize, max: usize },

    #[error("Only full channel-based mix presentations are supported")]
    UnsupportedMix,

    #[error("FTOC CRC mismatch: stored {stored:#06X}, computed {computed:#06X}")]
    CrcMismatch { stored: u16, computed: u16 },

    #[error("Reserved base duration index {0}")]
    InvalidBaseDuration(u8),

    #[error("Reserved clock rate index {0}")]
    InvalidClockRate(u8),

    #[error("Metadata chunk size {0} exceeds 32767 bytes")]
    MetadataChunkTooLarge(u32),

    #[error("Audio chunk size {0} exceeds 65535 bytes")]
    AudioChunkTooLarge(u32),

    #[error("Frame rate index {frame_rate_index} is not defined for {sample_rate} Hz")]
    InvalidFrameRate {
        frame_rate_index: u8,
        sample_rate: u32,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum MhasError {
    #[error("Packet data exhausted: {0}")]
    Io(#[from] io::Error),

    #[error("Unsupported packet label {0}")]
    InvalidPacketLabel(u64),

    #[error("Packet type {0} must not use packet label 0")]
    ZeroPacketLabel(u32),

    #[error("Found a second mpegh3daConfig packet in one frame")]
    SecondConfig,

    #[error("Truncation of {truncation} samples exceeds the frame length {frame_samples}")]
    TruncationTooLarge {
        truncation: u32,
        frame_samples: u32,
    },

    #[error("mpegh3daFrame label {found} does not belong to main stream {main}")]
    ForeignFrameLabel { found: u64, main: u64 },

    #[error("Frame packet found before any mpegh3daConfig")]
    MissingConfig,

    #[error("Packet payload is not byte aligned after parsing")]
    NotByteAligned,

    #[error("Unsupported sampling frequency index {0}")]
    UnsupportedSamplingIndex(u32),

    #[error("Unsupported USAC sampling frequency {0} Hz")]
    UnsupportedSamplingFrequency(u32),

    #[error("Unsupported coreSbrFrameLengthIndex {0}")]
    UnsupportedFrameLengthIndex(u32),

    #[error("Stereo elements need at least two signals, found {0}")]
    TooFewSignals(u32),
}

#[derive(thiserror::Error, Debug)]
pub enum DsiError {
    #[error("Descriptor truncated: {0}")]
    Truncated(#[from] io::Error),

    #[error("Unsupported ac4_dsi_version {0}")]
    UnsupportedVersion(u8),

    #[error("bitstream_version {bitstream_version} requires ac4_dsi_version 1, found {dsi_version}")]
    VersionMismatch {
        dsi_version: u8,
        bitstream_version: u8,
    },

    #[error("Descriptor declares no presentations")]
    NoPresentations,

    #[error("Invalid language tag length {length} in presentation {presentation}")]
    InvalidLanguageTag { presentation: usize, length: u8 },

    #[error("pres_bytes {declared} is smaller than the {parsed} bytes parsed for presentation {presentation}")]
    PresentationOverrun {
        presentation: usize,
        declared: u32,
        parsed: u64,
    },

    #[error("Cannot determine the channel mode of presentation {0}")]
    UnknownChannelMode(usize),

    #[error("Invalid channel mode {0}")]
    InvalidChannelMode(u8),

    #[error("Invalid channel count {0}")]
    InvalidChannelCount(i32),
}
