//! AC-4 raw sync frame (`ac4_syncframe`) headers.

use anyhow::{Result, bail};

use crate::process::sync_reader::{FrameHeader, StreamInfo, SyncFrameCodec, SyncKind};
use crate::structs::format::MimeType;
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::SyncFrameError;

pub const AC40_SYNCWORD: u16 = 0xAC40;
/// Sync word of frames followed by a CRC word.
pub const AC41_SYNCWORD: u16 = 0xAC41;

/// Bytes needed to decode the frame size.
pub const HEADER_SIZE_MIN: usize = 7;
/// Bytes needed to decode the stream parameters.
pub const HEADER_SIZE_FOR_PARSER: usize = 16;

pub const CHANNEL_COUNT: u32 = 2;

/// Samples per frame by `frame_rate_index`, at 48 kHz except index 13.
const SAMPLE_COUNT: [u32; 14] = [
    2002, // 23.976 fps
    2000, // 24
    1920, // 25
    1601, // 29.97
    1600, // 30
    1001, // 47.95
    1000, // 48
    960,  // 50
    800,  // 59.94
    800,  // 60
    480,  // 100
    400,  // 119.88
    400,  // 120
    2048, // 23.44
];

/// Fields of an `ac4_syncframe` header and the leading `ac4_toc` bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ac4SyncFrameInfo {
    pub bitstream_version: u32,
    pub sequence_counter: u32,
    pub sample_rate: u32,
    pub frame_rate_index: u8,
    /// Total frame size including sync word, size field and CRC word.
    pub frame_size: usize,
    pub sample_count: u32,
}

/// Decodes the total frame size from the first [`HEADER_SIZE_MIN`] bytes.
pub fn parse_frame_size(prefix: &[u8]) -> Result<usize> {
    if prefix.len() < HEADER_SIZE_MIN {
        bail!(SyncFrameError::HeaderTooLarge {
            size: HEADER_SIZE_MIN,
            max: prefix.len(),
        });
    }

    let sync = u16::from_be_bytes([prefix[0], prefix[1]]);
    let mut header_size = 4;
    let mut frame_size = u16::from_be_bytes([prefix[2], prefix[3]]) as usize;
    if frame_size == 0xFFFF {
        frame_size = u32::from_be_bytes([0, prefix[4], prefix[5], prefix[6]]) as usize;
        header_size += 3;
    }

    match sync {
        AC40_SYNCWORD => {}
        AC41_SYNCWORD => header_size += 2,
        _ => bail!(SyncFrameError::InvalidSyncWord(sync as u32)),
    }

    Ok(frame_size + header_size)
}

/// Frame length in samples. Frame rates that are not integral at 48 kHz
/// spread the remainder over a five-frame cadence keyed by the sequence counter.
pub fn sample_count(sample_rate: u32, frame_rate_index: u8, sequence_counter: u32) -> Option<u32> {
    let index = frame_rate_index as usize;

    match sample_rate {
        44_100 if index == 13 => Some(SAMPLE_COUNT[index]),
        48_000 if index < SAMPLE_COUNT.len() => {
            let extra = match (sequence_counter % 5, index) {
                (1 | 3, 3 | 8) | (2, 8 | 11) | (4, 3 | 8 | 11) => 1,
                _ => 0,
            };
            Some(SAMPLE_COUNT[index] + extra)
        }
        _ => None,
    }
}

impl Ac4SyncFrameInfo {
    pub fn read(header: &[u8]) -> Result<Self> {
        let mut reader = BsIoSliceReader::from_slice(header);

        let sync = reader.get_n::<u16>(16)?;
        let mut header_size = 4;
        let mut frame_size = reader.get_n::<u32>(16)? as usize;
        if frame_size == 0xFFFF {
            frame_size = reader.get_n::<u32>(24)? as usize;
            header_size += 3;
        }
        match sync {
            AC40_SYNCWORD => {}
            AC41_SYNCWORD => header_size += 2,
            _ => bail!(SyncFrameError::InvalidSyncWord(sync as u32)),
        }

        let mut bitstream_version = reader.get_n::<u32>(2)?;
        if bitstream_version == 3 {
            bitstream_version += reader.get_variable_bits_max(2, u32::MAX)?;
        }

        let sequence_counter = reader.get_n::<u32>(10)?;

        // b_wait_frames
        if reader.get()? && reader.get_n::<u8>(3)? > 0 {
            reader.skip_n(2)?;
        }

        let sample_rate = if reader.get()? { 48_000 } else { 44_100 };
        let frame_rate_index = reader.get_n::<u8>(4)?;
        let Some(sample_count) = sample_count(sample_rate, frame_rate_index, sequence_counter)
        else {
            bail!(SyncFrameError::InvalidFrameRate {
                frame_rate_index,
                sample_rate,
            });
        };

        Ok(Self {
            bitstream_version,
            sequence_counter,
            sample_rate,
            frame_rate_index,
            frame_size: frame_size + header_size,
            sample_count,
        })
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Ac4SyncCodec;

impl SyncFrameCodec for Ac4SyncCodec {
    const SYNC_WIDTH: usize = 2;
    const HEADER_SIZE_MIN: usize = HEADER_SIZE_MIN;
    const HEADER_SIZE_MAX: usize = HEADER_SIZE_FOR_PARSER;
    const MIME_TYPE: MimeType = MimeType::Ac4;

    fn match_sync(&self, window: u32) -> Option<SyncKind> {
        match window as u16 {
            AC40_SYNCWORD | AC41_SYNCWORD => Some(SyncKind::Sync),
            _ => None,
        }
    }

    fn header_size(&self, prefix: &[u8]) -> Result<usize> {
        Ok(parse_frame_size(prefix)?.min(HEADER_SIZE_FOR_PARSER))
    }

    fn parse_header(&mut self, header: &[u8], _kind: SyncKind) -> Result<FrameHeader> {
        let info = Ac4SyncFrameInfo::read(header)?;

        Ok(FrameHeader {
            frame_size: info.frame_size,
            stream_info: Some(StreamInfo {
                channel_count: CHANNEL_COUNT,
                sample_rate: info.sample_rate,
                sample_count: info.sample_count,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ac4_frame;

    #[test]
    fn frame_size_variants() -> anyhow::Result<()> {
        assert_eq!(parse_frame_size(&[0xAC, 0x40, 0x01, 0x00, 0, 0, 0])?, 256 + 4);
        assert_eq!(parse_frame_size(&[0xAC, 0x41, 0x01, 0x00, 0, 0, 0])?, 256 + 6);
        assert_eq!(
            parse_frame_size(&[0xAC, 0x40, 0xFF, 0xFF, 0x01, 0x00, 0x00])?,
            0x1_0000 + 7
        );
        assert!(parse_frame_size(&[0xAC, 0x42, 0, 0, 0, 0, 0]).is_err());
        Ok(())
    }

    #[test]
    fn fractional_frame_rates() {
        let counts = (0..5)
            .map(|seq| sample_count(48_000, 8, seq))
            .collect::<Vec<_>>();
        // 59.94 fps: 4004 samples per five frames
        assert_eq!(counts, [800, 801, 801, 801, 801].map(Some));

        assert_eq!(sample_count(44_100, 13, 0), Some(2048));
        assert_eq!(sample_count(44_100, 2, 0), None);
        assert_eq!(sample_count(48_000, 14, 0), None);
    }

    #[test]
    fn header_fields() -> anyhow::Result<()> {
        let frame = ac4_frame(200, 7, 2);
        let info = Ac4SyncFrameInfo::read(&frame[..HEADER_SIZE_FOR_PARSER])?;

        assert_eq!(info.frame_size, frame.len());
        assert_eq!(info.sequence_counter, 7);
        assert_eq!(info.sample_rate, 48_000);
        assert_eq!(info.frame_rate_index, 2);
        assert_eq!(info.sample_count, 1920);
        assert_eq!(info.bitstream_version, 2);
        Ok(())
    }
}
