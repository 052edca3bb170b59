//! DTS-UHD (DTS:X Profile 2) frame table of contents parsing.
//!
//! Every frame opens with an FTOC carrying its own size. Sync frames
//! additionally carry the stream parameters and a CRC over the FTOC;
//! non-sync frames reuse the audio chunk id of the preceding sync frame.
//! Streams may be stored as little-endian 16-bit words and are normalized
//! before parsing.

use std::borrow::Cow;

use anyhow::{Result, bail};
use log::trace;

use crate::process::sync_reader::{FrameHeader, StreamInfo, SyncFrameCodec, SyncKind};
use crate::structs::format::MimeType;
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::crc::{CRC_DTS_UHD_FTOC_ALG, Crc16};
use crate::utils::errors::SyncFrameError;

pub const FTOC_SYNC_BE: u32 = 0x4041_1BF2;
pub const FTOC_NONSYNC_BE: u32 = 0x71C4_42E8;
pub const FTOC_SYNC_LE: u32 = 0x4140_F21B;
pub const FTOC_NONSYNC_LE: u32 = 0xC471_E842;

/// Bytes needed to decode the FTOC size.
pub const FTOC_HEADER_SIZE_MIN: usize = 7;
pub const FTOC_HEADER_SIZE_MAX: usize = 5408;

/// Channel count reported for every stream; the real layout lives in the
/// metadata chunk.
pub const CHANNEL_COUNT: u32 = 2;

const FTOC_SIZE_BITS: [u32; 4] = [5, 8, 10, 12];
const METADATA_CHUNK_BITS: [u32; 4] = [6, 9, 12, 15];
const AUDIO_CHUNK_ID_BITS: [u32; 4] = [2, 4, 6, 8];
const AUDIO_CHUNK_SIZE_BITS: [u32; 4] = [9, 11, 13, 16];

const BASE_DURATION: [u32; 3] = [512, 480, 384];
const CLOCK_RATE: [u32; 3] = [32_000, 44_100, 48_000];

const METADATA_CHUNK_SIZE_MAX: u32 = 32_767;
const AUDIO_CHUNK_SIZE_MAX: u32 = 65_535;

static FTOC_CRC: Crc16 = Crc16::new(&CRC_DTS_UHD_FTOC_ALG);

fn sync_word(header: &[u8]) -> u32 {
    let mut word = [0u8; 4];
    let n = header.len().min(4);
    word[..n].copy_from_slice(&header[..n]);
    u32::from_be_bytes(word)
}

/// Returns the header with 16-bit words in big-endian order.
pub fn normalize(header: &[u8]) -> Cow<'_, [u8]> {
    match sync_word(header) {
        FTOC_SYNC_LE | FTOC_NONSYNC_LE => {
            let mut swapped = header.to_vec();
            for pair in swapped.chunks_exact_mut(2) {
                pair.swap(0, 1);
            }
            Cow::Owned(swapped)
        }
        _ => Cow::Borrowed(header),
    }
}

/// Decodes the FTOC size in bytes from at least [`FTOC_HEADER_SIZE_MIN`] bytes.
pub fn parse_header_size(prefix: &[u8]) -> Result<usize> {
    let header = normalize(prefix);
    let mut reader = BsIoSliceReader::from_slice(&header);

    let sync = reader.get_n::<u32>(32)?;
    if sync != FTOC_SYNC_BE && sync != FTOC_NONSYNC_BE {
        bail!(SyncFrameError::InvalidSyncWord(sync));
    }

    Ok(reader.get_var_len_field(&FTOC_SIZE_BITS, true)? as usize + 1)
}

/// Decoded frame table of contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ftoc {
    pub sync_frame: bool,
    pub ftoc_bytes: usize,
    /// FTOC plus metadata and audio chunk payloads.
    pub frame_size: usize,
    pub audio_chunk_id: u32,
    pub stream_info: Option<StreamInfo>,
}

impl Ftoc {
    /// Parses the FTOC of a frame. `stored_audio_chunk_id` carries the audio
    /// chunk id from the last sync frame into the following non-sync frames.
    pub fn read(header: &[u8], stored_audio_chunk_id: &mut u32) -> Result<Self> {
        let header = normalize(header);
        let mut reader = BsIoSliceReader::from_slice(&header);

        let sync = reader.get_n::<u32>(32)?;
        let sync_frame = match sync {
            FTOC_SYNC_BE => true,
            FTOC_NONSYNC_BE => false,
            _ => bail!(SyncFrameError::InvalidSyncWord(sync)),
        };

        let ftoc_bytes = reader.get_var_len_field(&FTOC_SIZE_BITS, true)? as usize + 1;
        if ftoc_bytes > header.len() {
            bail!(SyncFrameError::HeaderTooLarge {
                size: ftoc_bytes,
                max: header.len(),
            });
        }

        let mut stream_info = None;
        let mut chunk_bytes = 0usize;

        if sync_frame {
            if !reader.get()? {
                bail!(SyncFrameError::UnsupportedMix);
            }

            check_crc(&header[..ftoc_bytes])?;

            let base_index = reader.get_n::<u8>(2)?;
            let Some(&base_duration) = BASE_DURATION.get(base_index as usize) else {
                bail!(SyncFrameError::InvalidBaseDuration(base_index));
            };
            let frame_duration = base_duration * (reader.get_n::<u32>(3)? + 1);

            let clock_index = reader.get_n::<u8>(2)?;
            let Some(&clock_rate) = CLOCK_RATE.get(clock_index as usize) else {
                bail!(SyncFrameError::InvalidClockRate(clock_index));
            };

            // timestamp update
            if reader.get()? {
                reader.skip_n(32 + 4)?;
            }

            let multiplier = 1u32 << reader.get_n::<u32>(2)?;
            stream_info = Some(StreamInfo {
                channel_count: CHANNEL_COUNT,
                sample_rate: clock_rate * multiplier,
                sample_count: frame_duration * multiplier,
            });

            let metadata_size = reader.get_var_len_field(&METADATA_CHUNK_BITS, true)?;
            if metadata_size > METADATA_CHUNK_SIZE_MAX {
                bail!(SyncFrameError::MetadataChunkTooLarge(metadata_size));
            }
            chunk_bytes += metadata_size as usize;

            *stored_audio_chunk_id = reader.get_var_len_field(&AUDIO_CHUNK_ID_BITS, true)?;
        }

        let audio_chunk_id = if *stored_audio_chunk_id < 256 {
            *stored_audio_chunk_id
        } else {
            0
        };

        if audio_chunk_id != 0 {
            let audio_size = reader.get_var_len_field(&AUDIO_CHUNK_SIZE_BITS, true)?;
            if audio_size > AUDIO_CHUNK_SIZE_MAX {
                bail!(SyncFrameError::AudioChunkTooLarge(audio_size));
            }
            chunk_bytes += audio_size as usize;
        }

        Ok(Self {
            sync_frame,
            ftoc_bytes,
            frame_size: ftoc_bytes + chunk_bytes,
            audio_chunk_id,
            stream_info,
        })
    }
}

fn check_crc(ftoc: &[u8]) -> Result<()> {
    let Some(split) = ftoc.len().checked_sub(2) else {
        bail!(SyncFrameError::HeaderTooLarge {
            size: 2,
            max: ftoc.len(),
        });
    };

    let stored = u16::from_be_bytes([ftoc[split], ftoc[split + 1]]);
    let computed = FTOC_CRC.checksum(&ftoc[..split]);
    if stored != computed {
        bail!(SyncFrameError::CrcMismatch { stored, computed });
    }

    Ok(())
}

#[derive(Debug, Default, Clone)]
pub struct DtsUhdCodec {
    stored_audio_chunk_id: u32,
}

impl DtsUhdCodec {
    pub fn stored_audio_chunk_id(&self) -> u32 {
        self.stored_audio_chunk_id
    }
}

impl SyncFrameCodec for DtsUhdCodec {
    const SYNC_WIDTH: usize = 4;
    const HEADER_SIZE_MIN: usize = FTOC_HEADER_SIZE_MIN;
    const HEADER_SIZE_MAX: usize = FTOC_HEADER_SIZE_MAX;
    const MIME_TYPE: MimeType = MimeType::DtsUhd;

    fn match_sync(&self, window: u32) -> Option<SyncKind> {
        match window {
            FTOC_SYNC_BE | FTOC_SYNC_LE => Some(SyncKind::Sync),
            FTOC_NONSYNC_BE | FTOC_NONSYNC_LE => Some(SyncKind::NonSync),
            _ => None,
        }
    }

    fn header_size(&self, prefix: &[u8]) -> Result<usize> {
        parse_header_size(prefix)
    }

    fn parse_header(&mut self, header: &[u8], _kind: SyncKind) -> Result<FrameHeader> {
        let ftoc = Ftoc::read(header, &mut self.stored_audio_chunk_id)?;
        trace!("{ftoc:?}");

        Ok(FrameHeader {
            frame_size: ftoc.frame_size,
            stream_info: ftoc.stream_info,
        })
    }
}
