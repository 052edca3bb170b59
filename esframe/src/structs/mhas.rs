//! MPEG-H 3D Audio Stream (MHAS) packets.
//!
//! An MHAS frame is a run of packets closed by an `mpegh3daFrame` packet.
//! Only the fields needed for the track format and the frame duration are
//! decoded; everything else inside `mpegh3daConfig` is skipped bit-exactly.

use log::{debug, trace};

use crate::process::config_reader::{ConfigFrameParser, FrameCheck, FrameParseError, ParsedFrame};
use crate::structs::format::{Format, MimeType};
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::MhasError;

/// A complete `PACTYP_SYNC` packet: type 6, label 0, length 1, payload 0xA5.
pub const MHAS_SYNC_PACKET: [u8; 3] = [0xC0, 0x01, 0xA5];

pub const PACTYP_FILLDATA: u32 = 0;
pub const PACTYP_MPEGH3DACFG: u32 = 1;
pub const PACTYP_MPEGH3DAFRAME: u32 = 2;
pub const PACTYP_SYNC: u32 = 6;
pub const PACTYP_AUDIOTRUNCATION: u32 = 17;

const PACKET_LABEL_MAX: u64 = 0x10;

const ID_USAC_SCE: u8 = 0;
const ID_USAC_CPE: u8 = 1;
const ID_USAC_EXT: u8 = 3;

const ID_CONFIG_EXT_COMPATIBLE_PROFILELVL_SET: u64 = 7;

type Result<T> = std::result::Result<T, MhasError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MhasPacketHeader {
    pub packet_type: u32,
    pub label: u64,
    pub length: usize,
}

impl MhasPacketHeader {
    pub fn read(reader: &mut BsIoSliceReader) -> Result<Self> {
        let packet_type = reader.get_escaped(3, 8, 8)? as u32;

        let label = reader.get_escaped(2, 8, 32)?;
        if label > PACKET_LABEL_MAX {
            return Err(MhasError::InvalidPacketLabel(label));
        }
        if label == 0
            && matches!(
                packet_type,
                PACTYP_MPEGH3DACFG | PACTYP_MPEGH3DAFRAME | PACTYP_AUDIOTRUNCATION
            )
        {
            return Err(MhasError::ZeroPacketLabel(packet_type));
        }

        let length = reader.get_escaped(11, 24, 24)? as usize;

        Ok(Self {
            packet_type,
            label,
            length,
        })
    }
}

/// Fields of `mpegh3daConfig` that shape the output format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mpegh3daConfig {
    pub profile_level_indication: u8,
    /// Output sampling rate after resampling.
    pub sampling_frequency: u32,
    /// Output samples per frame after resampling.
    pub standard_frame_samples: u32,
    pub compatible_profile_levels: Option<Vec<u8>>,
}

fn usac_sampling_frequency(reader: &mut BsIoSliceReader) -> Result<u32> {
    let index = reader.get_n::<u32>(5)?;

    let frequency = match index {
        0 => 96_000,
        1 => 88_200,
        2 => 64_000,
        3 => 48_000,
        4 => 44_100,
        5 => 32_000,
        6 => 24_000,
        7 => 22_050,
        8 => 16_000,
        9 => 12_000,
        10 => 11_025,
        11 => 8_000,
        12 => 7_350,
        15 => 57_600,
        16 => 51_200,
        17 => 40_000,
        18 => 38_400,
        19 => 34_150,
        20 => 28_800,
        21 => 25_600,
        22 => 20_000,
        23 => 19_200,
        24 => 17_075,
        25 => 14_400,
        26 => 12_800,
        27 => 9_600,
        0x1F => reader.get_n::<u32>(24)?,
        _ => return Err(MhasError::UnsupportedSamplingIndex(index)),
    };

    Ok(frequency)
}

/// Output frame length and SBR ratio index for `coreSbrFrameLengthIndex`.
fn core_sbr_frame_length(index: u32) -> Result<(u32, u32)> {
    match index {
        0 => Ok((768, 0)),
        1 => Ok((1024, 0)),
        2 => Ok((2048, 2)),
        3 => Ok((2048, 3)),
        4 => Ok((4096, 1)),
        _ => Err(MhasError::UnsupportedFrameLengthIndex(index)),
    }
}

/// Ratio between the output rate and the core coder rate, as a fraction.
fn resampling_ratio(usac_frequency: u32) -> Result<(u32, u32)> {
    match usac_frequency {
        96_000 | 88_200 | 48_000 | 44_100 => Ok((1, 1)),
        64_000 | 58_800 | 32_000 | 29_400 => Ok((3, 2)),
        24_000 | 22_050 => Ok((2, 1)),
        16_000 | 14_700 => Ok((3, 1)),
        _ => Err(MhasError::UnsupportedSamplingFrequency(usac_frequency)),
    }
}

fn skip_speaker_config_3d(reader: &mut BsIoSliceReader) -> Result<()> {
    let layout_type = reader.get_n::<u8>(2)?;
    if layout_type == 0 {
        // CICPspeakerLayoutIdx
        reader.skip_n(6)?;
        return Ok(());
    }

    let speakers = reader.get_escaped(5, 8, 16)? + 1;
    match layout_type {
        1 => reader.skip_bits(7 * speakers)?,
        2 => skip_flexible_speaker_config(reader, speakers)?,
        _ => {}
    }

    Ok(())
}

fn skip_flexible_speaker_config(reader: &mut BsIoSliceReader, speakers: u64) -> Result<()> {
    let angular_precision = reader.get()?;
    let (degrees, elevation_bits, azimuth_bits) = if angular_precision {
        (1, 7, 8)
    } else {
        (5, 5, 6)
    };

    let mut i = 0;
    while i < speakers {
        let mut azimuth = 0;

        if reader.get()? {
            // CICPspeakerIdx
            reader.skip_n(7)?;
        } else {
            let elevation_class = reader.get_n::<u8>(2)?;
            if elevation_class == 3 {
                let elevation = reader.get_n::<u32>(elevation_bits)? * degrees;
                if elevation != 0 {
                    reader.skip_n(1)?;
                }
            }

            azimuth = reader.get_n::<u32>(azimuth_bits)? * degrees;
            if azimuth != 0 && azimuth != 180 {
                reader.skip_n(1)?;
            }

            // isLFE
            reader.skip_n(1)?;
        }

        // alsoAddSymmetricPair
        if azimuth != 0 && azimuth != 180 && reader.get()? {
            i += 1;
        }

        i += 1;
    }

    Ok(())
}

/// Parses `Signals3d` and returns the total number of signals.
fn parse_signals_3d(reader: &mut BsIoSliceReader) -> Result<u32> {
    let groups = reader.get_n::<u32>(5)? + 1;
    let mut signals = 0u32;

    for _ in 0..groups {
        let group_type = reader.get_n::<u8>(3)?;
        signals = signals.saturating_add(reader.get_escaped(5, 8, 16)? as u32 + 1);

        // channels or SAOC groups may carry their own layout
        if matches!(group_type, 0 | 2) && reader.get()? {
            skip_speaker_config_3d(reader)?;
        }
    }

    Ok(signals)
}

/// Skips `mpegh3daCoreConfig`, returning the enhanced noise filling flag.
fn skip_core_config(reader: &mut BsIoSliceReader) -> Result<bool> {
    reader.skip_n(3)?;
    let enhanced_noise_filling = reader.get()?;
    if enhanced_noise_filling {
        reader.skip_n(13)?;
    }

    Ok(enhanced_noise_filling)
}

fn skip_sbr_config(reader: &mut BsIoSliceReader) -> Result<()> {
    reader.skip_n(3 + 8)?;
    let header_extra1 = reader.get()?;
    let header_extra2 = reader.get()?;
    if header_extra1 {
        reader.skip_n(5)?;
    }
    if header_extra2 {
        reader.skip_n(6)?;
    }

    Ok(())
}

fn skip_mps212_config(reader: &mut BsIoSliceReader, stereo_config_index: u8) -> Result<()> {
    // bsFreqRes, bsFixedGainDMX
    reader.skip_n(6)?;
    let temp_shape_config = reader.get_n::<u8>(2)?;
    reader.skip_n(4)?;

    // bsOttBandsPhasePresent
    if reader.get()? {
        reader.skip_n(5)?;
    }
    if matches!(stereo_config_index, 2 | 3) {
        reader.skip_n(6)?;
    }
    if temp_shape_config == 2 {
        reader.skip_n(1)?;
    }

    Ok(())
}

fn skip_decoder_config(reader: &mut BsIoSliceReader, signals: u32, sbr_ratio_index: u32) -> Result<()> {
    let elements = reader.get_escaped(4, 8, 16)? + 1;
    // elementLengthPresent
    reader.skip_n(1)?;

    for _ in 0..elements {
        match reader.get_n::<u8>(2)? {
            ID_USAC_SCE => {
                skip_core_config(reader)?;
                if sbr_ratio_index > 0 {
                    skip_sbr_config(reader)?;
                }
            }
            ID_USAC_CPE => {
                if skip_core_config(reader)? {
                    // igfIndependentTiling
                    reader.skip_n(1)?;
                }

                let mut stereo_config_index = 0;
                if sbr_ratio_index > 0 {
                    skip_sbr_config(reader)?;
                    stereo_config_index = reader.get_n::<u8>(2)?;
                }
                if stereo_config_index > 0 {
                    skip_mps212_config(reader, stereo_config_index)?;
                }

                if signals < 2 {
                    return Err(MhasError::TooFewSignals(signals));
                }
                let channel_bits = u32::BITS - (signals - 1).leading_zeros();

                let qce_index = reader.get_n::<u8>(2)?;
                if qce_index > 0 && reader.get()? {
                    reader.skip_n(channel_bits)?;
                }
                if reader.get()? {
                    reader.skip_n(channel_bits)?;
                }
                if sbr_ratio_index == 0 && qce_index == 0 {
                    // lpdStereoIndex
                    reader.skip_n(1)?;
                }
            }
            ID_USAC_EXT => {
                reader.get_escaped(4, 8, 16)?;
                let config_length = reader.get_escaped(4, 8, 16)?;

                // usacExtElementDefaultLengthPresent
                if reader.get()? {
                    reader.get_escaped(8, 16, 0)?;
                }
                // usacExtElementPayloadFrag
                reader.skip_n(1)?;

                reader.skip_bytes(config_length)?;
            }
            _ => {}
        }
    }

    Ok(())
}

impl Mpegh3daConfig {
    pub fn read(reader: &mut BsIoSliceReader) -> Result<Self> {
        let profile_level_indication = reader.get_n::<u8>(8)?;

        let usac_frequency = usac_sampling_frequency(reader)?;
        if usac_frequency == 0 {
            return Err(MhasError::UnsupportedSamplingFrequency(usac_frequency));
        }

        let (output_frame_length, sbr_ratio_index) =
            core_sbr_frame_length(reader.get_n::<u32>(3)?)?;

        // cfg_reserved, receiverDelayCompensation
        reader.skip_n(2)?;

        // referenceLayout
        skip_speaker_config_3d(reader)?;
        let signals = parse_signals_3d(reader)?;
        skip_decoder_config(reader, signals, sbr_ratio_index)?;

        let mut compatible_profile_levels = None;
        // usacConfigExtensionPresent
        if reader.get()? {
            let extensions = reader.get_escaped(2, 4, 8)? + 1;
            for _ in 0..extensions {
                let ext_type = reader.get_escaped(4, 8, 16)?;
                let ext_length = reader.get_escaped(4, 8, 16)?;

                if ext_type == ID_CONFIG_EXT_COMPATIBLE_PROFILELVL_SET {
                    let sets = reader.get_n::<u32>(4)? as usize + 1;
                    reader.skip_n(4)?;
                    let mut levels = vec![0; sets];
                    reader.get_bytes(&mut levels)?;
                    compatible_profile_levels = Some(levels);
                } else {
                    reader.skip_bytes(ext_length)?;
                }
            }
        }

        let (num, den) = resampling_ratio(usac_frequency)?;

        Ok(Self {
            profile_level_indication,
            sampling_frequency: usac_frequency * num / den,
            standard_frame_samples: output_frame_length * num / den,
            compatible_profile_levels,
        })
    }

    /// RFC 6381 codecs string, e.g. `mhm1.0D`.
    pub fn codecs(&self) -> String {
        format!("mhm1.{:02X}", self.profile_level_indication)
    }

    pub fn format(&self) -> Format {
        let mut format = Format::new(MimeType::MpeghMhm1, self.sampling_frequency)
            .with_codecs(self.codecs());

        if let Some(levels) = self.compatible_profile_levels.as_ref().filter(|l| !l.is_empty()) {
            // The first entry is reserved for the audio specific config.
            format = format.with_initialization_data(vec![Vec::new(), levels.clone()]);
        }

        format
    }
}

/// State carried from one MHAS frame to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MhasStreamState {
    pub standard_frame_samples: u32,
    pub sampling_frequency: u32,
    pub main_stream_label: u64,
}

/// One parsed MHAS frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MhasFrame {
    pub config: Option<Mpegh3daConfig>,
    pub config_changed: bool,
    pub state: MhasStreamState,
    /// Samples after audio truncation.
    pub frame_samples: u32,
    pub frame_bytes: usize,
}

/// Checks whether `data` starts with a complete MHAS frame.
pub fn check_frame(data: &[u8]) -> FrameCheck {
    let mut reader = BsIoSliceReader::from_slice(data);

    loop {
        let header = match MhasPacketHeader::read(&mut reader) {
            Ok(header) => header,
            Err(MhasError::Io(_)) => return FrameCheck::Incomplete,
            Err(e) => {
                trace!("Malformed MHAS packet header: {e}");
                return FrameCheck::Malformed;
            }
        };

        if reader.skip_bytes(header.length as u64).is_err() {
            return FrameCheck::Incomplete;
        }

        if header.packet_type == PACTYP_MPEGH3DAFRAME {
            return match reader.consumed_bytes() {
                Ok(size) => FrameCheck::Complete(size),
                Err(_) => FrameCheck::Incomplete,
            };
        }
    }
}

/// Parses the MHAS frame at the start of `reader`.
pub fn read_frame(reader: &mut BsIoSliceReader, prev: Option<&MhasStreamState>) -> Result<MhasFrame> {
    let mut standard_frame_samples = prev.map(|s| s.standard_frame_samples);
    let mut sampling_frequency = prev.map(|s| s.sampling_frequency);
    let mut main_stream_label = prev.map(|s| s.main_stream_label);

    let mut config: Option<Mpegh3daConfig> = None;
    let mut config_changed = false;
    let mut truncation = None;

    if !reader.is_byte_aligned() {
        return Err(MhasError::NotByteAligned);
    }

    loop {
        let header = MhasPacketHeader::read(reader)?;
        let payload_start = reader.position()?;
        let payload_bits = (header.length as u64) << 3;

        match header.packet_type {
            PACTYP_MPEGH3DACFG => {
                if config.is_some() {
                    return Err(MhasError::SecondConfig);
                }
                if main_stream_label != Some(header.label) {
                    config_changed = true;
                }
                main_stream_label = Some(header.label);

                let parsed = Mpegh3daConfig::read(reader)?;
                sampling_frequency = Some(parsed.sampling_frequency);
                standard_frame_samples = Some(parsed.standard_frame_samples);
                config = Some(parsed);

                let parsed_bits = reader.position()? - payload_start;
                reader.seek(payload_bits as i64 - parsed_bits as i64)?;
            }
            PACTYP_AUDIOTRUNCATION => {
                // isActive
                if reader.get()? {
                    // reserved, truncFromBegin
                    reader.skip_n(2)?;
                    let samples = reader.get_n::<u32>(13)?;
                    match standard_frame_samples {
                        Some(frame_samples) if samples <= frame_samples => {
                            truncation = Some(samples);
                        }
                        frame_samples => {
                            return Err(MhasError::TruncationTooLarge {
                                truncation: samples,
                                frame_samples: frame_samples.unwrap_or(0),
                            });
                        }
                    }
                }

                let parsed_bits = reader.position()? - payload_start;
                reader.seek(payload_bits as i64 - parsed_bits as i64)?;
            }
            PACTYP_MPEGH3DAFRAME => {
                let Some(main) = main_stream_label else {
                    return Err(MhasError::MissingConfig);
                };
                if header.label != main {
                    return Err(MhasError::ForeignFrameLabel {
                        found: header.label,
                        main,
                    });
                }

                reader.skip_bits(payload_bits)?;
            }
            _ => reader.skip_bits(payload_bits)?,
        }

        if !reader.is_byte_aligned() {
            return Err(MhasError::NotByteAligned);
        }

        if header.packet_type == PACTYP_MPEGH3DAFRAME {
            break;
        }
    }

    let (Some(standard_frame_samples), Some(sampling_frequency), Some(main_stream_label)) =
        (standard_frame_samples, sampling_frequency, main_stream_label)
    else {
        return Err(MhasError::MissingConfig);
    };

    Ok(MhasFrame {
        config,
        config_changed,
        state: MhasStreamState {
            standard_frame_samples,
            sampling_frequency,
            main_stream_label,
        },
        frame_samples: standard_frame_samples - truncation.unwrap_or(0),
        frame_bytes: (reader.position()? >> 3) as usize,
    })
}

/// [`ConfigFrameParser`] for MPEG-H MHAS streams.
#[derive(Debug, Default)]
pub struct MhasParser {
    state: Option<MhasStreamState>,
}

impl ConfigFrameParser for MhasParser {
    const SYNC_PATTERN: &'static [u8] = &MHAS_SYNC_PACKET;

    fn check_frame(&self, data: &[u8]) -> FrameCheck {
        check_frame(data)
    }

    fn parse_frame(&mut self, data: &[u8]) -> std::result::Result<ParsedFrame, FrameParseError> {
        let mut reader = BsIoSliceReader::from_slice(data);

        let frame = read_frame(&mut reader, self.state.as_ref()).map_err(|e| FrameParseError {
            consumed: reader.consumed_bytes().unwrap_or(1),
            reason: e.into(),
        })?;

        let format = match &frame.config {
            Some(config) if frame.config_changed => {
                debug!(
                    "mpegh3daConfig: profile {:#04X}, {} Hz, {} samples per frame",
                    config.profile_level_indication,
                    config.sampling_frequency,
                    config.standard_frame_samples
                );
                Some(config.format())
            }
            _ => None,
        };

        self.state = Some(frame.state);

        Ok(ParsedFrame {
            frame_bytes: frame.frame_bytes,
            frame_samples: frame.frame_samples,
            sample_rate: frame.state.sampling_frequency,
            random_access: frame.config.is_some(),
            format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MpeghConfig, mhas_packet, mpegh3da_config};

    #[test]
    fn sync_packet_header() -> anyhow::Result<()> {
        let mut reader = BsIoSliceReader::from_slice(&MHAS_SYNC_PACKET);
        let header = MhasPacketHeader::read(&mut reader)?;
        assert_eq!(
            header,
            MhasPacketHeader {
                packet_type: PACTYP_SYNC,
                label: 0,
                length: 1,
            }
        );
        assert_eq!(reader.position()?, 16);
        Ok(())
    }

    #[test]
    fn packet_label_rules() {
        let packet = mhas_packet(PACTYP_MPEGH3DAFRAME, 0, &[0; 4]);
        let mut reader = BsIoSliceReader::from_slice(&packet);
        assert!(matches!(
            MhasPacketHeader::read(&mut reader),
            Err(MhasError::ZeroPacketLabel(PACTYP_MPEGH3DAFRAME))
        ));

        let packet = mhas_packet(PACTYP_FILLDATA, 0x11, &[0; 4]);
        let mut reader = BsIoSliceReader::from_slice(&packet);
        assert!(matches!(
            MhasPacketHeader::read(&mut reader),
            Err(MhasError::InvalidPacketLabel(0x11))
        ));
    }

    #[test]
    fn config_fields() -> anyhow::Result<()> {
        let payload = mpegh3da_config(&MpeghConfig {
            compatible_set: Some(0x0C),
            ..Default::default()
        });
        let mut reader = BsIoSliceReader::from_slice(&payload);
        let config = Mpegh3daConfig::read(&mut reader)?;

        assert_eq!(config.profile_level_indication, 0x0D);
        assert_eq!(config.sampling_frequency, 48_000);
        assert_eq!(config.standard_frame_samples, 1024);
        assert_eq!(config.compatible_profile_levels, Some(vec![0x0C]));

        let format = config.format();
        assert_eq!(format.codecs.as_deref(), Some("mhm1.0D"));
        assert_eq!(format.initialization_data, vec![vec![], vec![0x0C]]);
        Ok(())
    }

    #[test]
    fn resampled_config() -> anyhow::Result<()> {
        // 32 kHz core at ratio 3/2
        let payload = mpegh3da_config(&MpeghConfig {
            sampling_index: 5,
            ..Default::default()
        });
        let mut reader = BsIoSliceReader::from_slice(&payload);
        let config = Mpegh3daConfig::read(&mut reader)?;
        assert_eq!(config.sampling_frequency, 48_000);
        assert_eq!(config.standard_frame_samples, 1536);
        Ok(())
    }

    #[test]
    fn frame_with_config_and_truncation() -> anyhow::Result<()> {
        let config = mpegh3da_config(&MpeghConfig::default());
        let mut data = MHAS_SYNC_PACKET.to_vec();
        data.extend(mhas_packet(PACTYP_MPEGH3DACFG, 1, &config));
        // active, not from begin, 24 samples
        data.extend(mhas_packet(PACTYP_AUDIOTRUNCATION, 1, &[0x80, 0x18]));
        data.extend(mhas_packet(PACTYP_MPEGH3DAFRAME, 1, &[0x55; 40]));
        let frame_len = data.len();
        data.extend(mhas_packet(PACTYP_MPEGH3DAFRAME, 1, &[0x66; 10]));

        assert_eq!(check_frame(&data), FrameCheck::Complete(frame_len));
        assert_eq!(check_frame(&data[..frame_len - 1]), FrameCheck::Incomplete);

        let mut reader = BsIoSliceReader::from_slice(&data);
        let frame = read_frame(&mut reader, None)?;
        assert!(frame.config_changed);
        assert_eq!(frame.frame_bytes, frame_len);
        assert_eq!(frame.frame_samples, 1000);
        assert_eq!(frame.state.main_stream_label, 1);

        // The next frame inherits the stream state.
        let state = frame.state;
        let mut reader = BsIoSliceReader::from_slice(&data[frame_len..]);
        let frame = read_frame(&mut reader, Some(&state))?;
        assert!(frame.config.is_none());
        assert!(!frame.config_changed);
        assert_eq!(frame.frame_samples, 1024);
        Ok(())
    }

    #[test]
    fn frame_errors() {
        let frame = mhas_packet(PACTYP_MPEGH3DAFRAME, 1, &[0; 8]);
        let mut reader = BsIoSliceReader::from_slice(&frame);
        assert!(matches!(read_frame(&mut reader, None), Err(MhasError::MissingConfig)));

        let state = MhasStreamState {
            standard_frame_samples: 1024,
            sampling_frequency: 48_000,
            main_stream_label: 2,
        };
        let mut reader = BsIoSliceReader::from_slice(&frame);
        assert!(matches!(
            read_frame(&mut reader, Some(&state)),
            Err(MhasError::ForeignFrameLabel { found: 1, main: 2 })
        ));

        let config = mpegh3da_config(&MpeghConfig::default());
        let mut data = mhas_packet(PACTYP_MPEGH3DACFG, 1, &config);
        data.extend(mhas_packet(PACTYP_MPEGH3DACFG, 1, &config));
        data.extend(&frame);
        let mut reader = BsIoSliceReader::from_slice(&data);
        assert!(matches!(read_frame(&mut reader, None), Err(MhasError::SecondConfig)));

        assert_eq!(
            check_frame(&mhas_packet(PACTYP_FILLDATA, 0x12, &[0; 2])),
            FrameCheck::Malformed
        );
    }
}
