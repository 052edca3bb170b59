//! AC-4 decoder specific information (`ac4_dsi` / `ac4_dsi_v1`).
//!
//! The DSI is carried in the container's AC-4 specific box rather than in
//! the elementary stream. It lists presentations, each made of substreams
//! (`ac4_dsi`) or substream groups (`ac4_dsi_v1`). The track format is
//! derived from the first presentation.

use log::{debug, warn};

use crate::structs::format::{Format, MimeType};
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::DsiError;

type Result<T> = std::result::Result<T, DsiError>;

const LANGUAGE_TAG_BYTES_MIN: u8 = 2;
const LANGUAGE_TAG_BYTES_MAX: u8 = 41;

/// `presentation_config` value of a single substream group in `ac4_dsi_v1`.
const SINGLE_SUBSTREAM_GROUP_CONFIG: u8 = 0x1F;
/// `presentation_config` of presentations made only of EMDF substreams.
const EMDF_ONLY_CONFIG: u8 = 6;

const CHANNEL_MODE_NAMES: [&str; 16] = [
    "Mono",
    "Stereo",
    "3.0",
    "5.0",
    "5.1",
    "7.0 (3/4/0)",
    "7.1 (3/4/0.1)",
    "7.0 (5/2/0)",
    "7.1 (5/2/0.1)",
    "7.0 (3/2/2)",
    "7.1 (3/2/2.1)",
    "7.0.4",
    "7.1.4",
    "9.0.4",
    "9.1.4",
    "22.2",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContentClassifier {
    CompleteMain = 0,
    MusicAndEffects = 1,
    VisuallyImpaired = 2,
    HearingImpaired = 3,
    Dialog = 4,
    Commentary = 5,
    Emergency = 6,
    Voiceover = 7,
}

impl From<u8> for ContentClassifier {
    fn from(value: u8) -> Self {
        match value & 0x7 {
            0 => ContentClassifier::CompleteMain,
            1 => ContentClassifier::MusicAndEffects,
            2 => ContentClassifier::VisuallyImpaired,
            3 => ContentClassifier::HearingImpaired,
            4 => ContentClassifier::Dialog,
            5 => ContentClassifier::Commentary,
            6 => ContentClassifier::Emergency,
            _ => ContentClassifier::Voiceover,
        }
    }
}

/// Display name of an AC-4 `channel_mode`.
pub fn channel_mode_name(mode: u8) -> &'static str {
    CHANNEL_MODE_NAMES
        .get(mode as usize)
        .copied()
        .unwrap_or("Reserved")
}

/// Speaker count for a presentation channel mode.
///
/// Modes 7.0.4 through 9.1.4 lose two channels without the back pair and two
/// or four channels with fewer than two top pairs.
pub fn channel_count_for_mode(mode: u8, back_channels_present: bool, top_channel_pairs: u8) -> Result<u32> {
    let mut count = match mode {
        0 => 1,
        1 => 2,
        2 => 3,
        3 => 5,
        4 => 6,
        5 | 7 | 9 => 7,
        6 | 8 | 10 => 8,
        11 => 11,
        12 => 12,
        13 => 13,
        14 => 14,
        15 => 24,
        _ => return Err(DsiError::InvalidChannelMode(mode)),
    };

    if (11..=14).contains(&mode) {
        if !back_channels_present {
            count -= 2;
        }
        match top_channel_pairs {
            0 => count -= 4,
            1 => count -= 2,
            2 => {}
            pairs => warn!("Invalid top channel pair count {pairs}"),
        }
    }

    Ok(count)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ac4Presentation {
    pub version: u8,
    /// `mdcompat`
    pub level: u8,
    pub content_classifier: ContentClassifier,
    pub channel_coded: bool,
    pub channel_mode: Option<u8>,
    pub umx_objects: Option<u32>,
    pub back_channels_present: bool,
    pub top_channel_pairs: u8,
    pub program_id: Option<u16>,
    pub group_index: Option<u8>,
    pub pre_virtualized: bool,
    pub language: Option<String>,
    pub description: Option<Vec<u8>>,
    /// Presentation version unknown to this parser; only its size was read.
    pub skipped: bool,
}

impl Ac4Presentation {
    fn new(version: u8, program_id: Option<u16>) -> Self {
        Self {
            version,
            level: 0,
            content_classifier: ContentClassifier::CompleteMain,
            channel_coded: true,
            channel_mode: None,
            umx_objects: None,
            back_channels_present: true,
            top_channel_pairs: 2,
            program_id,
            group_index: None,
            pre_virtualized: false,
            language: None,
            description: None,
            skipped: false,
        }
    }

    /// Channel count of the presentation, from its channel mode or object count.
    pub fn channel_count(&self, index: usize) -> Result<u32> {
        let count = if self.channel_coded {
            let Some(mode) = self.channel_mode else {
                return Err(DsiError::UnknownChannelMode(index));
            };
            channel_count_for_mode(mode, self.back_channels_present, self.top_channel_pairs)? as i32
        } else {
            let objects = self.umx_objects.map_or(-1, |n| n as i32);
            // Level 4 encoders signal 16 objects for a 21 object bed.
            if self.level == 4 && objects == 16 { 21 } else { objects }
        };

        if count <= 0 {
            return Err(DsiError::InvalidChannelCount(count));
        }

        Ok(count as u32)
    }
}

/// Parsed AC-4 specific box payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ac4Dsi {
    pub version: u8,
    pub bitstream_version: u8,
    pub sample_rate: u32,
    pub frame_rate_index: u8,
    pub program_id: Option<u16>,
    pub presentations: Vec<Ac4Presentation>,
}

/// Fields that open a presentation and select the shape of the rest.
#[derive(Debug, Clone, Copy)]
struct PresentationHeader {
    dsi_version: u8,
    version: u8,
    config: u8,
    single_substream_group: bool,
}

fn skip_bitrate_info(reader: &mut BsIoSliceReader) -> Result<()> {
    // bit_rate_mode, bit_rate, bit_rate_precision
    reader.skip_bits(2 + 32 + 32)?;
    Ok(())
}

fn read_language_tag(reader: &mut BsIoSliceReader, presentation: usize) -> Result<String> {
    let length = reader.get_n::<u8>(6)?;
    if !(LANGUAGE_TAG_BYTES_MIN..=LANGUAGE_TAG_BYTES_MAX).contains(&length) {
        return Err(DsiError::InvalidLanguageTag {
            presentation,
            length,
        });
    }

    let mut tag = vec![0; length as usize];
    reader.get_bytes(&mut tag)?;

    Ok(String::from_utf8_lossy(&tag).into_owned())
}

/// `ac4_substream_dsi()`
fn read_substream(reader: &mut BsIoSliceReader, p: &mut Ac4Presentation, index: usize) -> Result<()> {
    let channel_mode = reader.get_n::<u8>(5)?;
    debug!("Presentation {index}: substream channel mode {}", channel_mode_name(channel_mode));

    // dsi_sf_multiplier
    reader.skip_n(2)?;
    if reader.get()? {
        reader.skip_n(5)?;
    }
    if (7..=10).contains(&channel_mode) {
        // add_ch_base
        reader.skip_n(1)?;
    }

    if reader.get()? {
        let classifier = reader.get_n::<u8>(3)?;

        // Without a presentation level channel mode, the complete main or
        // music and effects substream defines it.
        if p.channel_mode.is_none() && classifier <= 1 {
            p.channel_mode = Some(channel_mode);
        }
        p.content_classifier = classifier.into();

        if reader.get()? {
            p.language = Some(read_language_tag(reader, index)?);
        }
    }

    Ok(())
}

/// `ac4_substream_group_dsi()`
fn read_substream_group(reader: &mut BsIoSliceReader, p: &mut Ac4Presentation, index: usize) -> Result<()> {
    // b_substreams_present, b_hsf_ext
    reader.skip_n(2)?;
    let channel_coded = reader.get()?;
    let substreams = reader.get_n::<u8>(8)?;

    for _ in 0..substreams {
        // dsi_sf_multiplier
        reader.skip_n(2)?;
        if reader.get()? {
            reader.skip_n(5)?;
        }

        if channel_coded {
            // dsi_substream_channel_mask
            reader.skip_n(24)?;
        } else {
            // b_ajoc
            if reader.get()? {
                // b_static_dmx
                if !reader.get()? {
                    reader.skip_n(4)?;
                }
                p.umx_objects = Some(reader.get_n::<u32>(6)? + 1);
            }
            // objects_assignment_mask
            reader.skip_n(4)?;
        }
    }

    if reader.get()? {
        p.content_classifier = reader.get_n::<u8>(3)?.into();
        if reader.get()? {
            p.language = Some(read_language_tag(reader, index)?);
        }
    }

    Ok(())
}

fn read_substream_blocks(
    reader: &mut BsIoSliceReader,
    p: &mut Ac4Presentation,
    header: &PresentationHeader,
    index: usize,
    count: usize,
) -> Result<()> {
    for _ in 0..count {
        if header.version == 0 {
            read_substream(reader, p, index)?;
        } else {
            read_substream_group(reader, p, index)?;
        }
    }

    Ok(())
}

/// Presentation level channel information of `ac4_presentation_v1_dsi()`.
fn read_channel_info_v1(reader: &mut BsIoSliceReader, p: &mut Ac4Presentation) -> Result<()> {
    let extended = matches!(p.version, 1 | 2);

    p.channel_coded = p.version == 0 || reader.get()?;
    if p.channel_coded {
        if extended {
            let mode = reader.get_n::<u8>(5)?;
            p.channel_mode = Some(mode);

            if (11..=14).contains(&mode) {
                p.back_channels_present = reader.get()?;
                p.top_channel_pairs = reader.get_n::<u8>(2)?;
            }
        }
        // presentation_channel_mask_v1
        reader.skip_n(24)?;
    }

    if extended {
        // b_presentation_core_differs
        if reader.get()? && reader.get()? {
            reader.skip_n(2)?;
        }

        // b_presentation_filter
        if reader.get()? {
            // b_enable_presentation
            reader.skip_n(1)?;
            let filter_bytes = reader.get_n::<u64>(8)?;
            reader.skip_bytes(filter_bytes)?;
        }
    }

    Ok(())
}

/// Everything after `presentation_config`, up to the trailing byte alignment.
fn read_presentation_body(
    reader: &mut BsIoSliceReader,
    header: &PresentationHeader,
    p: &mut Ac4Presentation,
    index: usize,
) -> Result<()> {
    let add_emdf_substreams =
        if !header.single_substream_group && header.config == EMDF_ONLY_CONFIG {
            true
        } else {
            p.level = reader.get_n::<u8>(3)?;

            if reader.get()? {
                p.group_index = Some(reader.get_n::<u8>(5)?);
            }

            // dsi_frame_rate_multiply_info
            reader.skip_n(2)?;
            if header.dsi_version == 1 && matches!(header.version, 1 | 2) {
                // dsi_frame_rate_fraction_info
                reader.skip_n(2)?;
            }
            // presentation_emdf_version, presentation_key_id
            reader.skip_n(5 + 10)?;

            if header.dsi_version == 1 {
                read_channel_info_v1(reader, p)?;
            }

            if header.single_substream_group {
                read_substream_blocks(reader, p, header, index, 1)?;
            } else {
                // b_multi_pid or b_hsf_ext
                reader.skip_n(1)?;

                match header.config {
                    0..=2 => read_substream_blocks(reader, p, header, index, 2)?,
                    3 | 4 => read_substream_blocks(reader, p, header, index, 3)?,
                    5 if header.version == 0 => read_substream_blocks(reader, p, header, index, 1)?,
                    5 => {
                        let groups = reader.get_n::<u32>(3)? as usize + 2;
                        read_substream_blocks(reader, p, header, index, groups)?;
                    }
                    _ => {
                        let skip_bytes = reader.get_n::<u64>(7)?;
                        reader.skip_bytes(skip_bytes)?;
                    }
                }
            }

            p.pre_virtualized = reader.get()?;
            reader.get()?
        };

    if add_emdf_substreams {
        let substreams = reader.get_n::<u64>(7)?;
        // substream_emdf_version, substream_key_id
        reader.skip_bits(substreams * (5 + 10))?;
    }

    if header.version > 0 {
        // b_presentation_bitrate_info
        if reader.get()? {
            skip_bitrate_info(reader)?;
        }

        // b_alternative
        if reader.get()? {
            reader.byte_align();
            let name_len = reader.get_n::<u32>(16)? as usize;
            let mut name = vec![0; name_len];
            reader.get_bytes(&mut name)?;
            p.description = Some(name);

            // target_md_compat, target_device_category
            let targets = reader.get_n::<u64>(5)?;
            reader.skip_bits(targets * (3 + 8))?;
        }
    }

    reader.byte_align();
    Ok(())
}

/// `ac4_presentation_v0_dsi()` inside an `ac4_dsi`.
fn read_presentation_v0(reader: &mut BsIoSliceReader, index: usize, program_id: Option<u16>) -> Result<Ac4Presentation> {
    let single_substream = reader.get()?;
    let config = reader.get_n::<u8>(5)?;
    let version = reader.get_n::<u8>(5)?;

    let header = PresentationHeader {
        dsi_version: 0,
        version,
        config,
        single_substream_group: single_substream,
    };
    let mut p = Ac4Presentation::new(version, program_id);
    read_presentation_body(reader, &header, &mut p, index)?;

    Ok(p)
}

/// A presentation inside an `ac4_dsi_v1`, sized by `pres_bytes`.
fn read_presentation_v1(reader: &mut BsIoSliceReader, index: usize, program_id: Option<u16>) -> Result<Ac4Presentation> {
    let version = reader.get_n::<u8>(8)?;
    let mut pres_bytes = reader.get_n::<u32>(8)?;
    if pres_bytes == 0xFF {
        pres_bytes += reader.get_n::<u32>(16)?;
    }

    let mut p = Ac4Presentation::new(version, program_id);
    if version > 2 {
        debug!("Skipping presentation {index} with version {version}");
        reader.skip_bytes(pres_bytes as u64)?;
        p.skipped = true;
        return Ok(p);
    }

    let start = reader.position()? / 8;

    let config = reader.get_n::<u8>(5)?;
    let header = PresentationHeader {
        dsi_version: 1,
        version,
        config,
        single_substream_group: config == SINGLE_SUBSTREAM_GROUP_CONFIG,
    };
    read_presentation_body(reader, &header, &mut p, index)?;

    let parsed = reader.position()? / 8 - start;
    if parsed > pres_bytes as u64 {
        return Err(DsiError::PresentationOverrun {
            presentation: index,
            declared: pres_bytes,
            parsed,
        });
    }
    reader.skip_bytes(pres_bytes as u64 - parsed)?;

    Ok(p)
}

impl Ac4Dsi {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = BsIoSliceReader::from_slice(data);

        let version = reader.get_n::<u8>(3)?;
        if version > 1 {
            return Err(DsiError::UnsupportedVersion(version));
        }

        let bitstream_version = reader.get_n::<u8>(7)?;
        let sample_rate = if reader.get()? { 48_000 } else { 44_100 };
        let frame_rate_index = reader.get_n::<u8>(4)?;
        let n_presentations = reader.get_n::<u32>(9)? as usize;

        let mut program_id = None;
        if bitstream_version > 1 {
            if version == 0 {
                return Err(DsiError::VersionMismatch {
                    dsi_version: version,
                    bitstream_version,
                });
            }

            if reader.get()? {
                program_id = Some(reader.get_n::<u16>(16)?);
                // b_uuid
                if reader.get()? {
                    reader.skip_bytes(16)?;
                }
            }
        }

        if version == 1 {
            skip_bitrate_info(&mut reader)?;
            reader.byte_align();
        }

        if n_presentations == 0 {
            return Err(DsiError::NoPresentations);
        }

        let mut presentations = Vec::with_capacity(n_presentations);
        for index in 0..n_presentations {
            let p = match version {
                0 => read_presentation_v0(&mut reader, index, program_id)?,
                _ => read_presentation_v1(&mut reader, index, program_id)?,
            };

            if !p.skipped && p.channel_coded && p.channel_mode.is_none() {
                return Err(DsiError::UnknownChannelMode(index));
            }

            presentations.push(p);
        }

        Ok(Self {
            version,
            bitstream_version,
            sample_rate,
            frame_rate_index,
            program_id,
            presentations,
        })
    }

    /// Track format described by the default (first) presentation.
    pub fn format(&self) -> Result<Format> {
        let presentation = self.presentations.first().ok_or(DsiError::NoPresentations)?;
        let channel_count = presentation.channel_count(0)?;

        Ok(Format::new(MimeType::Ac4, self.sample_rate)
            .with_channel_count(channel_count)
            .with_language(presentation.language.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{DsiPresentation, ac4_dsi_v0, ac4_dsi_v1};

    #[test]
    fn channel_mode_table() {
        assert_eq!(channel_count_for_mode(4, true, 2).ok(), Some(6));
        assert_eq!(channel_count_for_mode(12, true, 2).ok(), Some(12));
        assert_eq!(channel_count_for_mode(12, false, 1).ok(), Some(8));
        assert_eq!(channel_count_for_mode(14, true, 0).ok(), Some(10));
        // back/top flags only matter for the height layouts
        assert_eq!(channel_count_for_mode(6, false, 0).ok(), Some(8));
        // unknown top pair counts are reported but not fatal
        assert_eq!(channel_count_for_mode(13, true, 3).ok(), Some(13));

        assert!(matches!(
            channel_count_for_mode(16, true, 2),
            Err(DsiError::InvalidChannelMode(16))
        ));
    }

    #[test]
    fn v1_channel_based() -> anyhow::Result<()> {
        let data = ac4_dsi_v1(&[DsiPresentation {
            channel_mode: Some(12),
            language: Some("en"),
            trailing_bytes: 3,
            ..Default::default()
        }]);

        let dsi = Ac4Dsi::parse(&data)?;
        assert_eq!(dsi.version, 1);
        assert_eq!(dsi.bitstream_version, 2);
        assert_eq!(dsi.program_id, Some(0x1234));
        assert_eq!(dsi.presentations.len(), 1);

        let p = &dsi.presentations[0];
        assert_eq!(p.channel_mode, Some(12));
        assert_eq!(p.language.as_deref(), Some("en"));
        assert_eq!(p.content_classifier, ContentClassifier::CompleteMain);

        let format = dsi.format()?;
        assert_eq!(format.channel_count, Some(12));
        assert_eq!(format.sample_rate, 48_000);
        assert_eq!(format.mime_type, MimeType::Ac4);
        assert_eq!(format.language.as_deref(), Some("en"));
        Ok(())
    }

    #[test]
    fn v1_reduced_height_layout() -> anyhow::Result<()> {
        let data = ac4_dsi_v1(&[DsiPresentation {
            channel_mode: Some(12),
            back_channels_present: false,
            top_channel_pairs: 1,
            ..Default::default()
        }]);

        assert_eq!(Ac4Dsi::parse(&data)?.format()?.channel_count, Some(8));
        Ok(())
    }

    #[test]
    fn v1_object_based_level4() -> anyhow::Result<()> {
        let data = ac4_dsi_v1(&[DsiPresentation {
            channel_mode: None,
            umx_objects: 16,
            level: 4,
            ..Default::default()
        }]);

        let dsi = Ac4Dsi::parse(&data)?;
        assert!(!dsi.presentations[0].channel_coded);
        assert_eq!(dsi.presentations[0].umx_objects, Some(16));
        assert_eq!(dsi.format()?.channel_count, Some(21));

        let data = ac4_dsi_v1(&[DsiPresentation {
            channel_mode: None,
            umx_objects: 16,
            level: 3,
            ..Default::default()
        }]);
        assert_eq!(Ac4Dsi::parse(&data)?.format()?.channel_count, Some(16));
        Ok(())
    }

    #[test]
    fn v1_multiple_presentations() -> anyhow::Result<()> {
        let data = ac4_dsi_v1(&[
            DsiPresentation {
                channel_mode: Some(4),
                ..Default::default()
            },
            DsiPresentation {
                channel_mode: Some(1),
                language: Some("de"),
                ..Default::default()
            },
        ]);

        let dsi = Ac4Dsi::parse(&data)?;
        assert_eq!(dsi.presentations.len(), 2);
        assert_eq!(dsi.presentations[1].language.as_deref(), Some("de"));
        assert_eq!(dsi.format()?.channel_count, Some(6));
        Ok(())
    }

    #[test]
    fn v0_substream_channel_mode() -> anyhow::Result<()> {
        let data = ac4_dsi_v0(4, Some("fra"));

        let dsi = Ac4Dsi::parse(&data)?;
        assert_eq!(dsi.version, 0);
        assert_eq!(dsi.program_id, None);
        assert_eq!(dsi.presentations[0].channel_mode, Some(4));
        assert_eq!(dsi.presentations[0].language.as_deref(), Some("fra"));
        assert_eq!(dsi.format()?.channel_count, Some(6));
        Ok(())
    }

    #[test]
    fn truncated_descriptors_fail() {
        let data = ac4_dsi_v1(&[DsiPresentation {
            channel_mode: Some(12),
            language: Some("en"),
            ..Default::default()
        }]);
        for len in 0..data.len() {
            assert!(Ac4Dsi::parse(&data[..len]).is_err(), "prefix of {len} bytes");
        }

        let data = ac4_dsi_v0(1, None);
        for len in 0..data.len() {
            assert!(Ac4Dsi::parse(&data[..len]).is_err(), "prefix of {len} bytes");
        }
    }

    #[test]
    fn structural_errors() {
        // ac4_dsi_version 2
        assert!(matches!(
            Ac4Dsi::parse(&[0x40, 0, 0, 0]),
            Err(DsiError::UnsupportedVersion(2))
        ));

        // ac4_dsi_version 0 with bitstream_version 2
        assert!(matches!(
            Ac4Dsi::parse(&[0x00, 0x80, 0x00, 0x80, 0x00]),
            Err(DsiError::VersionMismatch { .. })
        ));

        // n_presentations 0
        assert!(matches!(
            Ac4Dsi::parse(&[0x00, 0x40, 0x00, 0x00]),
            Err(DsiError::NoPresentations)
        ));

        let data = ac4_dsi_v1(&[DsiPresentation {
            channel_mode: Some(1),
            language: Some("x"),
            ..Default::default()
        }]);
        assert!(matches!(
            Ac4Dsi::parse(&data),
            Err(DsiError::InvalidLanguageTag { presentation: 0, length: 1 })
        ));
    }
}
