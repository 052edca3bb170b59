use serde::Serialize;

use esframe::structs::ac4_dsi::{Ac4Dsi, Ac4Presentation, channel_mode_name};

/// YAML view of a decoded dac4 payload.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DsiReport {
    dsi_version: u8,
    bitstream_version: u8,
    sample_rate: u32,
    frame_rate_index: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    program_id: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    format: Option<String>,
    presentations: Vec<PresentationReport>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PresentationReport {
    version: u8,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    skipped: bool,
    level: u8,
    content_classifier: String,
    channel_coded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    channel_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    objects: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    channels: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    group_index: Option<u8>,
    pre_virtualized: bool,
}

impl PresentationReport {
    fn new(index: usize, presentation: &Ac4Presentation) -> Self {
        let channels = match presentation.channel_count(index) {
            Ok(count) => Some(count),
            Err(e) => {
                log::debug!("No channel count for presentation {index}: {e}");
                None
            }
        };

        Self {
            version: presentation.version,
            skipped: presentation.skipped,
            level: presentation.level,
            content_classifier: format!("{:?}", presentation.content_classifier),
            channel_coded: presentation.channel_coded,
            channel_mode: presentation
                .channel_mode
                .map(|mode| channel_mode_name(mode).to_string()),
            objects: presentation.umx_objects,
            channels,
            language: presentation.language.clone(),
            group_index: presentation.group_index,
            pre_virtualized: presentation.pre_virtualized,
        }
    }
}

impl DsiReport {
    pub fn new(dsi: &Ac4Dsi) -> Self {
        let format = match dsi.format() {
            Ok(format) => Some(format.to_string()),
            Err(e) => {
                log::warn!("Cannot derive a track format: {e}");
                None
            }
        };

        Self {
            dsi_version: dsi.version,
            bitstream_version: dsi.bitstream_version,
            sample_rate: dsi.sample_rate,
            frame_rate_index: dsi.frame_rate_index,
            program_id: dsi.program_id,
            format,
            presentations: dsi
                .presentations
                .iter()
                .enumerate()
                .map(|(index, presentation)| PresentationReport::new(index, presentation))
                .collect(),
        }
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml_ng::to_string(self)?)
    }
}
