//! Track format descriptions handed to a [`StreamOutput`](crate::process::output::StreamOutput).

use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackType {
    Audio,
}

/// Opaque handle returned by a sink when a track is declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackHandle(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MimeType {
    /// DTS-UHD Profile 2 (DTS:X).
    DtsUhd,
    Ac4,
    /// MPEG-H 3D Audio in MHAS packets.
    MpeghMhm1,
}

impl MimeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MimeType::DtsUhd => "audio/vnd.dts.uhd;profile=p2",
            MimeType::Ac4 => "audio/ac4",
            MimeType::MpeghMhm1 => "audio/mhm1",
        }
    }
}

impl Display for MimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Track metadata. Readers own the current value and push copies to sinks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    pub id: Option<String>,
    pub mime_type: MimeType,
    pub codecs: Option<String>,
    pub channel_count: Option<u32>,
    pub sample_rate: u32,
    pub language: Option<String>,
    pub initialization_data: Vec<Vec<u8>>,
}

impl Format {
    pub fn new(mime_type: MimeType, sample_rate: u32) -> Self {
        Self {
            id: None,
            mime_type,
            codecs: None,
            channel_count: None,
            sample_rate,
            language: None,
            initialization_data: Vec::new(),
        }
    }

    pub fn with_channel_count(mut self, channel_count: u32) -> Self {
        self.channel_count = Some(channel_count);
        self
    }

    pub fn with_codecs(mut self, codecs: impl Into<String>) -> Self {
        self.codecs = Some(codecs.into());
        self
    }

    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    pub fn with_id(mut self, id: Option<String>) -> Self {
        self.id = id;
        self
    }

    pub fn with_initialization_data(mut self, data: Vec<Vec<u8>>) -> Self {
        self.initialization_data = data;
        self
    }

    /// Whether `other` describes a different decoder setup: channel count,
    /// sample rate or codec identity.
    pub fn layout_differs(&self, other: &Format) -> bool {
        self.channel_count != other.channel_count
            || self.sample_rate != other.sample_rate
            || self.mime_type != other.mime_type
    }
}

impl Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.mime_type)?;
        if let Some(codecs) = &self.codecs {
            write!(f, " ({codecs})")?;
        }
        if let Some(channels) = self.channel_count {
            write!(f, ", {channels} ch")?;
        }
        write!(f, ", {} Hz", self.sample_rate)?;
        if let Some(language) = &self.language {
            write!(f, ", {language}")?;
        }
        Ok(())
    }
}

#[test]
fn layout_comparison() {
    let a = Format::new(MimeType::DtsUhd, 48_000).with_channel_count(2);
    let b = a.clone().with_language(Some("eng".into()));
    assert!(!a.layout_differs(&b));

    let c = Format::new(MimeType::DtsUhd, 96_000).with_channel_count(2);
    assert!(a.layout_differs(&c));

    let d = Format::new(MimeType::Ac4, 48_000).with_channel_count(2);
    assert!(a.layout_differs(&d));
    assert_eq!(d.to_string(), "audio/ac4, 2 ch, 48000 Hz");
}
