use std::path::PathBuf;
use std::sync::LazyLock;

use clap::{Args, Parser as ClapParser, Subcommand, ValueEnum};

static LONG_VERSION: LazyLock<String> = LazyLock::new(|| {
    format!(
        "{} ({})\nesframe {}\nbuilt {}",
        env!("CARGO_PKG_VERSION"),
        option_env!("VERGEN_GIT_DESCRIBE").unwrap_or("unknown"),
        option_env!("ESFRAME_VERSION").unwrap_or("unknown"),
        option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
    )
});

#[derive(Debug, ClapParser)]
#[command(
    name         = env!("CARGO_PKG_NAME"),
    version      = env!("CARGO_PKG_VERSION"),
    long_version = LONG_VERSION.as_str(),
    author       = env!("CARGO_PKG_AUTHORS"),
    about        = "Tools for framing, inspecting and seeking DTS-UHD, AC-4 and MPEG-H audio streams",
    long_about   = None,
)]
pub struct Cli {
    /// Set the log level
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    pub loglevel: LogLevel,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Plain)]
    pub log_format: LogFormat,

    /// Show progress bars during operations.
    #[arg(long, global = true)]
    pub progress: bool,

    /// Choose an operation to perform.
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Split an elementary stream into timestamped frames.
    Frames(FramesArgs),

    /// Decode an AC-4 specific box (dac4) payload.
    Dsi(DsiArgs),

    /// Find the byte offset of a time in an MPEG transport stream.
    Seek(SeekArgs),
}

#[derive(Debug, Args)]
pub struct FramesArgs {
    /// Input elementary stream (use "-" for stdin).
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Codec of the elementary stream.
    #[arg(long, value_enum)]
    pub codec: Codec,

    /// Bytes handed to the reader per call.
    #[arg(long, value_name = "BYTES", default_value_t = 64 * 1024)]
    pub chunk_size: usize,

    /// Print every frame instead of a summary only.
    #[arg(long)]
    pub list: bool,
}

#[derive(Debug, Args)]
pub struct DsiArgs {
    /// File holding the dac4 box payload (use "-" for stdin).
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,
}

#[derive(Debug, Args)]
pub struct SeekArgs {
    /// Input MPEG transport stream.
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// PID of the elementary stream carrying the timestamps.
    #[arg(long, value_name = "PID", value_parser = parse_pid)]
    pub pid: u16,

    /// PID carrying the PCR, used for the duration when the stream has no
    /// PES timestamps.
    #[arg(long, value_name = "PID", value_parser = parse_pid)]
    pub pcr_pid: Option<u16>,

    /// Target time in seconds from the start of the stream.
    #[arg(long, value_name = "SECONDS")]
    pub time: f64,

    /// Bytes sampled per search step.
    #[arg(long, value_name = "BYTES", default_value_t = 600 * 188)]
    pub search_bytes: usize,
}

fn parse_pid(value: &str) -> Result<u16, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => value.parse::<u16>(),
    };

    match parsed {
        Ok(pid) if pid <= 0x1FFF => Ok(pid),
        Ok(pid) => Err(format!("PID {pid:#x} exceeds 0x1FFF")),
        Err(e) => Err(e.to_string()),
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum Codec {
    /// DTS-UHD (DTS:X Profile 2) frames.
    DtsUhd,
    /// AC-4 sync frames.
    Ac4,
    /// MPEG-H 3D Audio in MHAS packets.
    Mpegh,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    /// Disable logging output.
    Off,
    /// No output except errors.
    Error,
    /// Show warnings and errors.
    Warn,
    /// Show info, warnings and errors (default).
    Info,
    /// Show debug, info, warnings and errors.
    Debug,
    /// Show all log messages including trace.
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Colorized human-readable text.
    Plain,
    /// Structured JSON per log record.
    Json,
}

#[test]
fn pid_values() {
    assert_eq!(parse_pid("256"), Ok(256));
    assert_eq!(parse_pid("0x1FF"), Ok(0x1FF));
    assert!(parse_pid("0x2000").is_err());
    assert!(parse_pid("pid").is_err());
}
