use anyhow::Result;
use clap::Parser as ClapParser;
use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;

use cli::command::{Cli, Commands, LogFormat};
use cli::dsi::cmd_dsi;
use cli::frames::cmd_frames;
use cli::seek::cmd_seek;

mod cli;
mod input;
mod report;
pub(crate) mod timestamp;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let base_level = cli.loglevel.to_level_filter();

    let multi = MultiProgress::new();

    let mut env_builder = env_logger::Builder::from_default_env();
    env_builder.filter_level(base_level);
    match cli.log_format {
        LogFormat::Plain => {
            env_builder.format_timestamp_secs();
        }
        LogFormat::Json => {
            env_builder.format(|buf, record| {
                use std::io::Write;
                let line = json_record(&buf.timestamp().to_string(), record.level(), &record.args().to_string());
                writeln!(buf, "{line}")
            });
        }
    }

    let pb = if cli.progress {
        let logger = env_builder.build();
        LogWrapper::new(multi.clone(), logger).try_init()?;
        Some(&multi)
    } else {
        env_builder.try_init()?;
        None
    };

    match cli.command {
        Commands::Frames(ref args) => cmd_frames(args, &cli, pb)?,
        Commands::Dsi(ref args) => cmd_dsi(args, &cli, pb)?,
        Commands::Seek(ref args) => cmd_seek(args, &cli, pb)?,
    }

    Ok(())
}

/// One JSON log line.
fn json_record(ts: &str, level: log::Level, msg: &str) -> String {
    serde_json::json!({
        "ts": ts,
        "lvl": level.as_str(),
        "msg": msg,
    })
    .to_string()
}

#[test]
fn json_record_escaping() -> Result<()> {
    let line = json_record("2026-01-01T00:00:00Z", log::Level::Warn, "bad \"header\"\nat C:\\in");
    assert!(!line.contains('\n'));

    let value: serde_json::Value = serde_json::from_str(&line)?;
    assert_eq!(value["lvl"], "WARN");
    assert_eq!(value["msg"], "bad \"header\"\nat C:\\in");
    assert_eq!(value["ts"], "2026-01-01T00:00:00Z");
    Ok(())
}
