use std::fs::File;
use std::io::BufReader;

use anyhow::{Result, bail};
use indicatif::MultiProgress;

use super::command::{Cli, SeekArgs};
use crate::timestamp::time_str;
use esframe::process::seek::{
    BinarySearchSeeker, ReaderSource, TimestampClock, TsDurationReader, TsSeekConfig, TsTimestampSeeker,
};

pub fn cmd_seek(args: &SeekArgs, _cli: &Cli, _multi: Option<&MultiProgress>) -> Result<()> {
    if !args.time.is_finite() {
        bail!("Invalid target time {}", args.time);
    }

    log::info!(
        "Seeking PID {:#x} of {} to {}",
        args.pid,
        args.input.display(),
        time_str(args.time.max(0.0))
    );

    let mut source = ReaderSource::new(BufReader::new(File::open(&args.input)?));

    let duration_reader = TsDurationReader::new(args.search_bytes);
    let mut duration = duration_reader.read_duration(&mut source, args.pid)?;
    if duration.is_none()
        && let Some(pcr_pid) = args.pcr_pid
        && pcr_pid != args.pid
    {
        duration = duration_reader.read_pcr_duration(&mut source, pcr_pid)?;
    }

    let Some(duration) = duration else {
        bail!("No timestamps found for PID {:#x}", args.pid);
    };

    log::info!(
        "Stream duration: {} (first {:?} timestamp {})",
        time_str(duration.duration_us as f64 / 1e6),
        duration.clock,
        duration.first_timestamp
    );
    if duration.clock == TimestampClock::Pcr {
        log::warn!("PID {:#x} carries no PES timestamps, the seek position is approximate", args.pid);
    }

    let config = TsSeekConfig::default().with_timestamp_search_bytes(args.search_bytes);
    let timestamp_seeker =
        TsTimestampSeeker::new(args.pid, config).with_base_timestamp(duration.first_timestamp);
    let mut seeker = BinarySearchSeeker::new(timestamp_seeker, duration.duration_us);

    let target_us = (args.time * 1e6) as i64;
    let outcome = seeker.seek(&mut source, target_us)?;

    println!("Seek Result:");
    println!("  Target: {}", time_str(target_us.clamp(0, duration.duration_us) as f64 / 1e6));
    println!("  Duration: {}", time_str(duration.duration_us as f64 / 1e6));
    println!("  Byte offset: {}", outcome.position);
    println!("  Exact: {}", if outcome.exact { "yes" } else { "no" });

    Ok(())
}
