use anyhow::Result;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use super::command::{Cli, Codec, FramesArgs};
use crate::input::InputReader;
use crate::timestamp::time_str;
use esframe::process::{
    ElementaryStreamReader, PacketFlags,
    config_reader::ConfigAwareFrameReader,
    output::StreamOutput,
    sync_reader::SyncFrameReader,
};
use esframe::structs::{
    ac4_sync::Ac4SyncCodec,
    dts_uhd::DtsUhdCodec,
    format::{Format, TrackHandle, TrackType},
    mhas::MhasParser,
};

pub fn cmd_frames(args: &FramesArgs, _cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    log::info!("Reading {:?} frames from {}", args.codec, args.input.display());

    let mut reader: Box<dyn ElementaryStreamReader> = match args.codec {
        Codec::DtsUhd => Box::new(SyncFrameReader::new(DtsUhdCodec::default())),
        Codec::Ac4 => Box::new(SyncFrameReader::new(Ac4SyncCodec)),
        Codec::Mpegh => Box::new(ConfigAwareFrameReader::new(MhasParser::default())),
    };

    let mut report = FrameReport::new(args.list);

    if let Some(multi) = multi {
        let pb = multi.add(ProgressBar::new_spinner());
        pb.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb.set_message("Reading frames...");
        report.pb = Some(pb);
    }

    reader.create_tracks(&mut report);

    let chunk_size = args.chunk_size.max(1);
    let mut input_reader = InputReader::new(&args.input)?;

    if args.codec == Codec::Mpegh {
        // MHAS frames are only extracted when a packet ends, so every chunk
        // is presented as one packet.
        let flags = PacketFlags {
            random_access: true,
            data_aligned: false,
        };
        let mut time_us = Some(0);
        input_reader.process_chunks(chunk_size, |chunk| {
            report.total_bytes += chunk.len();
            reader.packet_started(time_us.take(), flags);
            reader.consume(chunk, &mut report);
            reader.packet_finished(&mut report);
            Ok(true)
        })?;
    } else {
        reader.packet_started(Some(0), PacketFlags::default());
        input_reader.process_chunks(chunk_size, |chunk| {
            report.total_bytes += chunk.len();
            reader.consume(chunk, &mut report);
            Ok(true)
        })?;
        reader.packet_finished(&mut report);
    }

    if let Some(pb) = report.pb.take() {
        pb.finish_and_clear();
    }

    report.print_summary();

    Ok(())
}

/// Sink that tallies frames instead of keeping them.
#[derive(Default)]
struct FrameReport {
    list: bool,
    tracks: usize,
    formats: Vec<Format>,
    frame_count: u64,
    key_frame_count: u64,
    frame_bytes: u64,
    total_bytes: usize,
    first_time_us: Option<i64>,
    last_time_us: Option<i64>,
    pb: Option<ProgressBar>,
}

impl FrameReport {
    fn new(list: bool) -> Self {
        Self {
            list,
            ..Default::default()
        }
    }

    fn print_summary(&self) {
        if self.frame_count == 0 {
            println!("No frames found in {} bytes of input.", self.total_bytes);
            return;
        }

        println!("Stream Information:");
        for (index, format) in self.formats.iter().enumerate() {
            println!("  Format {index}: {format}");
            if let Some(id) = &format.id {
                println!("    ID: {id}");
            }
            for (n, data) in format.initialization_data.iter().enumerate() {
                println!("    Initialization data {n}: {} bytes", data.len());
            }
        }

        let first = self.first_time_us.unwrap_or(0);
        let last = self.last_time_us.unwrap_or(0);
        println!("  Frames: {} ({} key frames)", self.frame_count, self.key_frame_count);
        println!("  Frame bytes: {} of {} read", self.frame_bytes, self.total_bytes);
        println!(
            "  Time span: {} - {}",
            time_str(first as f64 / 1e6),
            time_str(last as f64 / 1e6)
        );
    }
}

impl StreamOutput for FrameReport {
    fn declare_track(&mut self, _track_type: TrackType) -> TrackHandle {
        self.tracks += 1;
        TrackHandle(self.tracks - 1)
    }

    fn emit_format(&mut self, _track: TrackHandle, format: Format) {
        log::info!("Format: {format}");
        self.formats.push(format);
    }

    fn emit_payload(&mut self, _track: TrackHandle, _bytes: &[u8]) {}

    fn emit_frame_boundary(&mut self, _track: TrackHandle, time_us: i64, key_frame: bool, size: usize) {
        self.frame_count += 1;
        self.frame_bytes += size as u64;
        if key_frame {
            self.key_frame_count += 1;
        }
        self.first_time_us.get_or_insert(time_us);
        self.last_time_us = Some(time_us);

        if self.list {
            println!(
                "{:>8} {} {:>6} bytes{}",
                self.frame_count - 1,
                time_str(time_us as f64 / 1e6),
                size,
                if key_frame { " key" } else { "" }
            );
        }

        if let Some(pb) = &self.pb
            && self.frame_count % 100 == 0
        {
            pb.set_message(format!(
                "Frame {} at {}",
                self.frame_count,
                time_str(time_us as f64 / 1e6)
            ));
        }
    }
}
