#![doc = include_str!("../README.md")]
//!
//! ## Technical Overview
//!
//! ### Frame Readers
//!
//! Both readers implement [`process::ElementaryStreamReader`] and accept input
//! in chunks of any size and alignment.
//!
//! - **Sync frames**: DTS-UHD and AC-4 frames open with a sync word and carry
//!   their own size. [`process::sync_reader::SyncFrameReader`] scans for the
//!   sync word, decodes the header and forwards the payload.
//! - **Config-bearing frames**: MPEG-H MHAS frames are self-delimiting only
//!   once fully buffered, and the stream configuration travels in-band.
//!   [`process::config_reader::ConfigAwareFrameReader`] buffers packets and
//!   waits for a random access point.
//!
//! Corrupted input never surfaces as an error: readers log a warning, drop
//! the offending bytes and search for the next sync point.
//!
//! ### Descriptors
//!
//! [`structs::ac4_dsi::Ac4Dsi`] parses the AC-4 specific box (`dac4`) and
//! derives the track format of the default presentation.
//!
//! ### Seeking
//!
//! [`process::seek::BinarySearchSeeker`] runs an interpolation search over
//! a [`process::seek::SeekSource`], sampling PES timestamps with
//! [`process::seek::TsTimestampSeeker`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use esframe::process::ElementaryStreamReader;
//! use esframe::process::config_reader::ConfigAwareFrameReader;
//! use esframe::process::output::FrameCollector;
//! use esframe::process::PacketFlags;
//! use esframe::structs::mhas::MhasParser;
//!
//! let mut reader = ConfigAwareFrameReader::new(MhasParser::default());
//! let mut output = FrameCollector::default();
//! reader.create_tracks(&mut output);
//!
//! let data = std::fs::read("stream.mhas")?;
//! let flags = PacketFlags {
//!     random_access: true,
//!     data_aligned: false,
//! };
//! reader.packet_started(Some(0), flags);
//! reader.consume(&data, &mut output);
//! reader.packet_finished(&mut output);
//!
//! for format in output.formats() {
//!     println!("{format}");
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Stream readers, output sinks and seeking.
///
/// 1. **Sync Frames** ([`process::sync_reader`]): DTS-UHD and AC-4 framing.
/// 2. **Config-Bearing Frames** ([`process::config_reader`]): MPEG-H framing.
/// 3. **Seeking** ([`process::seek`]): timestamp binary search.
pub mod process;

/// Data structures representing codec and container components.
///
/// - **Track Format** ([`structs::format`])
/// - **DTS-UHD FTOC** ([`structs::dts_uhd`])
/// - **AC-4 Sync Frames** ([`structs::ac4_sync`]) and **DSI** ([`structs::ac4_dsi`])
/// - **MPEG-H MHAS** ([`structs::mhas`])
/// - **Transport Stream** ([`structs::ts`])
pub mod structs;

/// Utility functions and supporting infrastructure.
///
/// - **Bitstream I/O** ([`utils::bitstream_io`]): Bit-level reading
/// - **CRC Validation** ([`utils::crc`]): DTS-UHD header checks
/// - **Error Handling** ([`utils::errors`]): Error types
/// - **Timing** ([`utils::time`]): Time-base conversions
pub mod utils;

#[cfg(test)]
mod testutil;
