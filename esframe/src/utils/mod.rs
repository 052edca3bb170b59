//! Utility functions and supporting infrastructure.
//!
//! Provides bitstream I/O, CRC validation, error types and time-base
//! conversions used by the stream readers and the seeker.

pub mod bitstream_io;
pub mod crc;
pub mod errors;
pub mod time;
