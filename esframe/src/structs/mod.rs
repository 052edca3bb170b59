//! Data structures representing codec and container components.
//!
//! Contains the header codecs used by the frame readers, the AC-4 decoder
//! specific information parser, and the transport stream packet helpers used
//! by the seeker.

pub mod ac4_dsi;
pub mod ac4_sync;
pub mod dts_uhd;
pub mod format;
pub mod mhas;
pub mod ts;
