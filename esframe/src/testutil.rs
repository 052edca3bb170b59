//! Synthetic bitstreams for unit tests.

use bitstream_io::{BigEndian, BitWrite, BitWriter};

use crate::structs::ts::TS_PACKET_SIZE;
use crate::utils::crc::{CRC_DTS_UHD_FTOC_ALG, Crc16};
use crate::utils::time::TS_TIMESTAMP_MASK;

pub struct BitBuilder {
    writer: BitWriter<Vec<u8>, BigEndian>,
    written_bits: u64,
}

impl Default for BitBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BitBuilder {
    pub fn new() -> Self {
        Self {
            writer: BitWriter::endian(Vec::new(), BigEndian),
            written_bits: 0,
        }
    }

    pub fn bits(&mut self, bits: u32, value: u64) -> &mut Self {
        if bits > 0 {
            self.writer.write_unsigned_var(bits, value).unwrap();
            self.written_bits += bits as u64;
        }
        self
    }

    pub fn bit(&mut self, bit: bool) -> &mut Self {
        self.writer.write_bit(bit).unwrap();
        self.written_bits += 1;
        self
    }

    pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        for &byte in bytes {
            self.bits(8, byte as u64);
        }
        self
    }

    /// MPEG-H `escapedValue(b1, b2, b3)`.
    pub fn escaped(&mut self, b1: u32, b2: u32, b3: u32, value: u64) -> &mut Self {
        let max1 = (1 << b1) - 1;
        if value < max1 {
            return self.bits(b1, value);
        }
        self.bits(b1, max1);

        let value = value - max1;
        let max2 = (1 << b2) - 1;
        if value < max2 || b3 == 0 {
            return self.bits(b2, value);
        }
        self.bits(b2, max2).bits(b3, value - max2)
    }

    /// DTS-UHD additive variable-length field.
    pub fn var_len(&mut self, lengths: &[u32; 4], value: u32) -> &mut Self {
        let mut value = value;
        let mut index = 0;
        while index < 3 && value >= 1 << lengths[index] {
            value -= 1 << lengths[index];
            index += 1;
        }

        for _ in 0..index {
            self.bit(true);
        }
        if index < 3 {
            self.bit(false);
        }
        self.bits(lengths[index], value as u64)
    }

    pub fn align(&mut self) -> &mut Self {
        self.writer.byte_align().unwrap();
        self.written_bits = self.written_bits.div_ceil(8) * 8;
        self
    }

    /// Byte-aligns with zero bits and pads to at least `len` bytes.
    pub fn pad_to(&mut self, len: usize) -> &mut Self {
        self.align();
        while self.len() < len {
            self.bits(8, 0);
        }
        self
    }

    fn len(&self) -> usize {
        self.written_bits.div_ceil(8) as usize
    }

    pub fn finish(&mut self) -> Vec<u8> {
        self.align();
        std::mem::take(self).writer.into_writer()
    }
}

pub fn swap_byte_pairs(data: &[u8]) -> Vec<u8> {
    let mut swapped = data.to_vec();
    for pair in swapped.chunks_exact_mut(2) {
        pair.swap(0, 1);
    }
    swapped
}

const DTS_FTOC_SIZE_BITS: [u32; 4] = [5, 8, 10, 12];
const DTS_METADATA_CHUNK_BITS: [u32; 4] = [6, 9, 12, 15];
const DTS_AUDIO_CHUNK_ID_BITS: [u32; 4] = [2, 4, 6, 8];
const DTS_AUDIO_CHUNK_SIZE_BITS: [u32; 4] = [9, 11, 13, 16];

/// DTS-UHD sync frame: 12 byte FTOC, 48 kHz, 1024 samples, audio chunk id 1.
pub fn dts_uhd_sync_frame(payload: &[u8]) -> Vec<u8> {
    const FTOC_BYTES: usize = 12;

    let mut b = BitBuilder::new();
    b.bits(32, 0x4041_1BF2)
        .var_len(&DTS_FTOC_SIZE_BITS, FTOC_BYTES as u32 - 1)
        // full_channel_based_mix_flag
        .bit(true)
        // base duration 512, frame duration code 1, 48 kHz
        .bits(2, 0)
        .bits(3, 1)
        .bits(2, 2)
        // no timestamp, multiplier 1
        .bit(false)
        .bits(2, 0)
        .var_len(&DTS_METADATA_CHUNK_BITS, 0)
        .var_len(&DTS_AUDIO_CHUNK_ID_BITS, 1)
        .var_len(&DTS_AUDIO_CHUNK_SIZE_BITS, payload.len() as u32)
        .pad_to(FTOC_BYTES - 2);

    let mut frame = b.finish();
    let crc = Crc16::new(&CRC_DTS_UHD_FTOC_ALG).checksum(&frame);
    frame.extend(crc.to_be_bytes());
    frame.extend(payload);
    frame
}

/// DTS-UHD non-sync frame with an 8 byte FTOC.
pub fn dts_uhd_nonsync_frame(payload: &[u8]) -> Vec<u8> {
    const FTOC_BYTES: usize = 8;

    let mut b = BitBuilder::new();
    b.bits(32, 0x71C4_42E8)
        .var_len(&DTS_FTOC_SIZE_BITS, FTOC_BYTES as u32 - 1)
        .var_len(&DTS_AUDIO_CHUNK_SIZE_BITS, payload.len() as u32)
        .pad_to(FTOC_BYTES);

    let mut frame = b.finish();
    frame.extend(payload);
    frame
}

/// AC-4 sync frame (0xAC40) at 48 kHz with a `payload_len` byte raw frame.
pub fn ac4_frame(payload_len: usize, sequence_counter: u32, frame_rate_index: u8) -> Vec<u8> {
    let mut b = BitBuilder::new();
    b.bits(16, 0xAC40)
        .bits(16, payload_len as u64)
        // bitstream_version
        .bits(2, 2)
        .bits(10, sequence_counter as u64)
        // b_wait_frames
        .bit(false)
        // fs_index
        .bit(true)
        .bits(4, frame_rate_index as u64)
        .pad_to(4 + payload_len);

    b.finish()
}

/// MHAS packet with escaped type, label and length fields.
pub fn mhas_packet(packet_type: u32, label: u64, payload: &[u8]) -> Vec<u8> {
    let mut b = BitBuilder::new();
    b.escaped(3, 8, 8, packet_type as u64)
        .escaped(2, 8, 32, label)
        .escaped(11, 24, 24, payload.len() as u64)
        .bytes(payload);

    b.finish()
}

#[derive(Debug, Clone, Copy)]
pub struct MpeghConfig {
    pub profile: u8,
    pub sampling_index: u8,
    pub compatible_set: Option<u8>,
}

impl Default for MpeghConfig {
    fn default() -> Self {
        Self {
            profile: 0x0D,
            sampling_index: 3,
            compatible_set: None,
        }
    }
}

/// Minimal `mpegh3daConfig`: one channel group of two signals coded as a
/// single CPE, 1024 sample core frames.
pub fn mpegh3da_config(config: &MpeghConfig) -> Vec<u8> {
    let mut b = BitBuilder::new();
    b.bits(8, config.profile as u64)
        .bits(5, config.sampling_index as u64)
        // coreSbrFrameLengthIndex
        .bits(3, 1)
        // cfg_reserved, receiverDelayCompensation
        .bits(2, 0)
        // referenceLayout: CICP layout 2
        .bits(2, 0)
        .bits(6, 2)
        // Signals3d: one channel group of two signals, no own layout
        .bits(5, 0)
        .bits(3, 0)
        .escaped(5, 8, 16, 1)
        .bit(false)
        // mpegh3daDecoderConfig: one element, elementLengthPresent 0
        .escaped(4, 8, 16, 0)
        .bit(false)
        // ID_USAC_CPE: core config, qce 0, no shift, lpdStereoIndex
        .bits(2, 1)
        .bits(3, 0)
        .bit(false)
        .bits(2, 0)
        .bit(false)
        .bit(false);

    match config.compatible_set {
        Some(level) => {
            b.bit(true)
                .escaped(2, 4, 8, 0)
                .escaped(4, 8, 16, 7)
                .escaped(4, 8, 16, 2)
                // one set, reserved
                .bits(4, 0)
                .bits(4, 0)
                .bits(8, level as u64);
        }
        None => {
            b.bit(false);
        }
    }

    b.finish()
}

#[derive(Debug, Clone, Copy)]
pub struct DsiPresentation {
    /// `None` makes an object-coded presentation.
    pub channel_mode: Option<u8>,
    pub back_channels_present: bool,
    pub top_channel_pairs: u8,
    pub umx_objects: u32,
    pub level: u8,
    pub language: Option<&'static str>,
    pub trailing_bytes: usize,
}

impl Default for DsiPresentation {
    fn default() -> Self {
        Self {
            channel_mode: Some(1),
            back_channels_present: true,
            top_channel_pairs: 2,
            umx_objects: 0,
            level: 0,
            language: None,
            trailing_bytes: 0,
        }
    }
}

fn language_tag(b: &mut BitBuilder, language: Option<&str>) {
    match language {
        Some(tag) => {
            b.bit(true).bits(6, tag.len() as u64).bytes(tag.as_bytes());
        }
        None => {
            b.bit(false);
        }
    }
}

/// Presentation body of an `ac4_dsi_v1` presentation version 1, from
/// `presentation_config` to the final byte alignment.
fn ac4_presentation_v1(p: &DsiPresentation) -> Vec<u8> {
    let channel_coded = p.channel_mode.is_some();

    let mut b = BitBuilder::new();
    // single substream group
    b.bits(5, 0x1F)
        .bits(3, p.level as u64)
        // b_presentation_id
        .bit(false)
        // frame rate multiply and fraction info
        .bits(2, 0)
        .bits(2, 0)
        // emdf version, key id
        .bits(5, 0)
        .bits(10, 0)
        .bit(channel_coded);

    if let Some(mode) = p.channel_mode {
        b.bits(5, mode as u64);
        if (11..=14).contains(&mode) {
            b.bit(p.back_channels_present).bits(2, p.top_channel_pairs as u64);
        }
        b.bits(24, 0);
    }

    // core differs, filter
    b.bit(false).bit(false);

    // ac4_substream_group_dsi with one substream
    b.bits(2, 0).bit(channel_coded).bits(8, 1).bits(2, 0).bit(false);
    if channel_coded {
        b.bits(24, 0);
    } else {
        if p.umx_objects > 0 {
            // b_ajoc, b_static_dmx
            b.bit(true).bit(true).bits(6, p.umx_objects as u64 - 1);
        } else {
            b.bit(false);
        }
        b.bits(4, 0);
    }

    // b_content_type
    match p.language {
        Some(_) => {
            b.bit(true).bits(3, 0);
            language_tag(&mut b, p.language);
        }
        None => {
            b.bit(false);
        }
    }

    // pre_virtualized, add_emdf_substreams, bitrate info, alternative
    b.bit(false).bit(false).bit(false).bit(false);

    b.finish()
}

/// `ac4_dsi_v1` with bitstream version 2, program id 0x1234 and 48 kHz.
pub fn ac4_dsi_v1(presentations: &[DsiPresentation]) -> Vec<u8> {
    let mut b = BitBuilder::new();
    b.bits(3, 1)
        .bits(7, 2)
        .bit(true)
        .bits(4, 2)
        .bits(9, presentations.len() as u64)
        // b_program_id, short_program_id, b_uuid
        .bit(true)
        .bits(16, 0x1234)
        .bit(false)
        // bitrate mode, bitrate, precision
        .bits(2, 0)
        .bits(32, 0)
        .bits(32, 0)
        .align();

    for p in presentations {
        let mut body = ac4_presentation_v1(p);
        body.resize(body.len() + p.trailing_bytes, 0);

        b.bits(8, 1).bits(8, body.len() as u64).bytes(&body);
    }

    b.finish()
}

/// `ac4_dsi` version 0 with one single-substream presentation.
pub fn ac4_dsi_v0(channel_mode: u8, language: Option<&str>) -> Vec<u8> {
    let mut b = BitBuilder::new();
    b.bits(3, 0)
        .bits(7, 1)
        .bit(true)
        .bits(4, 2)
        .bits(9, 1)
        // b_single_substream, presentation_config, presentation_version
        .bit(true)
        .bits(5, 0)
        .bits(5, 0)
        // mdcompat, b_presentation_id, frame rate, emdf version, key id
        .bits(3, 0)
        .bit(false)
        .bits(2, 0)
        .bits(5, 0)
        .bits(10, 0)
        // ac4_substream_dsi
        .bits(5, channel_mode as u64)
        .bits(2, 0)
        .bit(false);
    if (7..=10).contains(&channel_mode) {
        b.bit(false);
    }
    // b_content_type, complete main
    b.bit(true).bits(3, 0);
    language_tag(&mut b, language);

    // pre_virtualized, add_emdf_substreams
    b.bit(false).bit(false);

    b.finish()
}

fn pes_timestamp(prefix: u8, timestamp: u64) -> [u8; 5] {
    [
        prefix << 4 | ((timestamp >> 29) & 0x0E) as u8 | 1,
        (timestamp >> 22) as u8,
        ((timestamp >> 14) & 0xFE) as u8 | 1,
        (timestamp >> 7) as u8,
        ((timestamp << 1) & 0xFE) as u8 | 1,
    ]
}

/// Transport packet starting a PES packet of `pid`.
pub fn ts_pes_packet(pid: u16, pts: Option<u64>, dts: Option<u64>) -> Vec<u8> {
    let mut packet = vec![0x47, 0x40 | (pid >> 8) as u8 & 0x1F, pid as u8, 0x10];
    packet.extend([0x00, 0x00, 0x01, 0xC0, 0x00, 0x00, 0x80]);

    match (pts, dts) {
        (Some(pts), Some(dts)) => {
            packet.extend([0xC0, 10]);
            packet.extend(pes_timestamp(0b0011, pts));
            packet.extend(pes_timestamp(0b0001, dts));
        }
        (Some(pts), None) => {
            packet.extend([0x80, 5]);
            packet.extend(pes_timestamp(0b0010, pts));
        }
        _ => packet.extend([0x00, 0]),
    }

    packet.resize(TS_PACKET_SIZE, 0xFF);
    packet
}

/// Transport packet continuing a PES packet of `pid`.
pub fn ts_filler_packet(pid: u16) -> Vec<u8> {
    let mut packet = vec![0x47, (pid >> 8) as u8 & 0x1F, pid as u8, 0x10];
    packet.resize(TS_PACKET_SIZE, 0xFF);
    packet
}

/// Adaptation-field-only packet of `pid` carrying a PCR with a zero extension.
pub fn ts_pcr_packet(pid: u16, pcr_base: u64) -> Vec<u8> {
    let mut packet = vec![0x47, (pid >> 8) as u8 & 0x1F, pid as u8, 0x20, 183, 0x10];
    packet.extend([
        (pcr_base >> 25) as u8,
        (pcr_base >> 17) as u8,
        (pcr_base >> 9) as u8,
        (pcr_base >> 1) as u8,
        ((pcr_base & 1) as u8) << 7 | 0x7E,
        0x00,
    ]);
    packet.resize(TS_PACKET_SIZE, 0xFF);
    packet
}

/// `count` PCR packets on `pid`, `step` ticks apart.
pub fn ts_pcr_stream(pid: u16, first_pcr: u64, step: u64, count: u64) -> Vec<u8> {
    (0..count)
        .flat_map(|i| ts_pcr_packet(pid, (first_pcr + i * step) & TS_TIMESTAMP_MASK))
        .collect()
}

/// `count` units of five packets: a PES start on `pid` every `step` ticks,
/// three continuation packets and one null packet.
pub fn ts_stream(pid: u16, first_timestamp: u64, step: u64, count: u64) -> Vec<u8> {
    let mut data = Vec::new();
    for i in 0..count {
        let timestamp = (first_timestamp + i * step) & TS_TIMESTAMP_MASK;
        data.extend(ts_pes_packet(pid, Some(timestamp), None));
        for _ in 0..3 {
            data.extend(ts_filler_packet(pid));
        }
        data.extend(ts_filler_packet(0x1FFF));
    }
    data
}
