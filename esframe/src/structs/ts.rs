//! MPEG transport stream packets, as far as the seeker needs them: packet
//! alignment, PID filtering and PES timestamps.

use memchr::memchr;

pub const TS_PACKET_SIZE: usize = 188;
pub const TS_SYNC_BYTE: u8 = 0x47;

/// Consecutive sync bytes, spaced by the packet size, that confirm alignment.
const SYNC_CONFIRMATIONS: usize = 5;

const PES_START_CODE: [u8; 3] = [0x00, 0x00, 0x01];

/// Fields of the 4-byte transport packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsPacketHeader {
    pub transport_error: bool,
    pub payload_unit_start: bool,
    pub pid: u16,
    pub adaptation_field: bool,
    pub payload: bool,
    pub continuity_counter: u8,
}

impl TsPacketHeader {
    pub fn read(packet: &[u8]) -> Option<Self> {
        if packet.len() < 4 || packet[0] != TS_SYNC_BYTE {
            return None;
        }

        Some(Self {
            transport_error: packet[1] & 0x80 != 0,
            payload_unit_start: packet[1] & 0x40 != 0,
            pid: u16::from_be_bytes([packet[1] & 0x1F, packet[2]]),
            adaptation_field: packet[3] & 0x20 != 0,
            payload: packet[3] & 0x10 != 0,
            continuity_counter: packet[3] & 0x0F,
        })
    }
}

/// First sync byte in `data[start..limit]`, or `limit` if there is none.
pub fn find_sync_byte(data: &[u8], start: usize, limit: usize) -> usize {
    let limit = limit.min(data.len());
    if start >= limit {
        return limit;
    }

    memchr(TS_SYNC_BYTE, &data[start..limit]).map_or(limit, |offset| start + offset)
}

/// Whether `position` is a packet boundary: it holds a sync byte and belongs
/// to a run of sync bytes one packet apart inside `data[start..limit]`.
pub fn is_start_of_packet(data: &[u8], start: usize, limit: usize, position: usize) -> bool {
    let limit = limit.min(data.len());
    if position < start || position >= limit || data[position] != TS_SYNC_BYTE {
        return false;
    }

    let mut consecutive = 0;
    for i in -4i64..=4 {
        let current = position as i64 + i * TS_PACKET_SIZE as i64;
        if current < start as i64 || current >= limit as i64 || data[current as usize] != TS_SYNC_BYTE {
            consecutive = 0;
        } else {
            consecutive += 1;
            if consecutive == SYNC_CONFIRMATIONS {
                return true;
            }
        }
    }

    false
}

/// First confirmed packet boundary in `data[start..limit]`. Falls back to the
/// first sync byte when the range is too short to confirm alignment.
pub fn find_packet_start(data: &[u8], start: usize, limit: usize) -> usize {
    let limit = limit.min(data.len());
    let mut position = find_sync_byte(data, start, limit);

    while position < limit {
        if is_start_of_packet(data, start, limit, position) {
            return position;
        }
        position = find_sync_byte(data, position + 1, limit);
    }

    find_sync_byte(data, start, limit)
}

/// Decodes a 33-bit timestamp from its 5-byte PES encoding.
fn read_timestamp(bytes: &[u8]) -> u64 {
    (((bytes[0] >> 1) & 0x07) as u64) << 30
        | (bytes[1] as u64) << 22
        | ((bytes[2] >> 1) as u64) << 15
        | (bytes[3] as u64) << 7
        | (bytes[4] >> 1) as u64
}

/// 33-bit PCR base carried in the adaptation field of a `pid` packet, which
/// must hold a whole transport packet.
pub fn read_pcr_from_packet(packet: &[u8], pid: u16) -> Option<u64> {
    let header = TsPacketHeader::read(packet)?;
    if header.pid != pid || !header.adaptation_field || packet.len() < TS_PACKET_SIZE {
        return None;
    }

    // Flags byte plus the 6-byte PCR.
    let adaptation_field_length = packet[4] as usize;
    if adaptation_field_length < 7 || packet[5] & 0x10 == 0 {
        return None;
    }

    let pcr = &packet[6..11];
    Some(
        (pcr[0] as u64) << 25
            | (pcr[1] as u64) << 17
            | (pcr[2] as u64) << 9
            | (pcr[3] as u64) << 1
            | (pcr[4] >> 7) as u64,
    )
}

/// Payload of a packet, after the header and any adaptation field.
pub fn packet_payload(packet: &[u8]) -> Option<&[u8]> {
    let header = TsPacketHeader::read(packet)?;
    if !header.payload || packet.len() < TS_PACKET_SIZE {
        return None;
    }

    let mut offset = 4;
    if header.adaptation_field {
        offset += 1 + packet[4] as usize;
    }

    packet[..TS_PACKET_SIZE].get(offset..)
}

/// DTS (or PTS when no DTS is present) of a PES packet starting in `packet`,
/// which must hold a whole transport packet. Returns `None` for other PIDs,
/// continuation packets and PES headers without timestamps.
pub fn read_pes_timestamp(packet: &[u8], pid: u16) -> Option<u64> {
    let header = TsPacketHeader::read(packet)?;
    if header.pid != pid || !header.payload_unit_start || header.transport_error {
        return None;
    }

    let pes = packet_payload(packet)?;
    if pes.len() < 9 || pes[..3] != PES_START_CODE {
        return None;
    }

    let header_data = &pes[9..];
    match pes[7] >> 6 {
        0b10 if header_data.len() >= 5 => Some(read_timestamp(&header_data[..5])),
        0b11 if header_data.len() >= 10 => Some(read_timestamp(&header_data[5..10])),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{ts_filler_packet, ts_pcr_packet, ts_pes_packet};

    #[test]
    fn packet_header() {
        let packet = ts_pes_packet(0x101, Some(1234), None);
        let header = TsPacketHeader::read(&packet).unwrap();

        assert_eq!(header.pid, 0x101);
        assert!(header.payload_unit_start);
        assert!(header.payload);
        assert!(!header.adaptation_field);
        assert!(TsPacketHeader::read(&[0x48, 0, 0, 0]).is_none());
    }

    #[test]
    fn pes_timestamps() {
        let pts_only = ts_pes_packet(0x101, Some(90_000), None);
        assert_eq!(read_pes_timestamp(&pts_only, 0x101), Some(90_000));
        assert_eq!(read_pes_timestamp(&pts_only, 0x102), None);

        let both = ts_pes_packet(0x101, Some((1 << 33) - 1), Some(45_000));
        assert_eq!(read_pes_timestamp(&both, 0x101), Some(45_000));

        let neither = ts_pes_packet(0x101, None, None);
        assert_eq!(read_pes_timestamp(&neither, 0x101), None);

        let continuation = ts_filler_packet(0x101);
        assert_eq!(read_pes_timestamp(&continuation, 0x101), None);
    }

    #[test]
    fn pcr_values() {
        let packet = ts_pcr_packet(0x100, (1 << 33) - 1);
        assert_eq!(read_pcr_from_packet(&packet, 0x100), Some((1 << 33) - 1));
        assert_eq!(read_pcr_from_packet(&ts_pcr_packet(0x100, 12_345), 0x100), Some(12_345));
        assert_eq!(read_pcr_from_packet(&packet, 0x101), None);
        assert_eq!(read_pes_timestamp(&packet, 0x100), None);

        // Adaptation field without the PCR flag.
        let mut no_pcr = packet.clone();
        no_pcr[5] = 0x00;
        assert_eq!(read_pcr_from_packet(&no_pcr, 0x100), None);

        assert_eq!(read_pcr_from_packet(&ts_filler_packet(0x100), 0x100), None);
        assert_eq!(read_pcr_from_packet(&packet[..100], 0x100), None);
    }

    #[test]
    fn packet_alignment() {
        let mut data = vec![0xFF; 3];
        for _ in 0..6 {
            data.extend(ts_filler_packet(0x100));
        }

        assert_eq!(find_sync_byte(&data, 0, data.len()), 3);
        assert_eq!(find_sync_byte(&data, 4, 100), 100);

        assert!(is_start_of_packet(&data, 0, data.len(), 3));
        assert!(is_start_of_packet(&data, 0, data.len(), 3 + 5 * TS_PACKET_SIZE));
        assert!(!is_start_of_packet(&data, 0, data.len(), 4));
        // Only four packets visible.
        assert!(!is_start_of_packet(&data, 0, 3 + 4 * TS_PACKET_SIZE, 3));

        // A stray sync byte inside the first payload is not a boundary.
        data[10] = TS_SYNC_BYTE;
        assert_eq!(find_packet_start(&data, 4, data.len()), 3 + TS_PACKET_SIZE);
        assert_eq!(find_packet_start(&data, 0, data.len()), 3);
    }
}
