//! Fixed-layout framed packet: wire codec for audio, control, and heartbeat
//! traffic between clients and the relay.
//!
//! Wire order (big-endian, 50-byte header + payload + trailing CRC32):
//! magic(4) version(1) type(1) seq(4) ts(4) channel_id(16) participant_id(16)
//! flags(1) reserved(1) payload_len(2) payload(N) crc32(4)

use uuid::Uuid;

use crate::crc32;

pub const MAGIC: u32 = 0x5454_4C4B;
pub const VERSION: u8 = 0x01;
pub const HEADER_LEN: usize = 50;
pub const MIN_PACKET_LEN: usize = HEADER_LEN + 4;
pub const MAX_PAYLOAD_LEN: usize = 2048;

pub const FLAG_VOX: u8 = 0b001;
pub const FLAG_MUTED: u8 = 0b010;
pub const FLAG_ADMIN: u8 = 0b100;

pub mod control_cmd {
    pub const LEAVE: u8 = 0x30;
    pub const MUTE: u8 = 0x01;
    pub const UNMUTE: u8 = 0x02;
    pub const KICK: u8 = 0x03;
}

pub mod admin_response {
    pub const MUTE_NOTICE: u8 = 0x10;
    pub const UNMUTE_NOTICE: u8 = 0x11;
    pub const KICK_NOTICE: u8 = 0x12;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Audio = 0x01,
    Control = 0x02,
    Heartbeat = 0x03,
}

impl PacketType {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(PacketType::Audio),
            0x02 => Some(PacketType::Control),
            0x03 => Some(PacketType::Heartbeat),
            _ => None,
        }
    }

    fn to_byte(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub version: u8,
    pub packet_type: PacketType,
    pub sequence_number: u32,
    pub timestamp: u32,
    pub channel_id: Uuid,
    pub participant_id: Uuid,
    pub flags: u8,
    pub reserved: u8,
    pub payload: Vec<u8>,
}

/// Named rejection causes, kept for logging/debugging and tests. Rejection
/// is silent at the codec layer; counting malformed datagrams is owned by
/// the dispatcher, which only needs accept/reject from here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("datagram shorter than minimum packet size")]
    TooShort,
    #[error("magic bytes did not match")]
    BadMagic,
    #[error("unsupported protocol version")]
    BadVersion,
    #[error("unknown packet type discriminant")]
    BadType,
    #[error("declared payload length exceeds maximum")]
    PayloadTooLarge,
    #[error("datagram truncated before declared payload end")]
    Truncated,
    #[error("trailing CRC32 did not match")]
    BadCrc,
}

/// Decode a single datagram. Returns `Err` naming the rejection cause;
/// callers that only care about accept/reject can use `.ok()`. The input
/// slice is never mutated, so there is no cursor to restore on failure.
pub fn decode(buf: &[u8]) -> Result<Packet, DecodeError> {
    if buf.len() < MIN_PACKET_LEN {
        return Err(DecodeError::TooShort);
    }
    let magic = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if magic != MAGIC {
        return Err(DecodeError::BadMagic);
    }
    let version = buf[4];
    if version != VERSION {
        return Err(DecodeError::BadVersion);
    }
    let packet_type = PacketType::from_byte(buf[5]).ok_or(DecodeError::BadType)?;
    let sequence_number = u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]);
    let timestamp = u32::from_be_bytes([buf[10], buf[11], buf[12], buf[13]]);
    let channel_id = Uuid::from_bytes(buf[14..30].try_into().unwrap());
    let participant_id = Uuid::from_bytes(buf[30..46].try_into().unwrap());
    let flags = buf[46];
    let reserved = buf[47];
    let payload_len = u16::from_be_bytes([buf[48], buf[49]]) as usize;
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(DecodeError::PayloadTooLarge);
    }
    if buf.len() - HEADER_LEN < payload_len + 4 {
        return Err(DecodeError::Truncated);
    }
    let payload = buf[HEADER_LEN..HEADER_LEN + payload_len].to_vec();
    let crc_offset = HEADER_LEN + payload_len;
    let trailing_crc = u32::from_be_bytes([
        buf[crc_offset],
        buf[crc_offset + 1],
        buf[crc_offset + 2],
        buf[crc_offset + 3],
    ]);
    let computed_crc = crc32::compute(&buf[0..crc_offset]);
    if trailing_crc != computed_crc {
        return Err(DecodeError::BadCrc);
    }
    Ok(Packet {
        version,
        packet_type,
        sequence_number,
        timestamp,
        channel_id,
        participant_id,
        flags,
        reserved,
        payload,
    })
}

/// Append the wire encoding of `packet` to `buf`. `payload_len` is taken
/// from `packet.payload.len()`; the caller must ensure it is `<= 2048`.
pub fn encode(packet: &Packet, buf: &mut Vec<u8>) {
    let start = buf.len();
    buf.extend_from_slice(&MAGIC.to_be_bytes());
    buf.push(packet.version);
    buf.push(packet.packet_type.to_byte());
    buf.extend_from_slice(&packet.sequence_number.to_be_bytes());
    buf.extend_from_slice(&packet.timestamp.to_be_bytes());
    buf.extend_from_slice(packet.channel_id.as_bytes());
    buf.extend_from_slice(packet.participant_id.as_bytes());
    buf.push(packet.flags);
    buf.push(packet.reserved);
    buf.extend_from_slice(&(packet.payload.len() as u16).to_be_bytes());
    buf.extend_from_slice(&packet.payload);
    let crc = crc32::compute(&buf[start..]);
    buf.extend_from_slice(&crc.to_be_bytes());
}

/// Convenience wrapper returning a freshly allocated buffer.
pub fn encode_to_vec(packet: &Packet) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + packet.payload.len() + 4);
    encode(packet, &mut buf);
    buf
}
