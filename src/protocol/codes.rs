// Command byte-code table for the serial control protocol.
//
// One inbound unit is a single command byte, optionally followed by a
// length-delimited ASCII payload (one length byte, then that many
// bytes). The code values are fixed protocol constants shared with
// deployed controllers; unknown bytes must pass through harmlessly.

use crate::device::Transport;

/// Enquiry: "are you ready for commands?"
pub const ENQ: u8 = 0x05;
/// Positive acknowledgement: command/action successful.
pub const ACK: u8 = 0x06;
/// Negative acknowledgement: command/action unsuccessful.
pub const NAK: u8 = 0x15;

/// Device identification query.
pub const DEVICE_ID: u8 = 0x11;
/// Storage self-check.
pub const STORAGE_CHECK: u8 = 0x12;
/// Stream a stored file back over the transport.
pub const SEND_FILE: u8 = 0x13;
/// Erase volatile files (recognized, unsupported).
pub const DELETE_VOLATILE: u8 = 0x14;

pub const START_RECORDING: u8 = 0x16;
pub const STOP_RECORDING: u8 = 0x17;
pub const START_PLAYBACK: u8 = 0x18;
pub const STOP_PLAYBACK: u8 = 0x19;
pub const START_PASS_THROUGH: u8 = 0x1A;
pub const START_DETECTING: u8 = 0x1B;
pub const STOP_DETECTING: u8 = 0x1C;
/// Blend the bundled synthetic normal heart beat.
pub const PLAY_NORMAL_HB: u8 = 0x1D;
/// Blend the bundled early systolic murmur.
pub const PLAY_EARLY_MURMUR: u8 = 0x1E;
pub const START_BLENDING: u8 = 0x1F;
pub const STOP_BLENDING: u8 = 0x20;
pub const STOP_PASS_THROUGH: u8 = 0x2A;

/// Identification bytes sent in response to [`DEVICE_ID`].
pub const DEVICE_ID_BYTES: [u8; 4] = [0x53, 0x54, 0x45, 0x00];

/// Longest accepted command payload.
pub const MAX_PAYLOAD_LEN: usize = 64;

/// A decoded inbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Enquiry,
    AckReceived,
    NakReceived,
    DeviceId,
    StorageCheck,
    SendFile(String),
    DeleteVolatile,
    StartRecording,
    StopRecording,
    StartPlayback(String),
    StopPlayback,
    StartPassThrough,
    StopPassThrough,
    StartDetecting,
    StopDetecting,
    PlayNormalHeartBeat,
    PlayEarlyMurmur,
    StartBlending(String),
    StopBlending,
}

/// Outcome of decoding one inbound unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Command(Command),
    /// A payload-carrying command whose payload is absent, empty,
    /// over-long, or not printable ASCII.
    MalformedPayload { code: u8 },
    /// A byte outside the closed code table.
    Unknown { code: u8 },
}

/// Decode one command byte, consuming its payload from the transport
/// when the command carries one.
pub fn decode(code: u8, transport: &mut dyn Transport) -> Decoded {
    let command = match code {
        ENQ => Command::Enquiry,
        ACK => Command::AckReceived,
        NAK => Command::NakReceived,
        DEVICE_ID => Command::DeviceId,
        STORAGE_CHECK => Command::StorageCheck,
        DELETE_VOLATILE => Command::DeleteVolatile,
        START_RECORDING => Command::StartRecording,
        STOP_RECORDING => Command::StopRecording,
        STOP_PLAYBACK => Command::StopPlayback,
        START_PASS_THROUGH => Command::StartPassThrough,
        STOP_PASS_THROUGH => Command::StopPassThrough,
        START_DETECTING => Command::StartDetecting,
        STOP_DETECTING => Command::StopDetecting,
        PLAY_NORMAL_HB => Command::PlayNormalHeartBeat,
        PLAY_EARLY_MURMUR => Command::PlayEarlyMurmur,
        STOP_BLENDING => Command::StopBlending,
        SEND_FILE => match read_payload(transport) {
            Some(name) => Command::SendFile(name),
            None => return Decoded::MalformedPayload { code },
        },
        START_PLAYBACK => match read_payload(transport) {
            Some(name) => Command::StartPlayback(name),
            None => return Decoded::MalformedPayload { code },
        },
        START_BLENDING => match read_payload(transport) {
            Some(name) => Command::StartBlending(name),
            None => return Decoded::MalformedPayload { code },
        },
        _ => return Decoded::Unknown { code },
    };
    Decoded::Command(command)
}

/// Read one length-delimited ASCII payload: a length byte in
/// [1, MAX_PAYLOAD_LEN], then that many printable bytes.
fn read_payload(transport: &mut dyn Transport) -> Option<String> {
    let len = transport.read_byte()? as usize;
    if len == 0 || len > MAX_PAYLOAD_LEN || transport.available() < len {
        return None;
    }
    let mut bytes = Vec::with_capacity(len);
    for _ in 0..len {
        bytes.push(transport.read_byte()?);
    }
    let text = String::from_utf8(bytes).ok()?;
    if text.chars().all(|c| c.is_ascii_graphic()) {
        Some(text)
    } else {
        None
    }
}

/// Frame a payload for transmission (used by controllers and tests).
pub fn encode_payload(text: &str) -> Vec<u8> {
    let mut framed = Vec::with_capacity(text.len() + 1);
    framed.push(text.len() as u8);
    framed.extend_from_slice(text.as_bytes());
    framed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::sim::SimTransport;

    fn decode_stream(bytes: &[u8]) -> Decoded {
        let transport = SimTransport::new();
        transport.push_inbound(&bytes[1..]);
        let mut boxed: Box<dyn Transport> = Box::new(transport);
        decode(bytes[0], boxed.as_mut())
    }

    #[test]
    fn test_bare_commands_decode() {
        assert_eq!(decode_stream(&[ENQ]), Decoded::Command(Command::Enquiry));
        assert_eq!(
            decode_stream(&[START_RECORDING]),
            Decoded::Command(Command::StartRecording)
        );
        assert_eq!(
            decode_stream(&[STOP_BLENDING]),
            Decoded::Command(Command::StopBlending)
        );
        assert_eq!(
            decode_stream(&[PLAY_NORMAL_HB]),
            Decoded::Command(Command::PlayNormalHeartBeat)
        );
    }

    #[test]
    fn test_payload_command_decodes() {
        let mut bytes = vec![START_PLAYBACK];
        bytes.extend(encode_payload("NORMHB.RAW"));
        assert_eq!(
            decode_stream(&bytes),
            Decoded::Command(Command::StartPlayback("NORMHB.RAW".to_string()))
        );
    }

    #[test]
    fn test_missing_payload_is_malformed() {
        assert_eq!(
            decode_stream(&[START_BLENDING]),
            Decoded::MalformedPayload {
                code: START_BLENDING
            }
        );
    }

    #[test]
    fn test_truncated_payload_is_malformed() {
        // Length byte promises 10 bytes, only 3 follow.
        assert_eq!(
            decode_stream(&[SEND_FILE, 10, b'A', b'B', b'C']),
            Decoded::MalformedPayload { code: SEND_FILE }
        );
    }

    #[test]
    fn test_zero_length_payload_is_malformed() {
        assert_eq!(
            decode_stream(&[START_PLAYBACK, 0]),
            Decoded::MalformedPayload {
                code: START_PLAYBACK
            }
        );
    }

    #[test]
    fn test_non_printable_payload_is_malformed() {
        assert_eq!(
            decode_stream(&[START_PLAYBACK, 2, 0x01, 0x02]),
            Decoded::MalformedPayload {
                code: START_PLAYBACK
            }
        );
    }

    #[test]
    fn test_unknown_byte_reported() {
        assert_eq!(decode_stream(&[0xFF]), Decoded::Unknown { code: 0xFF });
        assert_eq!(decode_stream(&[0x00]), Decoded::Unknown { code: 0x00 });
    }
}
