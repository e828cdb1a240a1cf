// Dispatcher - decodes inbound command units and answers on the transport.
//
// Stateless between calls apart from telemetry scheduling: command
// validity is judged against the session's current mode, successful
// operations answer ACK, failed preconditions answer NAK, and unknown
// bytes are logged without a reply. While Recording or Detecting is
// active the dispatcher also transmits the shared telemetry frame at a
// fixed interval.

use std::io;
use std::sync::{Arc, Mutex};

use log::{info, warn};

use crate::device::{DeviceIo, OpenMode, Storage, Transport};
use crate::error::{log_session_error, SessionError};
use crate::protocol::codes::{self, Command, Decoded};
use crate::session::Session;
use crate::telemetry::TelemetryFrame;

/// Outward result of processing one inbound unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Ack,
    Nak,
    Ignored,
}

pub struct Dispatcher {
    frame: Arc<Mutex<TelemetryFrame>>,
    telemetry_interval_ms: u64,
    last_telemetry_ms: u64,
}

impl Dispatcher {
    pub fn new(frame: Arc<Mutex<TelemetryFrame>>, telemetry_interval_ms: u64) -> Self {
        Self {
            frame,
            telemetry_interval_ms,
            last_telemetry_ms: 0,
        }
    }

    /// Decode and execute at most one inbound unit.
    ///
    /// # Returns
    /// `None` when no byte was waiting, otherwise the outward result.
    /// ACK/NAK results have already been written to the transport.
    pub fn dispatch(
        &mut self,
        session: &mut Session,
        io: &mut DeviceIo,
        transport: &mut dyn Transport,
        now_ms: u64,
    ) -> Option<Dispatch> {
        let code = transport.read_byte()?;

        let command = match codes::decode(code, transport) {
            Decoded::Command(command) => command,
            Decoded::MalformedPayload { code } => {
                warn!("[Dispatcher] malformed payload for command 0x{:02X}", code);
                transport.write(&[codes::NAK]);
                return Some(Dispatch::Nak);
            }
            Decoded::Unknown { code } => {
                info!("[Dispatcher] unknown command byte 0x{:02X} ignored", code);
                return Some(Dispatch::Ignored);
            }
        };

        let result = self.execute(command, session, io, transport, now_ms);
        match result {
            Dispatch::Ack => transport.write(&[codes::ACK]),
            Dispatch::Nak => transport.write(&[codes::NAK]),
            Dispatch::Ignored => {}
        }
        Some(result)
    }

    /// Transmit the telemetry frame when a streaming mode is active and
    /// the transmission interval has elapsed.
    pub fn service_telemetry(
        &mut self,
        session: &Session,
        transport: &mut dyn Transport,
        now_ms: u64,
    ) {
        if !session.is_streaming() {
            return;
        }
        if now_ms.saturating_sub(self.last_telemetry_ms) < self.telemetry_interval_ms {
            return;
        }
        self.last_telemetry_ms = now_ms;

        let line = {
            let mut frame = self.frame.lock().expect("telemetry frame poisoned");
            frame.sequence_id = frame.sequence_id.wrapping_add(1);
            frame.encode_line()
        };
        transport.write(&line);
    }

    fn execute(
        &mut self,
        command: Command,
        session: &mut Session,
        io: &mut DeviceIo,
        transport: &mut dyn Transport,
        now_ms: u64,
    ) -> Dispatch {
        match command {
            // A status query, not a mode change: the device is ready
            // whenever it can run this far.
            Command::Enquiry => Dispatch::Ack,

            // The dispatcher never replies to protocol-level replies.
            Command::AckReceived | Command::NakReceived => Dispatch::Ignored,

            Command::DeviceId => {
                transport.write(&codes::DEVICE_ID_BYTES);
                Dispatch::Ack
            }

            Command::StorageCheck => match probe_storage(io.storage.as_mut()) {
                Ok(()) => Dispatch::Ack,
                Err(err) => {
                    warn!("[Dispatcher] storage self-check failed: {}", err);
                    Dispatch::Nak
                }
            },

            Command::SendFile(name) => {
                if !io.storage.exists(&name) {
                    warn!("[Dispatcher] send-file target {} missing", name);
                    return Dispatch::Nak;
                }
                match stream_file(io.storage.as_mut(), transport, &name) {
                    Ok(bytes) => {
                        info!("[Dispatcher] sent {} ({} bytes)", name, bytes);
                        Dispatch::Ack
                    }
                    Err(err) => {
                        warn!("[Dispatcher] send-file {} failed: {}", name, err);
                        Dispatch::Nak
                    }
                }
            }

            Command::DeleteVolatile => {
                info!("[Dispatcher] volatile-erase not supported on this device");
                Dispatch::Ignored
            }

            Command::StartRecording => ack_or_nak(session.start_recording(io, now_ms)),
            Command::StopRecording => ack_or_nak(session.stop_recording(io)),
            Command::StartPlayback(name) => ack_or_nak(session.start_playing(io, &name)),
            Command::StopPlayback => ack_or_nak(session.stop_playing(io)),
            Command::StartPassThrough => ack_or_nak(session.start_pass_through(io)),
            Command::StopPassThrough => ack_or_nak(session.stop_pass_through(io)),
            Command::StartDetecting => ack_or_nak(session.start_detecting(io, now_ms)),
            Command::StopDetecting => ack_or_nak(session.stop_detecting(io)),
            Command::PlayNormalHeartBeat => {
                let name = session.config().files.normal_hb_file.clone();
                ack_or_nak(session.start_blending(io, &name))
            }
            Command::PlayEarlyMurmur => {
                let name = session.config().files.early_murmur_file.clone();
                ack_or_nak(session.start_blending(io, &name))
            }
            Command::StartBlending(name) => ack_or_nak(session.start_blending(io, &name)),
            Command::StopBlending => ack_or_nak(session.stop_blending(io)),
        }
    }
}

fn ack_or_nak(result: Result<(), SessionError>) -> Dispatch {
    match result {
        Ok(()) => Dispatch::Ack,
        Err(err) => {
            log_session_error(&err, "dispatch");
            Dispatch::Nak
        }
    }
}

/// Exercise the full storage handle lifecycle on a scratch file. The
/// probe leaves nothing behind on success.
fn probe_storage(storage: &mut dyn Storage) -> io::Result<()> {
    const PROBE: &str = "SELFTEST.TMP";
    let handle = storage.open(PROBE, OpenMode::Write)?;
    storage.append(handle, b"ok")?;
    storage.close(handle)?;
    storage.remove(PROBE)
}

/// Stream a stored file's bytes to the transport in bounded chunks.
fn stream_file(
    storage: &mut dyn Storage,
    transport: &mut dyn Transport,
    name: &str,
) -> io::Result<usize> {
    let handle = storage.open(name, OpenMode::Read)?;
    let mut sent = 0usize;
    let mut buf = [0u8; 256];
    loop {
        let n = match storage.read(handle, &mut buf) {
            Ok(n) => n,
            Err(err) => {
                let _ = storage.close(handle);
                return Err(err);
            }
        };
        if n == 0 {
            break;
        }
        transport.write(&buf[..n]);
        sent += n;
    }
    storage.close(handle)?;
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::device::sim::{
        SimCapture, SimMixer, SimPlayback, SimSampler, SimStorage, SimTransport,
    };
    use crate::session::DeviceMode;

    struct Rig {
        dispatcher: Dispatcher,
        session: Session,
        io: DeviceIo,
        storage: SimStorage,
        transport: SimTransport,
        boxed_transport: Box<dyn Transport>,
    }

    fn rig() -> Rig {
        let storage = SimStorage::new();
        let transport = SimTransport::new();
        let frame = Arc::new(Mutex::new(TelemetryFrame::new()));
        let config = DeviceConfig::default();
        let io = DeviceIo {
            sampler: Box::new(SimSampler::new()),
            capture: Box::new(SimCapture::new()),
            mixer: Box::new(SimMixer::new()),
            playback: Box::new(SimPlayback::new()),
            storage: Box::new(storage.clone()),
        };
        let dispatcher = Dispatcher::new(Arc::clone(&frame), config.telemetry_interval_ms);
        let session = Session::new(config, frame).unwrap();
        Rig {
            dispatcher,
            session,
            io,
            storage,
            transport: transport.clone(),
            boxed_transport: Box::new(transport),
        }
    }

    impl Rig {
        fn send(&mut self, bytes: &[u8], now_ms: u64) -> Option<Dispatch> {
            self.transport.push_inbound(bytes);
            self.dispatcher.dispatch(
                &mut self.session,
                &mut self.io,
                self.boxed_transport.as_mut(),
                now_ms,
            )
        }
    }

    #[test]
    fn test_empty_transport_is_a_no_op() {
        let mut rig = rig();
        assert_eq!(
            rig.dispatcher.dispatch(
                &mut rig.session,
                &mut rig.io,
                rig.boxed_transport.as_mut(),
                0
            ),
            None
        );
    }

    #[test]
    fn test_enquiry_acks_without_mode_change() {
        let mut rig = rig();
        assert_eq!(rig.send(&[codes::ENQ], 0), Some(Dispatch::Ack));
        assert_eq!(rig.session.mode(), DeviceMode::Standby);
        assert_eq!(rig.transport.take_outbound(), vec![codes::ACK]);
    }

    #[test]
    fn test_unknown_byte_ignored_without_reply() {
        let mut rig = rig();
        assert_eq!(rig.send(&[0xFF], 0), Some(Dispatch::Ignored));
        assert_eq!(rig.session.mode(), DeviceMode::Standby);
        assert!(rig.transport.take_outbound().is_empty());
    }

    #[test]
    fn test_received_ack_nak_are_no_ops() {
        let mut rig = rig();
        assert_eq!(rig.send(&[codes::ACK], 0), Some(Dispatch::Ignored));
        assert_eq!(rig.send(&[codes::NAK], 0), Some(Dispatch::Ignored));
        assert!(rig.transport.take_outbound().is_empty());
    }

    #[test]
    fn test_device_id_reply() {
        let mut rig = rig();
        assert_eq!(rig.send(&[codes::DEVICE_ID], 0), Some(Dispatch::Ack));
        let outbound = rig.transport.take_outbound();
        assert_eq!(&outbound[..4], &codes::DEVICE_ID_BYTES);
        assert_eq!(*outbound.last().unwrap(), codes::ACK);
    }

    #[test]
    fn test_start_stop_recording_roundtrip() {
        let mut rig = rig();
        assert_eq!(rig.send(&[codes::START_RECORDING], 0), Some(Dispatch::Ack));
        assert_eq!(rig.session.mode(), DeviceMode::Recording);

        assert_eq!(rig.send(&[codes::STOP_RECORDING], 100), Some(Dispatch::Ack));
        assert_eq!(rig.session.mode(), DeviceMode::Standby);
        assert_eq!(rig.storage.open_handles(), 0);
    }

    #[test]
    fn test_stop_without_start_naks() {
        let mut rig = rig();
        assert_eq!(rig.send(&[codes::STOP_BLENDING], 0), Some(Dispatch::Nak));
        assert_eq!(rig.session.mode(), DeviceMode::Standby);
        assert_eq!(rig.transport.take_outbound(), vec![codes::NAK]);
    }

    #[test]
    fn test_command_invalid_for_current_mode_naks() {
        let mut rig = rig();
        assert_eq!(rig.send(&[codes::START_DETECTING], 0), Some(Dispatch::Ack));
        rig.transport.take_outbound();

        // A second start while Detecting must be refused without
        // disturbing the active mode.
        assert_eq!(rig.send(&[codes::START_RECORDING], 50), Some(Dispatch::Nak));
        assert_eq!(rig.session.mode(), DeviceMode::Detecting);
    }

    #[test]
    fn test_playback_with_payload() {
        let mut rig = rig();
        rig.storage.put("NORMHB.RAW", vec![0; 8]);

        let mut bytes = vec![codes::START_PLAYBACK];
        bytes.extend(codes::encode_payload("NORMHB.RAW"));
        assert_eq!(rig.send(&bytes, 0), Some(Dispatch::Ack));
        assert_eq!(rig.session.mode(), DeviceMode::Playing);
    }

    #[test]
    fn test_malformed_payload_naks() {
        let mut rig = rig();
        assert_eq!(rig.send(&[codes::START_BLENDING], 0), Some(Dispatch::Nak));
        assert_eq!(rig.session.mode(), DeviceMode::Standby);
        assert_eq!(rig.transport.take_outbound(), vec![codes::NAK]);
    }

    #[test]
    fn test_synthetic_blend_uses_configured_file() {
        let mut rig = rig();
        rig.storage.put("NORMHB.RAW", vec![0; 8]);

        assert_eq!(rig.send(&[codes::PLAY_NORMAL_HB], 0), Some(Dispatch::Ack));
        assert_eq!(rig.session.mode(), DeviceMode::Blending);
    }

    #[test]
    fn test_synthetic_blend_naks_when_file_missing() {
        let mut rig = rig();
        assert_eq!(rig.send(&[codes::PLAY_EARLY_MURMUR], 0), Some(Dispatch::Nak));
        assert_eq!(rig.session.mode(), DeviceMode::Standby);
    }

    #[test]
    fn test_storage_check_leaves_no_residue() {
        let mut rig = rig();
        assert_eq!(rig.send(&[codes::STORAGE_CHECK], 0), Some(Dispatch::Ack));
        assert!(!rig.storage.exists("SELFTEST.TMP"));
        assert_eq!(rig.storage.open_handles(), 0);
    }

    #[test]
    fn test_send_file_streams_contents() {
        let mut rig = rig();
        rig.storage.put("HRATE.DAT", b"72,1000\r\n".to_vec());

        let mut bytes = vec![codes::SEND_FILE];
        bytes.extend(codes::encode_payload("HRATE.DAT"));
        assert_eq!(rig.send(&bytes, 0), Some(Dispatch::Ack));

        let outbound = rig.transport.take_outbound();
        assert!(outbound.starts_with(b"72,1000\r\n"));
        assert_eq!(*outbound.last().unwrap(), codes::ACK);
    }

    #[test]
    fn test_send_file_missing_naks() {
        let mut rig = rig();
        let mut bytes = vec![codes::SEND_FILE];
        bytes.extend(codes::encode_payload("NOPE.RAW"));
        assert_eq!(rig.send(&bytes, 0), Some(Dispatch::Nak));
    }

    #[test]
    fn test_telemetry_only_while_streaming() {
        let mut rig = rig();

        // Standby: nothing transmits no matter how long passes.
        rig.dispatcher
            .service_telemetry(&rig.session, rig.boxed_transport.as_mut(), 5000);
        assert!(rig.transport.take_outbound().is_empty());

        rig.send(&[codes::START_DETECTING], 5000);
        rig.transport.take_outbound();

        rig.dispatcher
            .service_telemetry(&rig.session, rig.boxed_transport.as_mut(), 6000);
        let first = rig.transport.take_outbound();
        assert!(!first.is_empty());
        let frame: TelemetryFrame =
            serde_json::from_slice(&first[..first.len() - 1]).unwrap();
        assert_eq!(frame.sequence_id, 1);
        assert_eq!(frame.payload, "0");

        // Within the interval: suppressed.
        rig.dispatcher
            .service_telemetry(&rig.session, rig.boxed_transport.as_mut(), 6500);
        assert!(rig.transport.take_outbound().is_empty());

        // After the interval: next frame with a bumped sequence.
        rig.dispatcher
            .service_telemetry(&rig.session, rig.boxed_transport.as_mut(), 7100);
        let second = rig.transport.take_outbound();
        let frame: TelemetryFrame =
            serde_json::from_slice(&second[..second.len() - 1]).unwrap();
        assert_eq!(frame.sequence_id, 2);

        // Stopping the mode suppresses transmission again.
        rig.send(&[codes::STOP_DETECTING], 7200);
        rig.transport.take_outbound();
        rig.dispatcher
            .service_telemetry(&rig.session, rig.boxed_transport.as_mut(), 9000);
        assert!(rig.transport.take_outbound().is_empty());
    }
}
