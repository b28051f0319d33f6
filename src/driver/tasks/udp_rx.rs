use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use discortp::demux::{self, Demuxed};
use discortp::rtp::{RtpPacket, RtpType};
use flume::Receiver;
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, instrument, trace, warn};

use super::error::{Error, Result};
use super::message::*;
use crate::constants::*;
use crate::driver::crypto::{rtp_header_len, CryptoMode, EncryptionContext};

#[derive(Debug)]
struct SsrcState {
    last_seq: u16,
    last_packet: Instant,
    active: bool,
}

impl SsrcState {
    fn new(seq: u16, now: Instant) -> Self {
        Self {
            last_seq: seq,
            last_packet: now,
            active: true,
        }
    }

    /// Number of packets lost before `seq`, or `None` if `seq` is late or repeated.
    fn advance(&mut self, seq: u16, now: Instant) -> Option<u16> {
        let seq_delta = seq.wrapping_sub(self.last_seq);

        let missed = if !self.active {
            // A pause in transmission, not loss.
            0
        } else if seq_delta == 0 || seq_delta >= (1 << 15) {
            return None;
        } else {
            seq_delta - 1
        };

        self.last_seq = seq;
        self.last_packet = now;
        self.active = true;

        Some(missed)
    }
}

struct UdpRx {
    crypto: EncryptionContext,
    ssrc_map: HashMap<u32, SsrcState>,
    packet_buffer: [u8; VOICE_PACKET_MAX],
    rx: Receiver<UdpRxMessage>,
    udp_socket: Arc<UdpSocket>,
    poll_timeout: Duration,
    decrypt_failures: u64,
}

impl UdpRx {
    #[instrument(skip(self, interconnect))]
    async fn run(&mut self, interconnect: &Interconnect) {
        loop {
            let deadline = Instant::now() + self.poll_timeout;

            tokio::select! {
                res = timeout_at(deadline, self.udp_socket.recv(&mut self.packet_buffer[..])) => {
                    match res {
                        Ok(Ok(len)) => match self.process_udp_message(interconnect, len) {
                            Ok(()) => {},
                            Err(Error::InterconnectFailure(_)) => break,
                            Err(e @ Error::Crypto(_)) => {
                                self.decrypt_failures += 1;
                                trace!("Dropping packet: {}.", e);
                            },
                            Err(e) => trace!("Dropping packet: {}.", e),
                        },
                        Ok(Err(e)) => {
                            error!("Voice UDP socket failed: {:?}.", e);
                            let _ = interconnect.core.send(CoreMessage::Reconnect);
                            break;
                        },
                        // Receive timeouts are expected whenever nobody speaks.
                        Err(_) => {},
                    }
                }
                msg = self.rx.recv_async() => {
                    match msg {
                        Ok(UdpRxMessage::Poison) | Err(_) => break,
                    }
                }
            }

            self.sweep(interconnect, Instant::now());
        }

        // Anything still buffered can be flushed by the pipeline.
        for (&ssrc, state) in &self.ssrc_map {
            if state.active {
                let _ = interconnect.audio.send(AudioMessage::SpeechEnd {
                    ssrc,
                });
            }
        }

        if self.decrypt_failures > 0 {
            debug!("Dropped {} undecryptable packets.", self.decrypt_failures);
        }
    }

    /// Signals speech end for every SSRC which has gone quiet for a full poll timeout.
    fn sweep(&mut self, interconnect: &Interconnect, now: Instant) {
        for (&ssrc, state) in &mut self.ssrc_map {
            if state.active && now.duration_since(state.last_packet) >= self.poll_timeout {
                state.active = false;
                trace!("SSRC {} went quiet.", ssrc);
                let _ = interconnect.audio.send(AudioMessage::SpeechEnd {
                    ssrc,
                });
            }
        }
    }

    fn process_udp_message(&mut self, interconnect: &Interconnect, len: usize) -> Result<()> {
        // Only a dead audio channel may end the receive loop; other failures cost one packet.
        let packet = &self.packet_buffer[..len];

        if packet.len() < MIN_MEDIA_PACKET {
            trace!("Ignoring {}B datagram.", packet.len());
            return Ok(());
        }

        match demux::demux(packet) {
            Demuxed::Rtp(rtp) => {
                if !rtp_valid(&rtp) {
                    trace!("Non-audio RTP packet received.");
                    return Ok(());
                }

                let ssrc = rtp.get_ssrc();
                let seq: u16 = rtp.get_sequence().into();

                let plaintext = self.crypto.decrypt(packet)?;

                let Some(frame) = opus_payload(packet, self.crypto.mode(), &plaintext) else {
                    warn!("Malformed RTP extension or padding from SSRC {}.", ssrc);
                    return Err(Error::IllegalVoicePacket);
                };

                let now = Instant::now();
                let missed = match self.ssrc_map.get_mut(&ssrc) {
                    Some(state) => match state.advance(seq, now) {
                        Some(missed) => missed,
                        None => {
                            trace!("Late packet {} from SSRC {}.", seq, ssrc);
                            return Ok(());
                        },
                    },
                    None => {
                        self.ssrc_map.insert(ssrc, SsrcState::new(seq, now));
                        0
                    },
                };

                interconnect.audio.send(AudioMessage::Packet {
                    ssrc,
                    speaker: interconnect.ssrcs.get(ssrc),
                    frame: frame.to_vec(),
                    missed,
                })?;
            },
            Demuxed::Rtcp(_) => {
                trace!("Ignoring RTCP packet.");
            },
            Demuxed::FailedParse(t) => {
                warn!("Failed to parse message of type {:?}.", t);
                return Err(Error::IllegalVoicePacket);
            },
            Demuxed::TooSmall => {
                warn!("Illegal UDP packet from voice server.");
                return Err(Error::IllegalVoicePacket);
            },
        }

        Ok(())
    }
}

#[inline]
fn rtp_valid(packet: &RtpPacket<'_>) -> bool {
    packet.get_version() == RTP_VERSION
        && packet.get_payload_type() == RtpType::Dynamic(RTP_PROFILE_TYPE)
}

/// Extracts the Opus frame from a decrypted packet body.
///
/// `packet` is the datagram as received; `plaintext` is what decryption returned for it.
/// Returns `None` if the padding or extension lengths overrun the body.
pub(crate) fn opus_payload<'a>(
    packet: &[u8],
    mode: CryptoMode,
    plaintext: &'a [u8],
) -> Option<&'a [u8]> {
    let first = *packet.first()?;
    let has_padding = first & 0x20 != 0;
    let has_extension = first & 0x10 != 0;

    let end = if has_padding {
        let pad = usize::from(*plaintext.last()?);
        plaintext.len().checked_sub(pad)?
    } else {
        plaintext.len()
    };

    let start = if !has_extension {
        0
    } else if mode.is_rtpsize() {
        // Preamble travels in the clear; only the extension body was encrypted.
        let header_len = rtp_header_len(packet)?;
        let words = packet.get(header_len + 2..header_len + 4)?;
        4 * usize::from(u16::from_be_bytes([words[0], words[1]]))
    } else {
        let words = plaintext.get(2..4)?;
        4 + 4 * usize::from(u16::from_be_bytes([words[0], words[1]]))
    };

    plaintext.get(start..end)
}

#[instrument(skip(interconnect, rx, crypto, udp_socket))]
pub(crate) async fn runner(
    interconnect: Interconnect,
    rx: Receiver<UdpRxMessage>,
    crypto: EncryptionContext,
    udp_socket: Arc<UdpSocket>,
    poll_timeout: Duration,
) {
    info!("UDP receive handle started.");

    let mut state = UdpRx {
        crypto,
        ssrc_map: HashMap::new(),
        packet_buffer: [0u8; VOICE_PACKET_MAX],
        rx,
        udp_socket,
        poll_timeout,
        decrypt_failures: 0,
    };

    state.run(&interconnect).await;

    info!("UDP receive handle stopped.");
}

#[cfg(test)]
mod tests {
    use earshot_voice_model::id::UserId;

    use super::*;
    use crate::driver::crypto::tests::{hex, KEY, XCHACHA};
    use crate::ssrc::SsrcTable;

    const POLL: Duration = Duration::from_millis(50);

    struct Harness {
        interconnect: Interconnect,
        audio_rx: Receiver<AudioMessage>,
        core_rx: Receiver<CoreMessage>,
        poison: flume::Sender<UdpRxMessage>,
        remote: UdpSocket,
        task: tokio::task::JoinHandle<()>,
    }

    async fn harness() -> Harness {
        let (core, core_rx) = flume::unbounded();
        let (audio, audio_rx) = flume::unbounded();
        let (events, _) = flume::unbounded();
        let interconnect = Interconnect {
            core,
            audio,
            events,
            ssrcs: Arc::new(SsrcTable::new()),
        };

        let local = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let remote = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        remote.connect(local.local_addr().unwrap()).await.unwrap();

        let crypto = EncryptionContext::new(CryptoMode::XChaCha20Poly1305, &hex(KEY)).unwrap();
        let (poison, rx) = flume::unbounded();
        let task = tokio::spawn(runner(interconnect.clone(), rx, crypto, Arc::new(local), POLL));

        Harness {
            interconnect,
            audio_rx,
            core_rx,
            poison,
            remote,
            task,
        }
    }

    async fn next_audio(rx: &Receiver<AudioMessage>) -> AudioMessage {
        tokio::time::timeout(Duration::from_secs(2), rx.recv_async()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn packets_are_attributed_and_speech_ends_when_quiet() {
        let h = harness().await;
        let alice = UserId(77);
        h.interconnect.ssrcs.insert(1001, alice);

        let packet = hex(XCHACHA);
        let mut tampered = packet.clone();
        tampered[RTP_HEADER_LEN + 1] ^= 0x01;

        h.remote.send(&packet).await.unwrap();
        h.remote.send(&tampered).await.unwrap();

        match next_audio(&h.audio_rx).await {
            AudioMessage::Packet {
                ssrc,
                speaker,
                frame,
                missed,
            } => {
                assert_eq!(ssrc, 1001);
                assert_eq!(speaker, Some(alice));
                assert_eq!(frame, SILENT_FRAME.to_vec());
                assert_eq!(missed, 0);
            },
            other => panic!("expected a packet, got {other:?}"),
        }

        assert!(matches!(next_audio(&h.audio_rx).await, AudioMessage::SpeechEnd {
            ssrc: 1001
        }));

        h.poison.send(UdpRxMessage::Poison).unwrap();
        h.task.await.unwrap();

        assert!(h.audio_rx.is_empty());
        assert!(h.core_rx.is_empty());
    }

    #[tokio::test]
    async fn unknown_ssrc_is_still_delivered() {
        let h = harness().await;

        h.remote.send(&hex(XCHACHA)).await.unwrap();

        assert!(matches!(next_audio(&h.audio_rx).await, AudioMessage::Packet {
            ssrc: 1001,
            speaker: None,
            ..
        }));

        h.poison.send(UdpRxMessage::Poison).unwrap();
        h.task.await.unwrap();
    }

    fn header(first: u8) -> Vec<u8> {
        let mut packet = vec![first, 0x78, 0, 1, 0, 0, 0, 0, 0, 0, 0, 42];
        packet.resize(RTP_HEADER_LEN, 0);
        packet
    }

    #[test]
    fn plain_payload_is_untouched() {
        let packet = header(0x80);
        let plaintext = [0xf8, 0xff, 0xfe];

        assert_eq!(opus_payload(&packet, CryptoMode::Normal, &plaintext), Some(&plaintext[..]));
    }

    #[test]
    fn padding_is_stripped() {
        let packet = header(0xa0);
        let plaintext = [1, 2, 3, 0, 0, 3];

        assert_eq!(opus_payload(&packet, CryptoMode::Suffix, &plaintext), Some(&[1, 2, 3][..]));
    }

    #[test]
    fn legacy_extension_includes_preamble() {
        let packet = header(0x90);
        let plaintext = [0xbe, 0xde, 0, 1, 9, 9, 9, 9, 7, 7];

        assert_eq!(opus_payload(&packet, CryptoMode::Normal, &plaintext), Some(&[7, 7][..]));
    }

    #[test]
    fn rtpsize_extension_preamble_is_in_header() {
        let mut packet = header(0x90);
        packet.extend_from_slice(&[0xbe, 0xde, 0, 2]);
        let plaintext = [1, 1, 1, 1, 2, 2, 2, 2, 5, 6];

        assert_eq!(opus_payload(&packet, CryptoMode::Aes256Gcm, &plaintext), Some(&[5, 6][..]));
    }

    #[test]
    fn overlong_extension_is_rejected() {
        let packet = header(0x90);
        let plaintext = [0xbe, 0xde, 0, 9, 1, 2];

        assert_eq!(opus_payload(&packet, CryptoMode::Normal, &plaintext), None);
    }

    #[test]
    fn sequence_tracking() {
        let now = Instant::now();
        let mut state = SsrcState::new(10, now);

        assert_eq!(state.advance(11, now), Some(0));
        assert_eq!(state.advance(14, now), Some(2));
        assert_eq!(state.advance(12, now), None);
        assert_eq!(state.advance(14, now), None);

        state.active = false;
        assert_eq!(state.advance(400, now), Some(0));
        assert!(state.active);
    }

    #[test]
    fn sequence_wraps() {
        let now = Instant::now();
        let mut state = SsrcState::new(u16::MAX, now);

        assert_eq!(state.advance(0, now), Some(0));
        assert_eq!(state.advance(2, now), Some(1));
    }
}
