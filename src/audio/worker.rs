use std::collections::HashMap;
use std::time::Duration;

use earshot_voice_model::id::UserId;
use flume::{Receiver, Sender};
use tracing::{debug, error, info, instrument, trace, warn};

use super::convert::{decimate, downmix};
use super::decode::SpeakerDecoder;
use super::segmenter::Segmenter;
use crate::config::Config;
use crate::constants::{DECIMATION_FACTOR, SEGMENT_SAMPLE_RATE};
use crate::driver::tasks::message::AudioMessage;
use crate::events::{AudioSegment, SessionEvent};

/// Audio pipeline settings, taken from the session [`Config`].
#[derive(Clone, Debug)]
pub(crate) struct AudioSettings {
    pub silence_threshold: f32,
    pub silence_flush: Duration,
    pub min_segment: Duration,
    pub max_segment: Duration,
    pub decode_error_threshold: u32,
    pub max_concealed_frames: u16,
    pub target_speaker: Option<UserId>,
}

impl AudioSettings {
    pub fn new(config: &Config, target_speaker: Option<UserId>) -> Self {
        Self {
            silence_threshold: config.silence_threshold,
            silence_flush: config.silence_flush,
            min_segment: config.min_segment,
            max_segment: config.max_segment,
            decode_error_threshold: config.decode_error_threshold,
            max_concealed_frames: config.max_concealed_frames,
            target_speaker,
        }
    }
}

struct SpeakerState {
    speaker: Option<UserId>,
    decoder: Option<SpeakerDecoder>,
    segmenter: Segmenter,
}

pub(crate) struct AudioWorker {
    settings: AudioSettings,
    speakers: HashMap<u32, SpeakerState>,
    events: Sender<SessionEvent>,
}

impl AudioWorker {
    pub fn new(settings: AudioSettings, events: Sender<SessionEvent>) -> Self {
        Self {
            settings,
            speakers: HashMap::new(),
            events,
        }
    }

    /// Handles one message, returning `false` once the worker should exit.
    pub fn handle(&mut self, msg: AudioMessage) -> bool {
        match msg {
            AudioMessage::Packet {
                ssrc,
                speaker,
                frame,
                missed,
            } => self.process_packet(ssrc, speaker, &frame, missed),
            AudioMessage::SpeechEnd {
                ssrc,
            } => {
                trace!("Speech end on SSRC {}.", ssrc);
                self.flush(ssrc);
            },
            AudioMessage::Speaking {
                ssrc,
                speaker,
                speaking,
            } => {
                let state = self.state(ssrc);
                state.speaker = Some(speaker);

                if speaking {
                    state.segmenter.clear();
                } else {
                    self.flush(ssrc);
                }
            },
            AudioMessage::Forget {
                ssrc,
            } => {
                self.flush(ssrc);
                self.speakers.remove(&ssrc);
            },
            AudioMessage::Reset => {
                debug!("Dropping {} speaker buffers.", self.speakers.len());
                self.speakers.clear();
            },
            AudioMessage::Poison => {
                self.speakers.clear();
                return false;
            },
        }

        true
    }

    fn state(&mut self, ssrc: u32) -> &mut SpeakerState {
        let settings = &self.settings;

        self.speakers.entry(ssrc).or_insert_with(|| SpeakerState {
            speaker: None,
            decoder: None,
            segmenter: Segmenter::new(
                SEGMENT_SAMPLE_RATE,
                settings.silence_threshold,
                settings.silence_flush,
                settings.min_segment,
            )
            .max_length(settings.max_segment),
        })
    }

    fn process_packet(&mut self, ssrc: u32, speaker: Option<UserId>, frame: &[u8], missed: u16) {
        let error_threshold = self.settings.decode_error_threshold;
        let conceal = missed.min(self.settings.max_concealed_frames);
        let state = self.state(ssrc);

        if speaker.is_some() {
            state.speaker = speaker;
        }

        if state.decoder.is_none() {
            match SpeakerDecoder::new(error_threshold) {
                Ok(decoder) => state.decoder = Some(decoder),
                Err(e) => {
                    error!("Failed to create Opus decoder for SSRC {}: {:?}.", ssrc, e);
                    return;
                },
            }
        }

        let Some(decoder) = state.decoder.as_mut() else {
            return;
        };

        let stereo = match decoder.decode(frame, conceal) {
            Ok(pcm) => pcm,
            Err(e) => {
                warn!("Dropping undecodable packet from SSRC {}: {:?}.", ssrc, e);
                return;
            },
        };

        let mono = decimate(&downmix(&stereo), DECIMATION_FACTOR);

        if let Some(samples) = state.segmenter.push(&mono) {
            let speaker = state.speaker;
            self.emit(ssrc, speaker, samples);
        }
    }

    fn flush(&mut self, ssrc: u32) {
        let Some(state) = self.speakers.get_mut(&ssrc) else {
            return;
        };

        if let Some(samples) = state.segmenter.flush() {
            let speaker = state.speaker;
            self.emit(ssrc, speaker, samples);
        }
    }

    fn emit(&self, ssrc: u32, speaker: Option<UserId>, samples: Vec<i16>) {
        if let Some(target) = self.settings.target_speaker {
            if speaker != Some(target) {
                trace!("Ignoring segment from {:?} on SSRC {}.", speaker, ssrc);
                return;
            }
        }

        let segment = AudioSegment {
            speaker,
            ssrc,
            samples,
            sample_rate: SEGMENT_SAMPLE_RATE,
            channels: 1,
        };

        debug!("Segment of {}ms from {:?}.", segment.duration_ms(), speaker);

        let _ = self.events.send(SessionEvent::SpeechSegmentReady(segment));
    }
}

#[instrument(skip(settings, rx, events))]
pub(crate) fn runner(
    settings: AudioSettings,
    rx: Receiver<AudioMessage>,
    events: Sender<SessionEvent>,
) {
    info!("Audio worker started.");

    let mut worker = AudioWorker::new(settings, events);

    while let Ok(msg) = rx.recv() {
        if !worker.handle(msg) {
            break;
        }
    }

    info!("Audio worker finished.");
}

#[cfg(test)]
mod tests {
    use audiopus::coder::Encoder;
    use audiopus::{Application, Channels};

    use super::*;
    use crate::constants::{MONO_FRAME_SIZE, SAMPLE_RATE, SILENT_FRAME, STEREO_FRAME_SIZE};

    const ALICE: UserId = UserId(42);

    fn settings() -> AudioSettings {
        AudioSettings::new(&Config::default(), None)
    }

    fn tone_frames(count: usize) -> Vec<Vec<u8>> {
        let mut encoder = Encoder::new(SAMPLE_RATE, Channels::Stereo, Application::Voip).unwrap();
        let mut out = Vec::new();
        let mut t = 0usize;

        for _ in 0..count {
            let mut pcm = Vec::with_capacity(STEREO_FRAME_SIZE);
            for _ in 0..MONO_FRAME_SIZE {
                let phase = t as f32 * 440.0 * std::f32::consts::TAU / 48_000.0;
                let sample = (phase.sin() * 8000.0) as i16;
                pcm.push(sample);
                pcm.push(sample);
                t += 1;
            }

            let mut packet = vec![0u8; 1275];
            let len = encoder.encode(&pcm, &mut packet).unwrap();
            packet.truncate(len);
            out.push(packet);
        }

        out
    }

    fn packet(ssrc: u32, speaker: Option<UserId>, frame: Vec<u8>) -> AudioMessage {
        AudioMessage::Packet {
            ssrc,
            speaker,
            frame,
            missed: 0,
        }
    }

    fn segments(rx: &Receiver<SessionEvent>) -> Vec<AudioSegment> {
        rx.drain()
            .filter_map(|evt| match evt {
                SessionEvent::SpeechSegmentReady(seg) => Some(seg),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn speech_end_flushes_attributed_segment() {
        let (tx, rx) = flume::unbounded();
        let mut worker = AudioWorker::new(settings(), tx);

        for frame in tone_frames(40) {
            assert!(worker.handle(packet(7, Some(ALICE), frame)));
        }
        worker.handle(AudioMessage::SpeechEnd {
            ssrc: 7,
        });

        let segs = segments(&rx);
        assert_eq!(segs.len(), 1);

        let seg = &segs[0];
        assert_eq!(seg.speaker, Some(ALICE));
        assert_eq!(seg.sample_rate, 16_000);
        assert_eq!(seg.channels, 1);
        assert!(seg.samples.len() >= 8000 && seg.samples.len() <= 40 * 320);
    }

    #[test]
    fn silence_frames_close_the_utterance() {
        let (tx, rx) = flume::unbounded();
        let mut worker = AudioWorker::new(settings(), tx);

        for frame in tone_frames(40) {
            worker.handle(packet(7, None, frame));
        }
        for _ in 0..60 {
            worker.handle(packet(7, None, SILENT_FRAME.to_vec()));
        }

        let segs = segments(&rx);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].speaker, None);
    }

    #[test]
    fn speaking_start_drops_stale_audio() {
        let (tx, rx) = flume::unbounded();
        let mut worker = AudioWorker::new(settings(), tx);

        for frame in tone_frames(40) {
            worker.handle(packet(7, None, frame));
        }
        worker.handle(AudioMessage::Speaking {
            ssrc: 7,
            speaker: ALICE,
            speaking: true,
        });
        worker.handle(AudioMessage::Speaking {
            ssrc: 7,
            speaker: ALICE,
            speaking: false,
        });

        assert!(segments(&rx).is_empty());
    }

    #[test]
    fn speaking_stop_flushes_immediately() {
        let (tx, rx) = flume::unbounded();
        let mut worker = AudioWorker::new(settings(), tx);

        for frame in tone_frames(40) {
            worker.handle(packet(7, None, frame));
        }
        worker.handle(AudioMessage::Speaking {
            ssrc: 7,
            speaker: ALICE,
            speaking: false,
        });

        let segs = segments(&rx);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].speaker, Some(ALICE));
    }

    #[test]
    fn other_speakers_are_filtered_by_target() {
        let (tx, rx) = flume::unbounded();
        let mut worker = AudioWorker::new(AudioSettings::new(&Config::default(), Some(ALICE)), tx);
        let frames = tone_frames(40);

        for frame in &frames {
            worker.handle(packet(1, Some(UserId(99)), frame.clone()));
            worker.handle(packet(2, Some(ALICE), frame.clone()));
        }
        worker.handle(AudioMessage::SpeechEnd {
            ssrc: 1,
        });
        worker.handle(AudioMessage::SpeechEnd {
            ssrc: 2,
        });

        let segs = segments(&rx);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].ssrc, 2);
    }

    #[test]
    fn reset_and_poison_emit_nothing() {
        let (tx, rx) = flume::unbounded();
        let mut worker = AudioWorker::new(settings(), tx);

        for frame in tone_frames(40) {
            worker.handle(packet(7, None, frame));
        }
        assert!(worker.handle(AudioMessage::Reset));
        worker.handle(AudioMessage::SpeechEnd {
            ssrc: 7,
        });

        for frame in tone_frames(40) {
            worker.handle(packet(8, None, frame));
        }
        assert!(!worker.handle(AudioMessage::Poison));

        assert!(segments(&rx).is_empty());
    }

    #[test]
    fn undecodable_packets_are_dropped() {
        let (tx, rx) = flume::unbounded();
        let mut worker = AudioWorker::new(settings(), tx);

        for _ in 0..20 {
            assert!(worker.handle(packet(7, None, vec![])));
        }

        assert!(segments(&rx).is_empty());
    }
}
