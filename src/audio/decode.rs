//! Per-speaker Opus decoding with recovery from decoder desync.
use audiopus::coder::Decoder as OpusDecoder;
use audiopus::{Channels, Error as OpusError};
use tracing::{debug, warn};

use crate::constants::{MAX_OPUS_FRAME_SIZE, SAMPLE_RATE, STEREO_FRAME_SIZE};

/// An Opus decoder for one RTP source, rebuilt after repeated failures.
///
/// Decoder state can become unrecoverably desynchronised (e.g. after a burst of corrupt
/// packets), at which point every later frame fails too.
pub struct SpeakerDecoder {
    decoder: OpusDecoder,
    consecutive_errors: u32,
    error_threshold: u32,
    resets: u32,
}

impl SpeakerDecoder {
    /// Creates a 48kHz stereo decoder, rebuilt after `error_threshold` consecutive failures.
    ///
    /// # Errors
    ///
    /// Fails if libopus cannot allocate a decoder.
    pub fn new(error_threshold: u32) -> Result<Self, OpusError> {
        Ok(Self {
            decoder: OpusDecoder::new(SAMPLE_RATE, Channels::Stereo)?,
            consecutive_errors: 0,
            error_threshold: error_threshold.max(1),
            resets: 0,
        })
    }

    /// Decodes `frame` to interleaved stereo PCM.
    ///
    /// `conceal` lost packets preceding the frame are filled in by packet loss concealment
    /// and prepended to the output.
    ///
    /// # Errors
    ///
    /// Returns the decoder's error for a frame it could not decode. The failure is counted,
    /// and once the threshold is reached the decoder is replaced.
    pub fn decode(&mut self, frame: &[u8], conceal: u16) -> Result<Vec<i16>, OpusError> {
        let mut out = Vec::with_capacity(STEREO_FRAME_SIZE * (usize::from(conceal) + 1));
        let mut buf = vec![0i16; 2 * MAX_OPUS_FRAME_SIZE];

        for _ in 0..conceal {
            let missing: Option<&[u8]> = None;
            match self.decoder.decode(missing, &mut buf[..STEREO_FRAME_SIZE], false) {
                Ok(len) => out.extend_from_slice(&buf[..2 * len]),
                Err(e) => warn!("Issue while concealing missed packet: {:?}.", e),
            }
        }

        match self.decoder.decode(Some(frame), &mut buf[..], false) {
            Ok(len) => {
                self.consecutive_errors = 0;

                // Length is per channel.
                out.extend_from_slice(&buf[..2 * len]);
                Ok(out)
            },
            Err(e) => {
                self.record_error()?;
                Err(e)
            },
        }
    }

    fn record_error(&mut self) -> Result<(), OpusError> {
        self.consecutive_errors += 1;

        if self.consecutive_errors >= self.error_threshold {
            warn!(
                "{} consecutive decode failures, rebuilding Opus decoder.",
                self.consecutive_errors
            );

            self.decoder = OpusDecoder::new(SAMPLE_RATE, Channels::Stereo)?;
            self.consecutive_errors = 0;
            self.resets += 1;
        } else {
            debug!("Decode failure {}/{}.", self.consecutive_errors, self.error_threshold);
        }

        Ok(())
    }

    /// Number of failures since the last good frame.
    #[must_use]
    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// Number of times the decoder has been rebuilt.
    #[must_use]
    pub fn resets(&self) -> u32 {
        self.resets
    }
}
