//! Silence-gated accumulation of one speaker's audio into utterances.
use std::time::Duration;

use super::convert::rms;

/// Accumulates mono PCM chunks until enough silence, or an explicit end of speech, closes
/// the utterance.
///
/// Silence before the first loud chunk is not kept, and silence after the last loud chunk is
/// trimmed when the utterance is closed, so segments hold only the speech portion and the
/// pauses inside it. An utterance which reaches the maximum length set by
/// [`Self::max_length`] is closed at once, even mid-speech.
#[derive(Clone, Debug)]
pub struct Segmenter {
    buffer: Vec<i16>,
    /// Length of `buffer` up to the end of the last loud chunk.
    speech_end: usize,
    silent_samples: usize,
    threshold: f32,
    flush_samples: usize,
    min_samples: usize,
    max_samples: usize,
    sample_rate: u32,
}

impl Segmenter {
    /// Creates a segmenter for audio at `sample_rate`.
    ///
    /// Chunks with an RMS level below `threshold` count as silence; `flush_after` of silence
    /// ends an utterance, and utterances shorter than `min_length` are discarded.
    #[must_use]
    pub fn new(
        sample_rate: u32,
        threshold: f32,
        flush_after: Duration,
        min_length: Duration,
    ) -> Self {
        Self {
            buffer: Vec::new(),
            speech_end: 0,
            silent_samples: 0,
            threshold,
            flush_samples: samples_in(sample_rate, flush_after),
            min_samples: samples_in(sample_rate, min_length),
            max_samples: usize::MAX,
            sample_rate,
        }
    }

    /// Caps the length of an utterance. Unbounded by default.
    #[must_use]
    pub fn max_length(mut self, max_length: Duration) -> Self {
        self.max_samples = samples_in(self.sample_rate, max_length).max(1);
        self
    }

    /// Adds a chunk, returning a finished utterance if this chunk completed the silence
    /// needed to close one.
    pub fn push(&mut self, chunk: &[i16]) -> Option<Vec<i16>> {
        if chunk.is_empty() {
            return None;
        }

        if rms(chunk) >= self.threshold {
            self.buffer.extend_from_slice(chunk);
            self.speech_end = self.buffer.len();
            self.silent_samples = 0;

            if self.buffer.len() >= self.max_samples {
                return self.flush();
            }

            return None;
        }

        if self.speech_end == 0 {
            return None;
        }

        self.buffer.extend_from_slice(chunk);
        self.silent_samples += chunk.len();

        if self.silent_samples >= self.flush_samples || self.buffer.len() >= self.max_samples {
            self.flush()
        } else {
            None
        }
    }

    /// Closes the current utterance, returning it if it is long enough to keep.
    pub fn flush(&mut self) -> Option<Vec<i16>> {
        let mut out = std::mem::take(&mut self.buffer);
        out.truncate(self.speech_end);

        self.speech_end = 0;
        self.silent_samples = 0;

        (!out.is_empty() && out.len() >= self.min_samples).then_some(out)
    }

    /// Drops the current utterance.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.speech_end = 0;
        self.silent_samples = 0;
    }

    /// Number of samples of speech currently held.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.speech_end
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.speech_end == 0
    }
}

fn samples_in(sample_rate: u32, length: Duration) -> usize {
    (u128::from(sample_rate) * length.as_millis() / 1000) as usize
}
