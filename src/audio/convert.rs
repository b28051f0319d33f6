//! Sample format conversions.

/// Downmixes interleaved stereo to mono by keeping the left channel.
///
/// A trailing unpaired sample is dropped.
#[must_use]
pub fn downmix(stereo: &[i16]) -> Vec<i16> {
    stereo.chunks_exact(2).map(|pair| pair[0]).collect()
}

/// Keeps the first of every `factor` samples.
///
/// This is nearest-sample decimation with no anti-aliasing filter: good enough for speech
/// recognition, not for listening. The output holds exactly `samples.len() / factor` samples.
///
/// # Panics
///
/// Panics if `factor` is zero.
#[must_use]
pub fn decimate(samples: &[i16], factor: usize) -> Vec<i16> {
    samples.chunks_exact(factor).map(|chunk| chunk[0]).collect()
}

/// Root-mean-square level of `samples`, on the 16-bit sample scale.
#[must_use]
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();

    (sum / samples.len() as f64).sqrt() as f32
}
