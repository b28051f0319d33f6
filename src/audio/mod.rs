//! Received audio processing: Opus decode, stereo downmix, 48kHz to 16kHz decimation, and
//! silence-gated segmentation into utterances.
//!
//! Each stage is a plain function or struct so it can be used outside of a [`Session`]; the
//! session runs them on a dedicated worker thread fed by the UDP receive task.
//!
//! [`Session`]: crate::Session

pub mod convert;
pub mod decode;
pub mod segmenter;
pub(crate) mod worker;

pub use self::convert::{decimate, downmix, rms};
pub use self::decode::SpeakerDecoder;
pub use self::segmenter::Segmenter;
