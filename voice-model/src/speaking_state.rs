use std::fmt;

use bitflags::bitflags;
use serde::de::{Deserializer, Error as DeError, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Flag set describing how a speaker is sending audio.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct SpeakingState: u8 {
        /// Normal transmission of voice audio.
        const MICROPHONE = 1;

        /// Transmission of context audio for video, no speaking indicator.
        const SOUNDSHARE = 1 << 1;

        /// Priority speaker, lowering audio of other speakers.
        const PRIORITY = 1 << 2;
    }
}

impl SpeakingState {
    pub fn microphone(self) -> bool {
        self.contains(Self::MICROPHONE)
    }

    pub fn soundshare(self) -> bool {
        self.contains(Self::SOUNDSHARE)
    }

    pub fn priority(self) -> bool {
        self.contains(Self::PRIORITY)
    }

    /// Whether any form of audio transmission is flagged.
    pub fn is_speaking(self) -> bool {
        !self.is_empty()
    }
}

struct SpeakingVisitor;

impl<'de> Visitor<'de> for SpeakingVisitor {
    type Value = SpeakingState;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a speaking bitfield or boolean")
    }

    fn visit_u64<E: DeError>(self, value: u64) -> Result<Self::Value, E> {
        // Unknown high bits are ignored, as are future flags.
        Ok(SpeakingState::from_bits_truncate((value & 0xff) as u8))
    }

    fn visit_i64<E: DeError>(self, value: i64) -> Result<Self::Value, E> {
        u64::try_from(value)
            .map_err(|_| E::custom("negative speaking bitfield"))
            .and_then(|v| self.visit_u64(v))
    }

    // Older gateway revisions sent a plain boolean.
    fn visit_bool<E: DeError>(self, value: bool) -> Result<Self::Value, E> {
        Ok(if value { SpeakingState::MICROPHONE } else { SpeakingState::empty() })
    }
}

impl<'de> Deserialize<'de> for SpeakingState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(SpeakingVisitor)
    }
}

impl Serialize for SpeakingState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(self.bits())
    }
}
