use enum_primitive::*;

enum_from_primitive! {
/// Voice gateway websocket close codes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CloseCode {
    /// Invalid Voice OP Code.
    UnknownOpcode = 4001,

    /// Invalid identification payload sent.
    InvalidPayload = 4002,

    /// A payload was sent prior to identifying.
    NotAuthenticated = 4003,

    /// The account token sent with the identify payload was incorrect.
    AuthenticationFailed = 4004,

    /// More than one identify payload was sent.
    AlreadyAuthenticated = 4005,

    /// The session is no longer valid.
    SessionInvalid = 4006,

    /// A session timed out.
    SessionTimeout = 4009,

    /// The server for the last connection attempt could not be found.
    ServerNotFound = 4011,

    /// The voice protocol chosen was not recognised.
    UnknownProtocol = 4012,

    /// Disconnected, either due to channel closure/removal
    /// or kicking.
    ///
    /// Should not reconnect.
    Disconnected = 4014,

    /// Connected voice server crashed.
    ///
    /// Should resume.
    VoiceServerCrash = 4015,

    /// The encryption scheme was not recognised.
    UnknownEncryptionMode = 4016,
}
}

impl CloseCode {
    /// Indicates whether a voice client should attempt to resume in response to this close code.
    ///
    /// Otherwise, the connection should either be rebuilt from scratch or abandoned
    /// (see [`Self::should_abandon`]).
    pub fn should_resume(&self) -> bool {
        matches!(self, CloseCode::VoiceServerCrash | CloseCode::SessionTimeout)
    }

    /// Indicates whether the voice session is over and must not be reconnected.
    pub fn should_abandon(&self) -> bool {
        matches!(self, CloseCode::Disconnected | CloseCode::AuthenticationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_codes_map_from_raw_values() {
        assert_eq!(CloseCode::from_u16(4014), Some(CloseCode::Disconnected));
        assert_eq!(CloseCode::from_u16(4015), Some(CloseCode::VoiceServerCrash));
        assert_eq!(CloseCode::from_u16(1000), None);
    }

    #[test]
    fn resume_and_abandon_are_disjoint() {
        for raw in 4001..=4016u16 {
            if let Some(code) = CloseCode::from_u16(raw) {
                assert!(!(code.should_resume() && code.should_abandon()), "{:?}", code);
            }
        }
    }
}
