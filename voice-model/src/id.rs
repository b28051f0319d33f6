//! A collection of newtypes defining type-strong IDs.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::util::json_safe_u64;

macro_rules! id_u64 {
    ($($(#[$attr:meta])* $name:ident;)*) => {
        $(
            $(#[$attr])*
            #[derive(
                Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
                Serialize,
            )]
            pub struct $name(#[serde(with = "json_safe_u64")] pub u64);

            impl $name {
                /// Retrieves the inner ID as a [`u64`].
                #[must_use]
                pub const fn get(self) -> u64 {
                    self.0
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    fmt::Display::fmt(&self.0, f)
                }
            }

            impl From<u64> for $name {
                fn from(id: u64) -> Self {
                    Self(id)
                }
            }
        )*
    }
}

id_u64! {
    /// ID of a voice channel.
    ChannelId;
    /// ID of a guild (server) which owns voice channels.
    GuildId;
    /// ID of a user, including the client's own account.
    UserId;
}
