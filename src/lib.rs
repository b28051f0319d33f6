//! Earshot is a receive-only voice client for the Discord voice protocol.
//!
//! A [`Session`] logs in through the main gateway, joins one voice channel, and from then on
//! turns the encrypted RTP traffic of everyone speaking there into [`AudioSegment`]s: mono
//! 16 kHz utterances split on silence, ready for a speech recogniser.
//!
//! The pieces are usable on their own, too:
//!
//! - [`gateway`] holds the main gateway's protocol state machine, which performs no I/O.
//! - [`driver`] runs the voice gateway, IP discovery, keep-alives and [packet decryption].
//! - [`audio`] decodes, downmixes, resamples and segments speech.
//!
//! No tracing subscriber is installed; events are logged through [`tracing`] for the hosting
//! application to collect, and human-readable status lines are also delivered as
//! [`SessionEvent::Log`].
//!
//! [packet decryption]: crate::driver::decrypt_packet
#![forbid(unsafe_code)]
#![warn(
    unused,
    rust_2018_idioms,
    clippy::unwrap_used,
    clippy::clone_on_ref_ptr,
    clippy::fallible_impl_from,
    clippy::pedantic
)]
#![allow(
    // Allowed as they are too pedantic
    clippy::cast_possible_truncation,
    clippy::module_name_repetitions,
    clippy::unreadable_literal,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    clippy::doc_markdown,
    clippy::missing_panics_doc,
    clippy::let_underscore_must_use
)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

#[macro_use]
mod internal;

pub mod audio;
mod config;
pub mod constants;
pub mod driver;
mod error;
mod events;
pub mod gateway;
pub mod heartbeat;
mod info;
mod session;
pub mod ssrc;
pub mod ws;

pub use earshot_voice_model::id;

pub use crate::config::{Config, Credentials};
pub use crate::error::{Error, Result};
pub use crate::events::{AudioSegment, DisconnectReason, SessionEvent};
pub use crate::info::ConnectionInfo;
pub use crate::session::Session;
