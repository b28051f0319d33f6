//! Encryption schemes supported by secure RTP negotiation.
use std::error::Error as StdError;
use std::fmt;

use aes_gcm::Aes256Gcm;
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use xsalsa20poly1305::aead::{Aead, AeadInPlace, KeyInit, Payload};
use xsalsa20poly1305::{Nonce, Tag, XSalsa20Poly1305, NONCE_SIZE};

use crate::constants::{RTP_HEADER_LEN, RTP_VERSION, TAG_LEN};

/// Length of the trailing packet counter used by the size-aware AEAD modes.
const COUNTER_LEN: usize = 4;

/// Length of the explicit nonce carried by the legacy suffix layout.
const SHORT_SUFFIX_LEN: usize = 12;

/// Encryption modes understood when decrypting received voice packets.
///
/// Variants are declared in negotiation preference order.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
#[non_exhaustive]
pub enum CryptoMode {
    /// AES-256-GCM with a 32-bit trailing counter as the IV source. The unencrypted
    /// RTP header is authenticated as associated data.
    Aes256Gcm,
    /// XChaCha20-Poly1305 with a 32-bit trailing counter as the nonce source. The
    /// unencrypted RTP header is authenticated as associated data.
    XChaCha20Poly1305,
    /// XSalsa20-Poly1305, with a 24B nonce appended to each packet.
    Suffix,
    /// XSalsa20-Poly1305, using the RTP header as the source of nonce bytes.
    Normal,
}

impl CryptoMode {
    /// Every supported mode, most preferred first.
    pub const PREFERENCE: [Self; 4] =
        [Self::Aes256Gcm, Self::XChaCha20Poly1305, Self::Suffix, Self::Normal];

    /// Returns the name of a mode as it will appear during negotiation.
    #[must_use]
    pub fn to_request_str(self) -> &'static str {
        match self {
            Self::Aes256Gcm => "aead_aes256_gcm_rtpsize",
            Self::XChaCha20Poly1305 => "aead_xchacha20_poly1305_rtpsize",
            Self::Suffix => "xsalsa20_poly1305_suffix",
            Self::Normal => "xsalsa20_poly1305",
        }
    }

    /// Parses a mode name as it appears during negotiation.
    #[must_use]
    pub fn from_request_str(name: &str) -> Option<Self> {
        Self::PREFERENCE.into_iter().find(|mode| mode.to_request_str() == name)
    }

    /// Whether this mode leaves the RTP header extension preamble in the clear.
    #[must_use]
    pub fn is_rtpsize(self) -> bool {
        matches!(self, Self::Aes256Gcm | Self::XChaCha20Poly1305)
    }

    /// Picks the mode to request from those offered by a voice server.
    ///
    /// A `preferred` mode must itself be on offer; otherwise the best supported mode in
    /// [`Self::PREFERENCE`] order is chosen. Returns `None` if no offered mode is supported.
    pub fn negotiate<S: AsRef<str>>(offered: &[S], preferred: Option<Self>) -> Option<Self> {
        let is_offered =
            |mode: Self| offered.iter().any(|name| name.as_ref() == mode.to_request_str());

        match preferred {
            Some(mode) => is_offered(mode).then_some(mode),
            None => Self::PREFERENCE.into_iter().find(|&mode| is_offered(mode)),
        }
    }
}

impl fmt::Display for CryptoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_request_str())
    }
}

/// Errors encountered while decrypting a single packet, or while building a cipher.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum CryptoError {
    /// The negotiated mode name is not one this library can decrypt.
    UnknownMode(String),
    /// The secret key had the wrong length for the mode's cipher.
    InvalidKey,
    /// The packet is too short to hold a header, tag and nonce for this mode.
    TooShort,
    /// The packet does not look like RTP media, and was not decrypted.
    NotMedia,
    /// Authentication failed: the packet was corrupted, forged or keyed differently.
    Authentication,
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownMode(mode) => write!(f, "Unsupported encryption mode {mode:?}"),
            Self::InvalidKey => f.write_str("Secret key has an invalid length"),
            Self::TooShort => f.write_str("Packet too short for encryption mode"),
            Self::NotMedia => f.write_str("Packet is not plausible RTP media"),
            Self::Authentication => f.write_str("Packet failed authentication"),
        }
    }
}

impl StdError for CryptoError {}

impl From<xsalsa20poly1305::aead::Error> for CryptoError {
    fn from(_: xsalsa20poly1305::aead::Error) -> Self {
        Self::Authentication
    }
}

#[derive(Clone)]
enum Cipher {
    Aes256Gcm(Box<Aes256Gcm>),
    XChaCha20Poly1305(XChaCha20Poly1305),
    XSalsa20Poly1305(XSalsa20Poly1305),
}

/// The negotiated mode and key for a voice session.
///
/// Immutable once built: a new session description produces a new context.
#[derive(Clone)]
pub struct EncryptionContext {
    mode: CryptoMode,
    cipher: Cipher,
}

impl fmt::Debug for EncryptionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionContext")
            .field("mode", &self.mode)
            .field("key", &"<secret>")
            .finish()
    }
}

impl EncryptionContext {
    /// Builds the cipher for `mode` from a 32-byte secret key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKey`] if the key length is wrong.
    pub fn new(mode: CryptoMode, key: &[u8]) -> Result<Self, CryptoError> {
        let cipher = match mode {
            CryptoMode::Aes256Gcm => Cipher::Aes256Gcm(Box::new(
                Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKey)?,
            )),
            CryptoMode::XChaCha20Poly1305 => Cipher::XChaCha20Poly1305(
                XChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::InvalidKey)?,
            ),
            CryptoMode::Suffix | CryptoMode::Normal => Cipher::XSalsa20Poly1305(
                XSalsa20Poly1305::new_from_slice(key).map_err(|_| CryptoError::InvalidKey)?,
            ),
        };

        Ok(Self {
            mode,
            cipher,
        })
    }

    #[must_use]
    pub fn mode(&self) -> CryptoMode {
        self.mode
    }

    /// Decrypts a full RTP datagram, returning the plaintext body which followed the header.
    ///
    /// For the size-aware modes the body still begins with any header extension's contents;
    /// for the legacy modes it begins with the whole extension, preamble included. The input
    /// is never modified, so a failed attempt leaves no trace.
    ///
    /// # Errors
    ///
    /// Fails if the packet is too short, implausible for an AEAD mode, or does not
    /// authenticate.
    pub fn decrypt(&self, packet: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let header_len = rtp_header_len(packet).ok_or(CryptoError::TooShort)?;

        match (&self.cipher, self.mode) {
            (Cipher::Aes256Gcm(cipher), _) => {
                let (aad, body, counter) = split_rtpsize(packet)?;

                let mut iv = [0u8; 12];
                iv[..COUNTER_LEN].copy_from_slice(counter);

                Ok(cipher.decrypt(aes_gcm::Nonce::from_slice(&iv), Payload {
                    msg: body,
                    aad,
                })?)
            },
            (Cipher::XChaCha20Poly1305(cipher), _) => {
                let (aad, body, counter) = split_rtpsize(packet)?;

                let mut nonce = [0u8; 24];
                nonce[..COUNTER_LEN].copy_from_slice(counter);

                Ok(cipher.decrypt(XNonce::from_slice(&nonce), Payload {
                    msg: body,
                    aad,
                })?)
            },
            (Cipher::XSalsa20Poly1305(cipher), CryptoMode::Suffix) => {
                // Full 24B trailing nonce first, then header + 12B trailer.
                decrypt_suffix(cipher, packet, header_len).or_else(|_| {
                    decrypt_short_suffix(cipher, packet, header_len)
                })
            },
            (Cipher::XSalsa20Poly1305(cipher), _) => {
                let mut nonce = Nonce::default();
                nonce[..RTP_HEADER_LEN].copy_from_slice(&packet[..RTP_HEADER_LEN]);

                secretbox_open(cipher, &nonce, &packet[header_len..])
            },
        }
    }
}

/// Decrypts `packet` under the mode named `mode`, as negotiated over the voice gateway.
///
/// Unknown mode names fail with [`CryptoError::UnknownMode`] rather than guessing.
///
/// # Errors
///
/// See [`EncryptionContext::new`] and [`EncryptionContext::decrypt`].
pub fn decrypt_packet(mode: &str, key: &[u8], packet: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mode = CryptoMode::from_request_str(mode)
        .ok_or_else(|| CryptoError::UnknownMode(mode.to_owned()))?;

    EncryptionContext::new(mode, key)?.decrypt(packet)
}

/// Length of the fixed RTP header plus its CSRC list.
pub(crate) fn rtp_header_len(packet: &[u8]) -> Option<usize> {
    let first = *packet.first()?;
    let len = RTP_HEADER_LEN + 4 * usize::from(first & 0x0f);

    (packet.len() >= len).then_some(len)
}

/// Length of the bytes left unencrypted by the size-aware modes: the RTP header, CSRCs and,
/// if present, the 4-byte header extension preamble.
pub(crate) fn rtpsize_header_len(packet: &[u8]) -> Option<usize> {
    let has_extension = packet.first()? & 0x10 != 0;
    let len = rtp_header_len(packet)? + if has_extension { 4 } else { 0 };

    (packet.len() >= len).then_some(len)
}

/// Whether a datagram could plausibly be encrypted RTP media for an AEAD mode.
///
/// RTCP shares the socket, and its payload types (72-76 once the marker bit is masked)
/// would otherwise be fed to the cipher as if they were media.
pub(crate) fn plausible_media(packet: &[u8]) -> bool {
    let (Some(&first), Some(&second)) = (packet.first(), packet.get(1)) else {
        return false;
    };

    let payload_type = second & 0x7f;

    first >> 6 == RTP_VERSION
        && !(72..=76).contains(&payload_type)
        && rtpsize_header_len(packet)
            .is_some_and(|header| packet.len() >= header + TAG_LEN + COUNTER_LEN)
}

fn split_rtpsize(packet: &[u8]) -> Result<(&[u8], &[u8], &[u8]), CryptoError> {
    if !plausible_media(packet) {
        return Err(CryptoError::NotMedia);
    }

    let header_len = rtpsize_header_len(packet).ok_or(CryptoError::TooShort)?;
    let (rest, counter) = packet.split_at(packet.len() - COUNTER_LEN);
    let (aad, body) = rest.split_at(header_len);

    Ok((aad, body, counter))
}

fn decrypt_suffix(
    cipher: &XSalsa20Poly1305,
    packet: &[u8],
    header_len: usize,
) -> Result<Vec<u8>, CryptoError> {
    let body_end = packet
        .len()
        .checked_sub(NONCE_SIZE)
        .filter(|&end| end >= header_len)
        .ok_or(CryptoError::TooShort)?;

    secretbox_open(cipher, Nonce::from_slice(&packet[body_end..]), &packet[header_len..body_end])
}

fn decrypt_short_suffix(
    cipher: &XSalsa20Poly1305,
    packet: &[u8],
    header_len: usize,
) -> Result<Vec<u8>, CryptoError> {
    let body_end = packet
        .len()
        .checked_sub(SHORT_SUFFIX_LEN)
        .filter(|&end| end >= header_len)
        .ok_or(CryptoError::TooShort)?;

    let mut nonce = Nonce::default();
    nonce[..RTP_HEADER_LEN].copy_from_slice(&packet[..RTP_HEADER_LEN]);
    nonce[RTP_HEADER_LEN..].copy_from_slice(&packet[body_end..]);

    secretbox_open(cipher, &nonce, &packet[header_len..body_end])
}

/// Opens a secretbox body laid out as `tag || ciphertext`.
fn secretbox_open(
    cipher: &XSalsa20Poly1305,
    nonce: &Nonce,
    body: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if body.len() < TAG_LEN {
        return Err(CryptoError::TooShort);
    }

    let (tag_bytes, data_bytes) = body.split_at(TAG_LEN);
    let mut plaintext = data_bytes.to_vec();

    cipher.decrypt_in_place_detached(nonce, b"", &mut plaintext, Tag::from_slice(tag_bytes))?;

    Ok(plaintext)
}
