use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use peer_transport::SessionDescription;
use rand::RngCore;
use rand::rngs::OsRng;
use tracing::{debug, trace};

use super::{EnvelopeFault, SignalingError, SignalingKey};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const ENVELOPE_AAD: &[u8] = b"pastelink:signaling:v1";

/// Seals descriptions into `base64url(nonce || ciphertext || tag)` tokens.
#[derive(Clone)]
pub struct SignalingCodec {
    cipher: ChaCha20Poly1305,
}

impl SignalingCodec {
    pub fn new(key: &SignalingKey) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key.as_bytes())),
        }
    }

    pub fn encrypt(&self, description: &SessionDescription) -> Result<String, SignalingError> {
        let wire = description
            .to_wire()
            .map_err(|err| SignalingError::MalformedDescription(err.to_string()))?;
        let token = self.seal(wire.as_bytes())?;
        debug!(
            target = "signaling",
            kind = %description.kind,
            plaintext_bytes = wire.len(),
            token_chars = token.len(),
            "sealed session description"
        );
        Ok(token)
    }

    pub fn decrypt(&self, token: &str) -> Result<SessionDescription, SignalingError> {
        let plaintext = self.open(token)?;
        let text =
            String::from_utf8(plaintext).map_err(|_| SignalingError::InvalidEnvelope(EnvelopeFault::Utf8))?;
        let description = SessionDescription::from_wire(&text)
            .map_err(|err| SignalingError::MalformedDescription(err.to_string()))?;
        debug!(target = "signaling", kind = %description.kind, "opened session description");
        Ok(description)
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<String, SignalingError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad: ENVELOPE_AAD,
                },
            )
            .map_err(|err| SignalingError::Seal(err.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    /// Open a token. Whitespace anywhere in it is ignored, since pasted text
    /// often arrives wrapped.
    pub fn open(&self, token: &str) -> Result<Vec<u8>, SignalingError> {
        let compact: String = token.split_whitespace().collect();
        let compact = compact.trim_end_matches('=');
        if compact.is_empty() {
            return Err(SignalingError::InvalidEnvelope(EnvelopeFault::Empty));
        }
        let sealed = URL_SAFE_NO_PAD
            .decode(compact)
            .map_err(|_| SignalingError::InvalidEnvelope(EnvelopeFault::Encoding))?;
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(SignalingError::InvalidEnvelope(EnvelopeFault::Truncated));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: ENVELOPE_AAD,
                },
            )
            .map_err(|_| {
                trace!(target = "signaling", bytes = sealed.len(), "token failed authentication");
                SignalingError::InvalidEnvelope(EnvelopeFault::Authentication)
            })
    }
}
