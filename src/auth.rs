//! Identity token verification.
//!
//! Credential storage and token issuance belong to the external account
//! layer; the core only receives a signed identity token on the connection
//! query string and verifies it against the shared secret. The token is
//! three dot-separated base64url segments: user id, display name, and an
//! HMAC-SHA256 tag over both.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// A verified identity handed to the session engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
}

/// Verifies identity tokens minted with the shared secret.
pub struct TokenVerifier {
    secret: Vec<u8>,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    fn tag(&self, user_id: &str, username: &str) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(user_id.as_bytes());
        mac.update(b"\n");
        mac.update(username.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    /// Mint a token for the given identity.
    ///
    /// In production the account layer does this with the same secret; the
    /// server keeps it for operator tooling and tests.
    pub fn sign(&self, identity: &Identity) -> String {
        let tag = self.tag(&identity.user_id, &identity.username);
        format!(
            "{}.{}.{}",
            URL_SAFE_NO_PAD.encode(&identity.user_id),
            URL_SAFE_NO_PAD.encode(&identity.username),
            URL_SAFE_NO_PAD.encode(tag),
        )
    }

    /// Verify a token, returning the identity it carries.
    ///
    /// The tag comparison is constant-time; any structural defect returns
    /// `None` rather than an error since the caller always rejects the
    /// handshake the same way.
    pub fn verify(&self, token: &str) -> Option<Identity> {
        let mut parts = token.split('.');
        let user_id = decode_utf8(parts.next()?)?;
        let username = decode_utf8(parts.next()?)?;
        let given_tag = URL_SAFE_NO_PAD.decode(parts.next()?).ok()?;
        if parts.next().is_some() {
            return None;
        }

        let expected = self.tag(&user_id, &username);
        if bool::from(expected.as_slice().ct_eq(&given_tag)) {
            Some(Identity { user_id, username })
        } else {
            None
        }
    }
}

fn decode_utf8(segment: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(segment).ok()?;
    String::from_utf8(bytes).ok()
}
