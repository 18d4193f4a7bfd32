use anyhow::{anyhow, Result};
use hmac::{Hmac, Mac};
use nanoid::nanoid;
use sha2::Sha256;

pub const TOKEN_PREFIX: &str = "rly_";

/// Issues opaque delivery tokens bound to a subscriber id.
pub trait SessionTokenProvider: Send + Sync {
    fn create_session(&self, subscriber_id: &str) -> Result<String>;
}

/// Tokens of the form `rly_<nonce>.<mac>`, where the HMAC-SHA256 MAC covers the
/// nonce and the subscriber id. A transport holding the same secret can check
/// which subscriber a token belongs to without a database lookup.
#[derive(Clone)]
pub struct SignedTokenProvider {
    secret: String,
}

impl SignedTokenProvider {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn verify(&self, token: &str, subscriber_id: &str) -> bool {
        let Some((nonce, mac)) = token
            .strip_prefix(TOKEN_PREFIX)
            .and_then(|rest| rest.split_once('.'))
        else {
            return false;
        };
        let Ok(expected) = sign(&self.secret, nonce, subscriber_id) else {
            return false;
        };
        subtle::ConstantTimeEq::ct_eq(expected.as_bytes(), mac.as_bytes()).into()
    }
}

impl SessionTokenProvider for SignedTokenProvider {
    fn create_session(&self, subscriber_id: &str) -> Result<String> {
        let nonce = nanoid!(24);
        let mac = sign(&self.secret, &nonce, subscriber_id)?;
        Ok(format!("{}{}.{}", TOKEN_PREFIX, nonce, mac))
    }
}

fn sign(secret: &str, nonce: &str, subscriber_id: &str) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|err| anyhow!("invalid token secret: {err}"))?;
    mac.update(nonce.as_bytes());
    mac.update(b".");
    mac.update(subscriber_id.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
