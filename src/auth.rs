//! Bearer-token authentication (C11), mirroring the teacher's API-key
//! hash-at-rest pattern: a 32-byte random URL-safe token is issued once and
//! only its SHA-256 hash is stored; requests present the raw token and are
//! checked against the stored hash.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::error::PiwError;

/// Generate a fresh bearer token: 32 random bytes, URL-safe base64 encoded.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    urlencoding::encode(&data_encoding_base64url(&bytes)).into_owned()
}

fn data_encoding_base64url(bytes: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";
    let mut out = String::with_capacity((bytes.len() * 4).div_ceil(3));
    for chunk in bytes.chunks(3) {
        let b0 = chunk[0] as u32;
        let b1 = *chunk.get(1).unwrap_or(&0) as u32;
        let b2 = *chunk.get(2).unwrap_or(&0) as u32;
        let n = (b0 << 16) | (b1 << 8) | b2;
        out.push(ALPHABET[((n >> 18) & 0x3f) as usize] as char);
        out.push(ALPHABET[((n >> 12) & 0x3f) as usize] as char);
        if chunk.len() > 1 {
            out.push(ALPHABET[((n >> 6) & 0x3f) as usize] as char);
        }
        if chunk.len() > 2 {
            out.push(ALPHABET[(n & 0x3f) as usize] as char);
        }
    }
    out
}

pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex_encode(&digest)
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

pub fn hash_password(password: &str) -> String {
    hex_encode(&Sha256::digest(password.as_bytes()))
}

/// Holds the single active session token's hash in memory; reissued on
/// every successful `/token` exchange (single-operator appliance, no
/// multi-session token table per §4.11).
#[derive(Default)]
pub struct TokenStore {
    inner: RwLock<Option<String>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn issue(&self) -> String {
        let token = generate_token();
        let mut guard = self.inner.write().await;
        *guard = Some(hash_token(&token));
        token
    }

    pub async fn validate(&self, token: &str) -> bool {
        let guard = self.inner.read().await;
        guard.as_deref() == Some(hash_token(token).as_str())
    }
}

/// Extractor that fails with 401 unless `Authorization: Bearer <token>`
/// matches the currently issued token.
pub struct AuthenticatedUser;

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
    crate::AppState: axum::extract::FromRef<S>,
{
    type Rejection = PiwError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = crate::AppState::from_ref(state);
        let header = parts.headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok());
        let token = header.and_then(|h| h.strip_prefix("Bearer ")).ok_or(PiwError::Unauthorized)?;
        if app_state.tokens.validate(token).await {
            Ok(AuthenticatedUser)
        } else {
            Err(PiwError::Unauthorized)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_hash_is_deterministic() {
        assert_eq!(hash_token("abc"), hash_token("abc"));
        assert_ne!(hash_token("abc"), hash_token("abd"));
    }

    #[tokio::test]
    async fn token_store_validates_only_latest_issue() {
        let store = TokenStore::new();
        let first = store.issue().await;
        assert!(store.validate(&first).await);
        let second = store.issue().await;
        assert!(!store.validate(&first).await);
        assert!(store.validate(&second).await);
    }

    #[test]
    fn generated_tokens_are_32_bytes_of_entropy_and_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert!(a.len() >= 40);
    }
}
