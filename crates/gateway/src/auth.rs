//! Bearer-token → user-id resolution.
//!
//! Tokens are hashed once at startup; request tokens are hashed and
//! compared in constant time. No token table means an unauthenticated
//! deployment: requests resolve to no user and user-scoped listings come
//! back empty.

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::config::AuthConfig;

pub struct TokenResolver {
    /// (sha256(token), user_id)
    entries: Vec<(Vec<u8>, String)>,
}

impl TokenResolver {
    pub fn from_config(config: &AuthConfig) -> Self {
        let entries = config
            .tokens
            .iter()
            .map(|entry| (hash_token(&entry.token), entry.user_id.clone()))
            .collect();
        Self { entries }
    }

    /// Resolve the `Authorization: Bearer …` header to a user id.
    pub fn resolve(&self, headers: &HeaderMap) -> Option<String> {
        let header = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
        let token = header.strip_prefix("Bearer ")?;
        let hashed = hash_token(token);
        self.entries
            .iter()
            .find(|(known, _)| known.ct_eq(&hashed).into())
            .map(|(_, user_id)| user_id.clone())
    }
}

fn hash_token(token: &str) -> Vec<u8> {
    Sha256::digest(token.as_bytes()).to_vec()
}
