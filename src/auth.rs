// Copyright (c) Rideshare Platform Team
// SPDX-License-Identifier: Apache-2.0

//! Bearer-token identity: HS256 tokens checked against a rotating key set.

use axum::{extract::FromRequestParts, http::request::Parts};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::api::AppState;
use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing bearer token")]
    Missing,
    #[error("malformed token")]
    Malformed,
    #[error("unsupported token algorithm")]
    Algorithm,
    #[error("unknown signing key {0:?}")]
    UnknownKey(String),
    #[error("invalid token signature")]
    Signature,
    #[error("token expired")]
    Expired,
    #[error("no active signing key")]
    NoSigningKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Rider,
    Driver,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    /// Unix seconds.
    pub exp: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
    kid: String,
}

#[derive(Default)]
struct KeySet {
    signing: Option<String>,
    secrets: HashMap<String, Vec<u8>>,
}

/// Verifies (and, for tooling and tests, issues) bearer tokens. The newest
/// rotated-in key signs; every key still in the set verifies.
#[derive(Default)]
pub struct KeyProvider {
    keys: RwLock<KeySet>,
}

impl KeyProvider {
    /// The first pair becomes the signing key.
    pub fn new(keys: &[(String, String)]) -> Self {
        let provider = Self::default();
        for (kid, secret) in keys.iter().rev() {
            provider.rotate(kid, secret);
        }
        provider
    }

    pub fn rotate(&self, kid: &str, secret: &str) {
        let mut keys = self.keys.write();
        keys.secrets.insert(kid.to_string(), secret.as_bytes().to_vec());
        keys.signing = Some(kid.to_string());
        info!("Signing key rotated to {}", kid);
    }

    /// Removes a key from the verification set. Returns false when unknown.
    pub fn retire(&self, kid: &str) -> bool {
        let mut keys = self.keys.write();
        let removed = keys.secrets.remove(kid).is_some();
        if keys.signing.as_deref() == Some(kid) {
            keys.signing = None;
        }
        if removed {
            info!("Signing key {} retired", kid);
        }
        removed
    }

    pub fn issue(&self, claims: &Claims) -> Result<String, AuthError> {
        let keys = self.keys.read();
        let kid = keys.signing.as_ref().ok_or(AuthError::NoSigningKey)?;
        let secret = keys.secrets.get(kid).ok_or(AuthError::NoSigningKey)?;

        let header = Header {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
            kid: kid.clone(),
        };
        let header = serde_json::to_vec(&header).map_err(|_| AuthError::Malformed)?;
        let payload = serde_json::to_vec(claims).map_err(|_| AuthError::Malformed)?;
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(payload)
        );
        let signature = sign(secret, signing_input.as_bytes())?;
        Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature)))
    }

    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, AuthError> {
        let mut parts = token.split('.');
        let (Some(header), Some(payload), Some(signature_segment), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::Malformed);
        };

        let header: Header = decode_json(header)?;
        if header.alg != "HS256" {
            return Err(AuthError::Algorithm);
        }

        {
            let keys = self.keys.read();
            let secret = keys
                .secrets
                .get(&header.kid)
                .ok_or_else(|| AuthError::UnknownKey(header.kid.clone()))?;
            let signature = URL_SAFE_NO_PAD
                .decode(signature_segment)
                .map_err(|_| AuthError::Malformed)?;
            let mut mac =
                HmacSha256::new_from_slice(secret).map_err(|_| AuthError::Signature)?;
            let signing_input = &token[..token.len() - signature_segment.len() - 1];
            mac.update(signing_input.as_bytes());
            mac.verify_slice(&signature)
                .map_err(|_| AuthError::Signature)?;
        }

        let claims: Claims = decode_json(payload)?;
        if claims.exp <= now.timestamp() {
            return Err(AuthError::Expired);
        }
        Ok(claims)
    }
}

fn sign(secret: &[u8], input: &[u8]) -> Result<Vec<u8>, AuthError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| AuthError::NoSigningKey)?;
    mac.update(input);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn decode_json<T: serde::de::DeserializeOwned>(segment: &str) -> Result<T, AuthError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| AuthError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| AuthError::Malformed)
}

/// The authenticated caller, injected into every protected handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: Role,
}

impl AuthUser {
    pub fn require_admin(&self) -> Result<(), AppError> {
        match self.role {
            Role::Admin => Ok(()),
            _ => Err(AppError::forbidden("admin role required")),
        }
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| AppError::Unauthorized(AuthError::Missing.to_string()))?;

        let claims = state
            .keys
            .verify(token.trim(), state.clock.now())
            .map_err(|e| {
                debug!("Rejected bearer token: {}", e);
                AppError::Unauthorized(e.to_string())
            })?;

        Ok(AuthUser {
            id: claims.sub,
            role: claims.role,
        })
    }
}
