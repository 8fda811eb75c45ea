//! Bearer credentials issued by the identity provider.
//!
//! A credential is `hex(claims_json) "." hex(ed25519 signature over claims_json)`,
//! signed by the identity provider's key. The server only ever verifies.

use axum::http::{header, HeaderMap};
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use tracing::warn;

use dealhub_common::seller::{resolve_role, ResolvedRole, SellerId};

use crate::error::{bounded, ApiError, ApiResult};
use crate::processor::PaymentProcessor;
use crate::state::AppState;
use crate::store::DocumentStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id, which is also the seller id for seller accounts.
    pub sub: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: DateTime<Utc>,
}

/// An authenticated caller with their effective role.
#[derive(Debug, Clone)]
pub struct Caller {
    pub claims: Claims,
    pub role: ResolvedRole,
}

impl Caller {
    pub fn is_privileged(&self) -> bool {
        self.role.kind.is_privileged()
    }

    pub fn is_seller(&self, seller: &SellerId) -> bool {
        self.claims.sub == seller.0
    }

    pub fn require_privileged(&self) -> ApiResult<()> {
        if self.is_privileged() {
            Ok(())
        } else {
            Err(ApiError::Forbidden("admin role required".into()))
        }
    }

    /// The seller themself, or an admin acting on their behalf.
    pub fn require_seller_or_admin(&self, seller: &SellerId) -> ApiResult<()> {
        if self.is_privileged() || self.is_seller(seller) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(format!("not allowed to act for seller {seller}")))
        }
    }
}

pub struct IdentityVerifier {
    issuer: VerifyingKey,
}

impl IdentityVerifier {
    pub fn new(issuer: VerifyingKey) -> Self {
        Self { issuer }
    }

    pub fn from_hex(public_key_hex: &str) -> Result<Self, String> {
        let bytes = hex::decode(public_key_hex.trim())
            .map_err(|e| format!("identity key is not hex: {e}"))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| "identity key must be 32 bytes".to_string())?;
        let issuer =
            VerifyingKey::from_bytes(&bytes).map_err(|e| format!("invalid identity key: {e}"))?;
        Ok(Self::new(issuer))
    }

    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> ApiResult<Claims> {
        let unauthorized = |msg: &str| ApiError::Unauthorized(msg.to_string());

        let (claims_hex, sig_hex) = token
            .trim()
            .split_once('.')
            .ok_or_else(|| unauthorized("malformed credential"))?;
        let claims_bytes = hex::decode(claims_hex).map_err(|_| unauthorized("malformed credential"))?;
        let sig_bytes: [u8; 64] = hex::decode(sig_hex)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| unauthorized("malformed signature"))?;

        self.issuer
            .verify(&claims_bytes, &Signature::from_bytes(&sig_bytes))
            .map_err(|_| unauthorized("invalid credential signature"))?;

        let claims: Claims =
            serde_json::from_slice(&claims_bytes).map_err(|_| unauthorized("malformed claims"))?;
        if claims.exp <= now {
            return Err(unauthorized("credential expired"));
        }
        Ok(claims)
    }
}

/// Sign claims the way the identity provider does. Used by tooling and tests.
pub fn issue_token(key: &SigningKey, claims: &Claims) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(claims)?;
    let signature = key.sign(&bytes);
    Ok(format!(
        "{}.{}",
        hex::encode(&bytes),
        hex::encode(signature.to_bytes())
    ))
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

impl<S: DocumentStore, P: PaymentProcessor> AppState<S, P> {
    /// Verify the request's credential and resolve the caller's role against
    /// their seller-account record, if any. A locked account cannot sign in.
    pub async fn authenticate(&self, headers: &HeaderMap) -> ApiResult<Caller> {
        let token = bearer_token(headers)
            .ok_or_else(|| ApiError::Unauthorized("missing bearer credential".into()))?;
        let claims = self.verifier.verify(token, Utc::now())?;
        let account = bounded(
            self.remote_timeout,
            "caller lookup",
            self.store.get_seller(&SellerId(claims.sub.clone())),
        )
        .await?;
        let role = resolve_role(claims.role.as_deref(), account.as_ref());
        if account.as_ref().is_some_and(|a| a.locked) && !role.kind.is_privileged() {
            warn!(sub = %claims.sub, "rejected credential for locked seller account");
            return Err(ApiError::Forbidden("seller account is locked".into()));
        }
        Ok(Caller { claims, role })
    }

    /// Like [`AppState::authenticate`], but an absent credential is not an
    /// error. A credential that is present and invalid still is.
    pub async fn authenticate_optional(&self, headers: &HeaderMap) -> ApiResult<Option<Caller>> {
        if bearer_token(headers).is_none() {
            return Ok(None);
        }
        self.authenticate(headers).await.map(Some)
    }
}
