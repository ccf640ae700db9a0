use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::user::UserProfile;

/// Claims read from a self-describing (JWT) token. Every field is optional:
/// the client only inspects them, it never relies on them for authorization.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TokenClaims {
    pub sub: Option<String>,
    pub exp: Option<i64>,
    pub iat: Option<i64>,
    pub token_type: Option<String>,
}

impl TokenClaims {
    /// Each claim is read on its own; one oddly typed claim never hides the others.
    fn from_payload(payload: &Value) -> Self {
        Self {
            sub: payload.get("sub").and_then(claim_string),
            exp: payload.get("exp").and_then(claim_seconds),
            iat: payload.get("iat").and_then(claim_seconds),
            token_type: payload.get("type").and_then(claim_string),
        }
    }
}

fn claim_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// NumericDate: integer or fractional seconds, sometimes sent as a string.
fn claim_seconds(value: &Value) -> Option<i64> {
    let seconds = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    seconds.is_finite().then(|| seconds.floor() as i64)
}

/// Bearer credential, classified once when it enters the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// No decodable payload (dev and mock tokens).
    Opaque(String),
    /// A JWT whose payload decoded; the signature is not checked client-side.
    SelfDescribing { raw: String, claims: TokenClaims },
}

impl Token {
    pub fn classify(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        match decode_claims(&raw) {
            Some(claims) => Token::SelfDescribing { raw, claims },
            None => Token::Opaque(raw),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Token::Opaque(raw) => raw,
            Token::SelfDescribing { raw, .. } => raw,
        }
    }

    /// Expiry embedded in the token itself, if it carries one.
    pub fn embedded_expiry(&self) -> Option<DateTime<Utc>> {
        match self {
            Token::Opaque(_) => None,
            Token::SelfDescribing { claims, .. } => {
                claims.exp.and_then(|exp| DateTime::from_timestamp(exp, 0))
            }
        }
    }
}

fn decode_claims(raw: &str) -> Option<TokenClaims> {
    if raw.split('.').count() != 3 {
        return None;
    }

    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let payload = decode::<Value>(raw, &DecodingKey::from_secret(&[]), &validation)
        .ok()?
        .claims;
    payload
        .is_object()
        .then(|| TokenClaims::from_payload(&payload))
}

// Wire DTOs
#[derive(Debug, Serialize)]
pub struct LoginForm<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    pub expires_in: i64,
    #[serde(default)]
    pub refresh_expires_in: Option<i64>,
    pub user: UserProfile,
}

#[derive(Debug, Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    pub expires_in: i64,
    /// Some backends rotate anyway; the session keeps its original refresh token.
    #[serde(default)]
    pub refresh_token: Option<String>,
}
