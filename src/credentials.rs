//! Random secrets and HS256-signed role tokens bound to a stack's signing secret.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const ALPHABET: &[u8; 62] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
// Largest multiple of 62 that fits in a byte; bytes at or above it are rejected.
const REJECT_FROM: u8 = 248;

pub const TOKEN_ISSUER: &str = "supabase";
pub const TOKEN_AUDIENCE: &str = "authenticated";
pub const TOKEN_LIFETIME_SECS: u64 = 365 * 24 * 60 * 60;

pub const JWT_SECRET_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token must have three dot-separated parts")]
    InvalidFormat,
    #[error("token part is not valid base64url: {0}")]
    InvalidEncoding(String),
    #[error("token signature mismatch")]
    InvalidSignature,
    #[error("token payload is not valid: {0}")]
    InvalidPayload(String),
    #[error("signing key rejected: {0}")]
    InvalidKey(String),
}

#[derive(Debug, Error)]
#[error("random source unavailable: {0}")]
pub struct RandomError(#[from] getrandom::Error);

/// Alphanumeric secret of `len` characters, uniform per character, from the OS random source.
pub fn generate_secret(len: usize) -> Result<String, RandomError> {
    let mut out = String::with_capacity(len);
    let mut buf = [0u8; 64];
    while out.len() < len {
        getrandom::getrandom(&mut buf)?;
        for b in buf {
            if b < REJECT_FROM {
                out.push(ALPHABET[(b % 62) as usize] as char);
                if out.len() == len {
                    break;
                }
            }
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Anon,
    ServiceRole,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Anon => "anon",
            Role::ServiceRole => "service_role",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub role: Role,
    pub iss: String,
    pub aud: String,
    pub iat: u64,
    pub exp: u64,
}

impl Claims {
    pub fn new(role: Role, issued_at_ms: u64) -> Self {
        let iat = issued_at_ms / 1000;
        Self {
            role,
            iss: TOKEN_ISSUER.to_string(),
            aud: TOKEN_AUDIENCE.to_string(),
            iat,
            exp: iat + TOKEN_LIFETIME_SECS,
        }
    }
}

#[derive(Serialize)]
struct Header {
    alg: &'static str,
    typ: &'static str,
}

const HEADER: Header = Header {
    alg: "HS256",
    typ: "JWT",
};

fn mac_for(secret: &str) -> Result<HmacSha256, TokenError> {
    HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| TokenError::InvalidKey(e.to_string()))
}

fn encode_json<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let bytes =
        serde_json::to_vec(value).map_err(|e| TokenError::InvalidPayload(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Compact `header.payload.signature` token carrying `role`, signed with `secret`.
pub fn issue_token(role: Role, secret: &str, issued_at_ms: u64) -> Result<String, TokenError> {
    let header_part = encode_json(&HEADER)?;
    let payload_part = encode_json(&Claims::new(role, issued_at_ms))?;
    let signing_input = format!("{header_part}.{payload_part}");
    let mut mac = mac_for(secret)?;
    mac.update(signing_input.as_bytes());
    let sig = mac.finalize().into_bytes();
    Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(sig)))
}

/// Check the signature with `secret` and return the decoded claims. Expiry is not enforced.
pub fn verify_token(token: &str, secret: &str) -> Result<Claims, TokenError> {
    let mut parts = token.split('.');
    let (Some(header_part), Some(payload_part), Some(sig_part), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(TokenError::InvalidFormat);
    };
    let expected = URL_SAFE_NO_PAD
        .decode(sig_part)
        .map_err(|e| TokenError::InvalidEncoding(e.to_string()))?;
    let mut mac = mac_for(secret)?;
    mac.update(header_part.as_bytes());
    mac.update(b".");
    mac.update(payload_part.as_bytes());
    mac.verify_slice(&expected)
        .map_err(|_| TokenError::InvalidSignature)?;

    let payload = URL_SAFE_NO_PAD
        .decode(payload_part)
        .map_err(|e| TokenError::InvalidEncoding(e.to_string()))?;
    serde_json::from_slice(&payload).map_err(|e| TokenError::InvalidPayload(e.to_string()))
}

/// The two bearer tokens, always issued together from one secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub anon_key: String,
    pub service_role_key: String,
}

impl TokenPair {
    pub fn issue(secret: &str, issued_at_ms: u64) -> Result<Self, TokenError> {
        Ok(Self {
            anon_key: issue_token(Role::Anon, secret, issued_at_ms)?,
            service_role_key: issue_token(Role::ServiceRole, secret, issued_at_ms)?,
        })
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error(transparent)]
    Random(#[from] RandomError),
    #[error(transparent)]
    Token(#[from] TokenError),
}

/// Every secret a new stack needs.
#[derive(Debug, Clone)]
pub struct CredentialSet {
    pub jwt_secret: String,
    pub tokens: TokenPair,
    pub postgres_password: String,
    pub dashboard_password: String,
    pub secret_key_base: String,
    pub vault_enc_key: String,
    pub pg_meta_crypto_key: String,
    pub logflare_public_token: String,
    pub logflare_private_token: String,
}

impl CredentialSet {
    pub fn generate(issued_at_ms: u64) -> Result<Self, CredentialError> {
        let jwt_secret = generate_secret(JWT_SECRET_LEN)?;
        let tokens = TokenPair::issue(&jwt_secret, issued_at_ms)?;
        Ok(Self {
            tokens,
            jwt_secret,
            postgres_password: generate_secret(32)?,
            dashboard_password: generate_secret(16)?,
            secret_key_base: generate_secret(64)?,
            vault_enc_key: generate_secret(32)?,
            pg_meta_crypto_key: generate_secret(32)?,
            logflare_public_token: generate_secret(64)?,
            logflare_private_token: generate_secret(64)?,
        })
    }
}
