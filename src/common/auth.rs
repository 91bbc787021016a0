//! Authentication primitives
//!
//! This module provides:
//! - Argon2 password hashing and verification
//! - HS256 access/refresh token issuance and validation
//!
//! Token identities carry the user id as `sub`; whether that user still
//! exists is checked by the handlers that need a full record.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::common::config::AuthConfig;
use crate::common::utils::timestamp_now;
use crate::common::{Error, Result};

/// Token kind, stored in the `token_type` claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,
    pub username: String,
    pub token_type: TokenType,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    /// Issued at (Unix timestamp)
    pub iat: u64,
}

/// Authentication context extracted from a valid request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub username: String,
}

/// Result of authentication attempt
#[derive(Debug)]
pub enum AuthResult {
    /// Authentication successful
    Ok(AuthContext),
    /// No authentication provided
    Missing,
    /// Invalid credentials
    Invalid(String),
    /// Expired credentials
    Expired,
}

/// Access + refresh pair returned on login
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

/// Hash a plaintext password with a fresh salt
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| Error::Internal(format!("password hash error: {}", e)))
}

/// Check a plaintext password against a stored PHC hash string
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Issues and validates signed tokens
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl_secs: u64,
    refresh_ttl_secs: u64,
}

impl TokenService {
    pub fn new(config: &AuthConfig) -> Self {
        let secret = config.jwt_secret.as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_ttl_secs: config.access_token_ttl_secs,
            refresh_ttl_secs: config.refresh_token_ttl_secs,
        }
    }

    /// Issue an access/refresh pair for a user
    pub fn issue_pair(&self, ctx: &AuthContext) -> Result<TokenPair> {
        Ok(TokenPair {
            access: self.issue(ctx, TokenType::Access)?,
            refresh: self.issue(ctx, TokenType::Refresh)?,
        })
    }

    pub fn issue(&self, ctx: &AuthContext, token_type: TokenType) -> Result<String> {
        let now = timestamp_now();
        let ttl = match token_type {
            TokenType::Access => self.access_ttl_secs,
            TokenType::Refresh => self.refresh_ttl_secs,
        };
        let claims = Claims {
            sub: ctx.user_id.to_string(),
            username: ctx.username.clone(),
            token_type,
            exp: now + ttl,
            iat: now,
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| Error::Internal(format!("JWT error: {}", e)))
    }

    /// Validate a token and require the given type
    pub fn validate(&self, token: &str, expected: TokenType) -> AuthResult {
        let mut validation = Validation::default();
        validation.leeway = 0;

        let claims = match decode::<Claims>(token, &self.decoding_key, &validation) {
            Ok(data) => data.claims,
            Err(e) => {
                return match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthResult::Expired,
                    _ => AuthResult::Invalid(format!("Invalid JWT: {}", e)),
                }
            }
        };

        if claims.token_type != expected {
            return AuthResult::Invalid(format!("Token has wrong type: {:?}", claims.token_type));
        }

        match Uuid::parse_str(&claims.sub) {
            Ok(user_id) => AuthResult::Ok(AuthContext {
                user_id,
                username: claims.username,
            }),
            Err(_) => AuthResult::Invalid("Malformed subject".to_string()),
        }
    }

    /// Authenticate from Authorization header value ("Bearer <token>")
    pub fn authenticate(&self, auth_header: &str) -> AuthResult {
        let parts: Vec<&str> = auth_header.splitn(2, ' ').collect();
        if parts.len() != 2 {
            return AuthResult::Invalid("Invalid Authorization header format".to_string());
        }

        match parts[0].to_lowercase().as_str() {
            "bearer" => self.validate(parts[1].trim(), TokenType::Access),
            _ => AuthResult::Invalid(format!("Unknown auth scheme: {}", parts[0])),
        }
    }

    /// Exchange a refresh token for a new access token
    pub fn refresh(&self, refresh_token: &str) -> Result<String> {
        match self.validate(refresh_token, TokenType::Refresh) {
            AuthResult::Ok(ctx) => self.issue(&ctx, TokenType::Access),
            AuthResult::Expired => Err(Error::Unauthorized("Token is expired".into())),
            AuthResult::Invalid(msg) => Err(Error::Unauthorized(msg)),
            AuthResult::Missing => Err(Error::Unauthorized("Token missing".into())),
        }
    }
}
