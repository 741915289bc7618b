//! Token issuance, verification and per-service role authorization.
use std::{collections::HashSet, time::Duration};

use chrono::{DateTime, Utc};
use eyre::{Result, WrapErr};
use http::{HeaderMap, header::AUTHORIZATION};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    config::models::{AuthConfig, UserAccount},
    core::{error::GatewayError, registry::ServiceDescriptor},
};

/// JWT claims embedded in issued tokens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Subject (username).
    pub sub: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub iss: String,
    /// Issued at (seconds since epoch).
    #[serde(default)]
    pub iat: i64,
    /// Expiry (seconds since epoch).
    pub exp: i64,
}

/// Verified caller identity attached to request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub subject: String,
    pub roles: HashSet<String>,
    pub issuer: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AuthenticatedUser {
    fn from_claims(claims: Claims) -> Result<Self, AuthError> {
        let to_time = |secs: i64| {
            DateTime::<Utc>::from_timestamp(secs, 0)
                .ok_or_else(|| AuthError::InvalidToken(format!("timestamp {secs} out of range")))
        };
        Ok(Self {
            issued_at: to_time(claims.iat)?,
            expires_at: to_time(claims.exp)?,
            subject: claims.sub,
            roles: claims.roles.into_iter().collect(),
            issuer: claims.iss,
        })
    }

    pub fn has_any_role(&self, required: &[String]) -> bool {
        required.iter().any(|role| self.roles.contains(role))
    }
}

/// A freshly signed token.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub user: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("authorization header is required")]
    MissingToken,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("token has expired")]
    Expired,
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("token signing failed: {0}")]
    Signing(String),
}

impl From<AuthError> for GatewayError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Signing(msg) => GatewayError::Internal(msg),
            other => GatewayError::Unauthorized(other.to_string()),
        }
    }
}

/// Authentication and authorization decisions for the whole gateway.
pub struct AuthGate {
    enabled: bool,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    expiration: Duration,
    issuer: String,
    default_roles: Vec<String>,
    users: Vec<UserAccount>,
}

impl AuthGate {
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        let expiration = humantime::parse_duration(&config.expiration)
            .wrap_err_with(|| format!("invalid auth.expiration '{}'", config.expiration))?;

        // HMAC family only; tokens signed with anything else fail verification.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        validation.leeway = 0;

        let secret = config.jwt_secret.as_bytes();
        Ok(Self {
            enabled: config.enabled,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            expiration,
            issuer: config.issuer.clone(),
            default_roles: config.default_roles.clone(),
            users: config.users.clone(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Sign a token for `subject` carrying `roles`.
    pub fn issue_token(&self, subject: &str, roles: Vec<String>) -> Result<IssuedToken, AuthError> {
        let now = Utc::now();
        let expires_at = now
            + chrono::Duration::from_std(self.expiration)
                .map_err(|e| AuthError::Signing(e.to_string()))?;
        let claims = Claims {
            sub: subject.to_string(),
            roles,
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Signing(e.to_string()))?;
        Ok(IssuedToken {
            token,
            user: subject.to_string(),
            expires_at,
        })
    }

    pub fn verify(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(e.to_string()),
            }
        })?;
        AuthenticatedUser::from_claims(data.claims)
    }

    /// Verify the bearer token in `headers`. Returns `None` when auth is disabled.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Option<AuthenticatedUser>, AuthError> {
        if !self.enabled {
            return Ok(None);
        }
        let value = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or(AuthError::MissingToken)?;
        let token = value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("bearer "))
            .ok_or_else(|| AuthError::InvalidToken("expected a Bearer token".to_string()))?;
        self.verify(token.trim()).map(Some)
    }

    /// Role check for one service.
    pub fn authorize(
        &self,
        service: &ServiceDescriptor,
        user: Option<&AuthenticatedUser>,
    ) -> Result<(), GatewayError> {
        if !self.enabled || !service.authentication || service.required_roles.is_empty() {
            return Ok(());
        }
        match user {
            Some(user) if user.has_any_role(&service.required_roles) => Ok(()),
            Some(user) => {
                tracing::warn!(
                    service = %service.name,
                    subject = %user.subject,
                    "Caller lacks a required role"
                );
                Err(GatewayError::Forbidden("insufficient permissions".to_string()))
            }
            None => Err(GatewayError::Forbidden(
                "no role information available".to_string(),
            )),
        }
    }

    /// Check credentials and issue a token. Without configured users any non-empty
    /// pair is accepted and receives the default roles.
    pub fn login(&self, username: &str, password: &str) -> Result<IssuedToken, AuthError> {
        let roles = if self.users.is_empty() {
            self.default_roles.clone()
        } else {
            self.users
                .iter()
                .find(|u| u.username == username && u.password == password)
                .map(|u| u.roles.clone())
                .ok_or(AuthError::InvalidCredentials)?
        };
        self.issue_token(username, roles)
    }
}
