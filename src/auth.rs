//! Bearer-token verification for the HTTP API.
//!
//! Tokens are RS256 JWTs issued by the identity provider. The signature and
//! `exp` are checked against a PEM public key taken from the environment
//! variable named by `auth.public_key_env` or from `auth.public_key_path`.
//! Audience and issuer are not checked.

use anyhow::{bail, Context};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::config::AuthConfig;
use crate::error::{EngineError, EngineResult};

/// The claims the server reads. Everything else in the token is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub sub: Option<String>,
    pub exp: u64,
}

#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn from_pem(pem: &[u8], leeway_secs: u64) -> anyhow::Result<Self> {
        let key = DecodingKey::from_rsa_pem(pem).context("Invalid RS256 public key PEM")?;
        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = leeway_secs;
        validation.validate_exp = true;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp"]);
        Ok(Self { key, validation })
    }

    /// Loads the public key named by the config.
    ///
    /// Returns `Ok(None)` when neither the file nor the environment variable
    /// is set; the server then rejects every authenticated request.
    pub fn from_config(config: &AuthConfig) -> anyhow::Result<Option<Self>> {
        let pem = if let Some(path) = &config.public_key_path {
            std::fs::read(path)
                .with_context(|| format!("Failed to read public key: {}", path.display()))?
        } else {
            match std::env::var(&config.public_key_env) {
                Ok(value) if !value.trim().is_empty() => value.into_bytes(),
                _ => return Ok(None),
            }
        };
        if pem.is_empty() {
            bail!("Public key is empty");
        }
        Self::from_pem(&pem, config.leeway_secs).map(Some)
    }

    pub fn verify(&self, token: &str) -> EngineResult<Claims> {
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| EngineError::Auth(format!("invalid token: {}", e)))
    }

    /// Verifies an `Authorization` header value of the form `Bearer <jwt>`.
    pub fn verify_header(&self, header: Option<&str>) -> EngineResult<Claims> {
        let header = header.ok_or_else(|| EngineError::Auth("missing bearer token".to_string()))?;
        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| EngineError::Auth("malformed authorization header".to_string()))?;
        self.verify(token)
    }
}
