//! HS256 access-token verification

use anyhow::{Context, Result};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use uuid::Uuid;

use super::Claims;

/// Verifies bearer tokens signed with the shared secret
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str, issuer: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_aud = false;
        if let Some(issuer) = issuer {
            validation.set_issuer(&[issuer]);
        }

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Verify a token and return the subject's user id
    pub fn verify(&self, token: &str) -> Result<Uuid> {
        let token_data =
            decode::<Claims>(token, &self.key, &self.validation).context("JWT validation failed")?;

        Uuid::parse_str(&token_data.claims.sub).context("JWT subject is not a user id")
    }
}
