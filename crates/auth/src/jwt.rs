//! Bearer token verification.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};

use crate::claims::{JwtClaims, TokenValidationError, validate_claims};

/// Verifies a raw bearer token and returns its claims.
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError>;
}

/// HMAC-SHA256 shared-secret validator.
///
/// Signature checking is delegated to `jsonwebtoken`; the time window is
/// checked with [`validate_claims`] against the caller-supplied `now` (the
/// library's own `exp` handling is disabled because the claims carry RFC 3339
/// timestamps).
pub struct Hs256JwtValidator {
    decoding: DecodingKey,
    encoding: EncodingKey,
    validation: Validation,
}

impl Hs256JwtValidator {
    pub fn new(secret: Vec<u8>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_nbf = false;

        Self {
            decoding: DecodingKey::from_secret(&secret),
            encoding: EncodingKey::from_secret(&secret),
            validation,
        }
    }

    /// Sign claims with the same secret (dev tooling and tests).
    pub fn sign(&self, claims: &JwtClaims) -> Result<String, TokenValidationError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| TokenValidationError::Malformed(e.to_string()))
    }
}

impl JwtValidator for Hs256JwtValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError> {
        let data = jsonwebtoken::decode::<JwtClaims>(token, &self.decoding, &self.validation)
            .map_err(|e| TokenValidationError::Malformed(e.to_string()))?;
        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PrincipalId, Role};
    use chrono::Duration;

    fn claims(now: DateTime<Utc>) -> JwtClaims {
        JwtClaims {
            sub: PrincipalId::new(),
            roles: vec![Role::MANAGER],
            issued_at: now,
            expires_at: now + Duration::minutes(10),
        }
    }

    #[test]
    fn round_trips_signed_claims() {
        let validator = Hs256JwtValidator::new(b"secret".to_vec());
        let now = Utc::now();
        let c = claims(now);
        let token = validator.sign(&c).unwrap();
        assert_eq!(validator.validate(&token, now).unwrap(), c);
    }

    #[test]
    fn rejects_token_signed_with_other_secret() {
        let signer = Hs256JwtValidator::new(b"one".to_vec());
        let validator = Hs256JwtValidator::new(b"two".to_vec());
        let now = Utc::now();
        let token = signer.sign(&claims(now)).unwrap();
        assert!(matches!(
            validator.validate(&token, now),
            Err(TokenValidationError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_expired_token_even_with_valid_signature() {
        let validator = Hs256JwtValidator::new(b"secret".to_vec());
        let now = Utc::now();
        let token = validator.sign(&claims(now)).unwrap();
        assert_eq!(
            validator.validate(&token, now + Duration::hours(1)),
            Err(TokenValidationError::Expired)
        );
    }
}
