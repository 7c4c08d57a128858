//! HS256 bearer-token verification.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};

use formgate_access::{SessionClaims, SessionError, SessionIdentity, SessionValidator, validate_claims};

/// Verifies HS256-signed tokens carrying [`SessionClaims`].
///
/// Expiry is checked against the `now` passed in, not the wall clock.
pub struct Hs256SessionValidator {
    key: DecodingKey,
    validation: Validation,
}

impl Hs256SessionValidator {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

impl SessionValidator for Hs256SessionValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<SessionIdentity, SessionError> {
        let data = decode::<SessionClaims>(token, &self.key, &self.validation)
            .map_err(|e| SessionError::Malformed(e.to_string()))?;
        validate_claims(&data.claims, now)?;
        Ok(SessionIdentity::from(&data.claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use formgate_core::{OrganizationId, UserId};
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn mint(secret: &str, claims: &SessionClaims) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims(now: DateTime<Utc>) -> SessionClaims {
        SessionClaims {
            sub: UserId::new(),
            organization_id: OrganizationId::new(),
            issued_at: now,
            expires_at: now + Duration::minutes(10),
        }
    }

    #[test]
    fn accepts_valid_token() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let claims = claims(now);
        let validator = Hs256SessionValidator::new(b"secret");

        let identity = validator.validate(&mint("secret", &claims), now).unwrap();
        assert_eq!(identity.user_id, claims.sub);
        assert_eq!(identity.organization_id, claims.organization_id);
    }

    #[test]
    fn rejects_wrong_secret() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let validator = Hs256SessionValidator::new(b"secret");

        let err = validator.validate(&mint("other", &claims(now)), now).unwrap_err();
        assert!(matches!(err, SessionError::Malformed(_)));
    }

    #[test]
    fn expiry_follows_supplied_clock() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let token = mint("secret", &claims(now));
        let validator = Hs256SessionValidator::new(b"secret");

        let err = validator
            .validate(&token, now + Duration::minutes(11))
            .unwrap_err();
        assert_eq!(err, SessionError::Expired);
    }

    #[test]
    fn rejects_garbage() {
        let validator = Hs256SessionValidator::new(b"secret");
        assert!(validator.validate("not.a.token", Utc::now()).is_err());
    }
}
