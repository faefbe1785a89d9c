use super::error::SignerError;
use super::traits::{CLAIMS_VERSION, ClaimSet, TokenSigner};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

/// Wire form of the claims inside the JWT
#[derive(Debug, Serialize, Deserialize)]
struct JwtClaims {
    ver: u8,
    iss: String,
    sub: String, // client_id
    #[serde(default)]
    scope: String,
    iat: i64,
    exp: i64,
    jti: String,
}

/// HMAC-signed JWTs with one process-wide key
pub struct JwtTokenSigner {
    algorithm: Algorithm,
    issuer: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtTokenSigner {
    pub fn new(secret: &str, algorithm: &str, issuer: &str) -> Result<Self, SignerError> {
        if secret.is_empty() {
            return Err(SignerError::EmptyKey);
        }
        let algorithm = parse_hmac_algorithm(algorithm)?;

        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&[issuer]);
        // expiry is checked against the store record, not here
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = ["sub", "iss"].into_iter().map(String::from).collect();

        Ok(Self {
            algorithm,
            issuer: issuer.to_string(),
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }
}

fn parse_hmac_algorithm(name: &str) -> Result<Algorithm, SignerError> {
    match name.trim().to_ascii_uppercase().as_str() {
        "HS256" => Ok(Algorithm::HS256),
        "HS384" => Ok(Algorithm::HS384),
        "HS512" => Ok(Algorithm::HS512),
        _ => Err(SignerError::UnsupportedAlgorithm(name.to_string())),
    }
}

impl TokenSigner for JwtTokenSigner {
    fn mint(&self, claims: &ClaimSet) -> Result<String, SignerError> {
        if claims.version != CLAIMS_VERSION {
            return Err(SignerError::UnsupportedVersion(claims.version));
        }
        let exp = i64::try_from(claims.expires_in)
            .ok()
            .and_then(|lifetime| claims.issued_at.checked_add(lifetime))
            .ok_or(SignerError::MalformedClaims("expiry overflows"))?;

        let jwt_claims = JwtClaims {
            ver: claims.version,
            iss: self.issuer.clone(),
            sub: claims.client_id.clone(),
            scope: claims.scope.clone(),
            iat: claims.issued_at,
            exp,
            jti: claims.token_id.clone(),
        };

        encode(&Header::new(self.algorithm), &jwt_claims, &self.encoding_key)
            .map_err(SignerError::Encode)
    }

    fn verify(&self, token_value: &str) -> Result<ClaimSet, SignerError> {
        let token_data = decode::<JwtClaims>(token_value, &self.decoding_key, &self.validation)
            .map_err(SignerError::Invalid)?;
        let claims = token_data.claims;

        if claims.ver != CLAIMS_VERSION {
            return Err(SignerError::UnsupportedVersion(claims.ver));
        }
        let expires_in = claims
            .exp
            .checked_sub(claims.iat)
            .and_then(|lifetime| u64::try_from(lifetime).ok())
            .ok_or(SignerError::MalformedClaims("exp precedes iat"))?;

        Ok(ClaimSet {
            version: claims.ver,
            client_id: claims.sub,
            scope: claims.scope,
            issued_at: claims.iat,
            expires_in,
            token_id: claims.jti,
        })
    }
}
