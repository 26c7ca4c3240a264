use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bearer token lifetime — 30 days (spec §4.5 token endpoint).
pub const EXPIRES_IN_SECS: i64 = 30 * 24 * 60 * 60;

/// Claims of a bearer token minted by the token endpoint. No other claims
/// are defined; validators must not require them (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub client_id: String,
    pub scope: String,
    pub iat: i64,
    pub exp: i64,
}

/// Mint an HS256 JWT for a successful authorization-code redemption.
pub fn mint(secret: &str, user_id: Uuid, client_id: &str, scope: &str) -> anyhow::Result<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id,
        client_id: client_id.to_owned(),
        scope: scope.to_owned(),
        iat: now.timestamp(),
        exp: (now + Duration::seconds(EXPIRES_IN_SECS)).timestamp(),
    };

    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok(token)
}

/// Validate a bearer token and return its claims. `exp` is enforced by the
/// underlying library; callers must still check scope membership themselves.
pub fn validate(secret: &str, token: &str) -> anyhow::Result<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.required_spec_claims.clear();

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}

/// Whether `required` appears as a space-separated token in `scope`
/// (spec §4.5 "the required scope must appear as a space-separated token").
pub fn scope_contains(scope: &str, required: &str) -> bool {
    scope.split_whitespace().any(|s| s == required)
}
