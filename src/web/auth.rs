//! Bearer-token identity for API callers.
//!
//! Tokens are HS256 JWTs whose `sub` is the user id that owns printers and
//! jobs. Handlers take [`CurrentUser`] to get a verified caller.

use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::Response;
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use super::api::{AppState, json_error};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

pub fn issue_token(secret: &[u8], user: &str, ttl_secs: u64) -> Result<String, jsonwebtoken::errors::Error> {
    let expiration = chrono::Utc::now().timestamp() as usize + ttl_secs as usize;
    let claims = Claims { sub: user.to_string(), exp: expiration };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
}

pub fn verify_token(secret: &[u8], token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let validation = Validation::new(Algorithm::HS256);
    decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation).map(|data| data.claims)
}

/// The authenticated caller.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub String);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let TypedHeader(auth) = TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
            .await
            .map_err(|_| json_error("Missing bearer token", StatusCode::UNAUTHORIZED))?;
        let claims = verify_token(&state.jwt_secret, auth.token())
            .map_err(|_| json_error("Invalid token", StatusCode::UNAUTHORIZED))?;
        Ok(CurrentUser(claims.sub))
    }
}
