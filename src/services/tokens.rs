//! Bearer token extraction.
//!
//! The token travels either in `Authorization: Bearer <base64>` or in a
//! `Bearer` cookie. The base64 payload is a JSON document naming the issuer
//! and an optional expiration. The parsed token is stored in the request
//! extensions so later stages can pick it up without re-parsing headers.

use crate::models::{ids::OwnerId, token::BearerToken};
use axum::http::{Extensions, HeaderMap, header};
use base64::{Engine as _, engine::general_purpose};
use serde::Deserialize;
use thiserror::Error;

const BEARER_SCHEME: &str = "Bearer";
const BEARER_COOKIE: &str = "Bearer";

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("bearer token is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("bearer token body is malformed: {0}")]
    Body(#[from] serde_json::Error),
    #[error("bearer token was never extracted for this request")]
    NotStored,
}

#[derive(Deserialize)]
struct BearerTokenBody {
    issuer: OwnerId,
    #[serde(default)]
    expires_at: Option<i64>,
}

/// Request-scoped slot holding the outcome of [`store_bearer_token`].
#[derive(Clone, Debug)]
struct BearerSlot(Option<BearerToken>);

fn from_authorization(headers: &HeaderMap) -> Option<&str> {
    let auth = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let material = auth.strip_prefix(BEARER_SCHEME)?.strip_prefix(' ')?.trim();
    (!material.is_empty()).then_some(material)
}

fn from_cookie(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == BEARER_COOKIE)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

/// Decode bearer material into a token.
pub fn parse_bearer_token(material: &str) -> Result<BearerToken, TokenError> {
    let raw = general_purpose::STANDARD.decode(material)?;
    let body: BearerTokenBody = serde_json::from_slice(&raw)?;
    Ok(BearerToken::new(body.issuer, body.expires_at))
}

/// Extract bearer material from the headers (if any) and keep the parsed
/// token in `extensions`.
///
/// Absent material is not an error; present but malformed material is.
pub fn store_bearer_token(
    headers: &HeaderMap,
    extensions: &mut Extensions,
) -> Result<(), TokenError> {
    let token = match from_authorization(headers).or_else(|| from_cookie(headers)) {
        Some(material) => Some(parse_bearer_token(material)?),
        None => None,
    };
    extensions.insert(BearerSlot(token));
    Ok(())
}

/// Load the token stored by [`store_bearer_token`].
pub fn load_bearer_token(extensions: &Extensions) -> Result<Option<BearerToken>, TokenError> {
    extensions
        .get::<BearerSlot>()
        .map(|slot| slot.0.clone())
        .ok_or(TokenError::NotStored)
}

#[cfg(test)]
pub(crate) fn encode_bearer_token(issuer: &str, expires_at: Option<i64>) -> String {
    let body = serde_json::json!({ "issuer": issuer, "expires_at": expires_at });
    general_purpose::STANDARD.encode(body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(name: header::HeaderName, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn no_material_stores_absent_token() {
        let mut ext = Extensions::new();
        store_bearer_token(&HeaderMap::new(), &mut ext).unwrap();
        assert_eq!(load_bearer_token(&ext).unwrap(), None);
    }

    #[test]
    fn authorization_header_is_parsed() {
        let material = encode_bearer_token("alice", Some(1_900_000_000));
        let headers = headers_with(header::AUTHORIZATION, &format!("Bearer {material}"));
        let mut ext = Extensions::new();
        store_bearer_token(&headers, &mut ext).unwrap();

        let token = load_bearer_token(&ext).unwrap().unwrap();
        assert_eq!(token.issuer().as_str(), "alice");
        let expiry = chrono::DateTime::from_timestamp(1_900_000_000, 0).unwrap();
        assert!(!token.is_expired(expiry - chrono::Duration::seconds(1)));
        assert!(token.is_expired(expiry));
    }

    #[test]
    fn cookie_is_used_when_header_missing() {
        let material = encode_bearer_token("bob", None);
        let headers = headers_with(header::COOKIE, &format!("theme=dark; Bearer={material}"));
        let mut ext = Extensions::new();
        store_bearer_token(&headers, &mut ext).unwrap();

        let token = load_bearer_token(&ext).unwrap().unwrap();
        assert_eq!(token.issuer().as_str(), "bob");
    }

    #[test]
    fn other_schemes_are_ignored() {
        let headers = headers_with(header::AUTHORIZATION, "Basic dXNlcjpwYXNz");
        let mut ext = Extensions::new();
        store_bearer_token(&headers, &mut ext).unwrap();
        assert_eq!(load_bearer_token(&ext).unwrap(), None);
    }

    #[test]
    fn malformed_material_fails() {
        let headers = headers_with(header::AUTHORIZATION, "Bearer !!!not-base64");
        let mut ext = Extensions::new();
        assert!(matches!(
            store_bearer_token(&headers, &mut ext),
            Err(TokenError::Base64(_))
        ));

        let not_json = general_purpose::STANDARD.encode("plain text");
        let headers = headers_with(header::AUTHORIZATION, &format!("Bearer {not_json}"));
        assert!(matches!(
            store_bearer_token(&headers, &mut ext),
            Err(TokenError::Body(_))
        ));
    }

    #[test]
    fn load_without_store_is_an_error() {
        assert!(matches!(
            load_bearer_token(&Extensions::new()),
            Err(TokenError::NotStored)
        ));
    }
}
