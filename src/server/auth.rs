use axum::extract::{ Request, State };
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{ IntoResponse, Response };
use hmac::{ Hmac, Mac };
use log::warn;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use url::form_urlencoded;

type HmacSha256 = Hmac<Sha256>;

/// Maximum clock skew accepted between the signed timestamp and now.
pub const MAX_SKEW_SECS: i64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing ts/sig")]
    MissingCredentials,
    #[error("malformed timestamp")]
    MalformedTimestamp,
    #[error("timestamp out of range")]
    Expired,
    #[error("bad signature")]
    BadSignature,
}

/// The `ts` and `sig` a client presented, from the query string or the
/// `X-Api-Ts` / `X-Api-Sign` headers.
#[derive(Debug, Default, Clone)]
pub struct Credentials {
    pub ts: Option<String>,
    pub sig: Option<String>,
}

impl Credentials {
    pub fn extract(query: Option<&str>, header: impl Fn(&str) -> Option<String>) -> Self {
        let params: HashMap<String, String> = form_urlencoded
            ::parse(query.unwrap_or("").as_bytes())
            .into_owned()
            .collect();
        let ts = params
            .get("ts")
            .or_else(|| params.get("X-Api-Ts"))
            .cloned()
            .or_else(|| header("x-api-ts"));
        let sig = params
            .get("sig")
            .or_else(|| params.get("X-Api-Sign"))
            .cloned()
            .or_else(|| header("x-api-sign"));
        Self { ts, sig }
    }
}

/// Checks `sig == hex(HMAC-SHA256(secret, ts))` and that `ts` is within
/// [`MAX_SKEW_SECS`] of `now`.
pub fn verify_signature(secret: &str, credentials: &Credentials, now: i64) -> Result<(), AuthError> {
    let (Some(ts), Some(sig)) = (credentials.ts.as_deref(), credentials.sig.as_deref()) else {
        return Err(AuthError::MissingCredentials);
    };
    let ts = ts.trim();
    let ts_secs: i64 = ts.parse().map_err(|_| AuthError::MalformedTimestamp)?;
    if now.abs_diff(ts_secs) > MAX_SKEW_SECS.unsigned_abs() {
        return Err(AuthError::Expired);
    }

    let expected = hex::decode(sig.trim()).map_err(|_| AuthError::BadSignature)?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::BadSignature)?;
    mac.update(ts.as_bytes());
    mac.verify_slice(&expected).map_err(|_| AuthError::BadSignature)
}

/// axum middleware guarding the API routes with the shared secret.
pub async fn require_signature(State(secret): State<Arc<String>>, request: Request, next: Next) -> Response {
    let credentials = Credentials::extract(request.uri().query(), |name| {
        request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    });

    match verify_signature(&secret, &credentials, chrono::Utc::now().timestamp()) {
        Ok(()) => next.run(request).await,
        Err(e) => {
            warn!("Rejected {} {}: {}", request.method(), request.uri().path(), e);
            (StatusCode::UNAUTHORIZED, axum::Json(serde_json::json!({ "error": e.to_string() }))).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, ts: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(ts.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn creds(ts: &str, sig: &str) -> Credentials {
        Credentials { ts: Some(ts.to_string()), sig: Some(sig.to_string()) }
    }

    #[test]
    fn accepts_fresh_signature() {
        let now = 1_700_000_000;
        let ts = now.to_string();
        assert_eq!(verify_signature("secret", &creds(&ts, &sign("secret", &ts)), now + 299), Ok(()));
    }

    #[test]
    fn padded_timestamp_is_signed_trimmed() {
        let now = 1_700_000_000;
        let ts = now.to_string();
        let sig = sign("secret", &ts);
        assert_eq!(verify_signature("secret", &creds(&format!(" {} ", ts), &sig), now), Ok(()));
    }

    #[test]
    fn rejects_bad_or_stale_signatures() {
        let now = 1_700_000_000;
        let ts = now.to_string();
        let sig = sign("secret", &ts);
        assert_eq!(verify_signature("other", &creds(&ts, &sig), now), Err(AuthError::BadSignature));
        assert_eq!(verify_signature("secret", &creds(&ts, "zz"), now), Err(AuthError::BadSignature));
        assert_eq!(verify_signature("secret", &creds(&ts, &sig), now + 301), Err(AuthError::Expired));
        assert_eq!(verify_signature("secret", &creds("soon", &sig), now), Err(AuthError::MalformedTimestamp));
        assert_eq!(
            verify_signature("secret", &Credentials::default(), now),
            Err(AuthError::MissingCredentials)
        );
    }

    #[test]
    fn reads_query_then_headers() {
        let from_query = Credentials::extract(Some("ts=10&X-Api-Sign=abc"), |_| None);
        assert_eq!(from_query.ts.as_deref(), Some("10"));
        assert_eq!(from_query.sig.as_deref(), Some("abc"));

        let from_headers = Credentials::extract(None, |name| {
            match name {
                "x-api-ts" => Some("11".to_string()),
                "x-api-sign" => Some("def".to_string()),
                _ => None,
            }
        });
        assert_eq!(from_headers.ts.as_deref(), Some("11"));
        assert_eq!(from_headers.sig.as_deref(), Some("def"));
    }
}
