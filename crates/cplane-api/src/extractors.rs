//! # Request Extraction Helpers
//!
//! Map JSON, path and query-string decoding failures to [`AppError::BadRequest`]
//! so that malformed input gets the structured error body. Handlers take
//! the raw `Result` and call one of these:
//!
//! ```ignore
//! async fn handler(body: Result<Json<T>, JsonRejection>) -> Result<..., AppError> {
//!     let req = extract_json(body)?;
//!     // use req...
//! }
//! ```

use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query};
use axum::Json;
use serde::de::DeserializeOwned;

use crate::error::AppError;

pub fn extract_json<T>(result: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    result
        .map(|Json(v)| v)
        .map_err(|err| AppError::BadRequest(err.body_text()))
}

pub fn extract_query<T>(result: Result<Query<T>, QueryRejection>) -> Result<T, AppError> {
    result
        .map(|Query(v)| v)
        .map_err(|err| AppError::BadRequest(err.body_text()))
}

pub fn extract_path<T>(result: Result<Path<T>, PathRejection>) -> Result<T, AppError> {
    result
        .map(|Path(v)| v)
        .map_err(|err| AppError::BadRequest(err.body_text()))
}

/// Decode a JSON body that may be omitted entirely.
pub fn optional_json<T: DeserializeOwned>(body: &Bytes) -> Result<Option<T>, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|err| AppError::BadRequest(format!("Failed to parse the request body as JSON: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Body {
        name: String,
    }

    #[test]
    fn empty_body_is_none() {
        assert_eq!(optional_json::<Body>(&Bytes::new()).unwrap(), None);
        assert_eq!(optional_json::<Body>(&Bytes::from_static(b" \n")).unwrap(), None);
    }

    #[test]
    fn present_body_is_decoded() {
        let body = optional_json::<Body>(&Bytes::from_static(br#"{"name":"x"}"#)).unwrap();
        assert_eq!(body, Some(Body { name: "x".into() }));
    }

    #[test]
    fn malformed_body_is_bad_request() {
        let err = optional_json::<Body>(&Bytes::from_static(b"{name")).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
