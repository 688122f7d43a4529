//! Handler result adaptation.
//!
//! A handler returns a [`HandlerResult`]; only its status code and body reach
//! the HTTP response. Result headers are accepted and carried, not forwarded.

use std::collections::BTreeMap;

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::SpaError;

/// Value returned by a handler. Every field is optional.
///
/// `statusCode` is kept as a plain integer; range checking happens in [`adapt`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerResult {
    #[serde(rename = "statusCode", default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub headers: BTreeMap<String, String>,
}

/// `"headers": null` reads as no headers.
fn null_as_empty<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<BTreeMap<String, String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl HandlerResult {
    pub fn new(status_code: u16, body: impl Into<String>) -> Self {
        Self {
            status_code: Some(i64::from(status_code)),
            body: Some(body.into()),
            headers: BTreeMap::new(),
        }
    }
}

/// Status and body extracted from a [`HandlerResult`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdaptedResponse {
    pub status: StatusCode,
    pub body: String,
}

/// Apply the defaults: status 200 and an empty body.
///
/// `endpoint` only labels the error when the status code cannot be represented.
pub fn adapt(endpoint: &str, result: HandlerResult) -> crate::Result<AdaptedResponse> {
    let code = result.status_code.unwrap_or(200);
    let status = u16::try_from(code)
        .ok()
        .and_then(|c| StatusCode::from_u16(c).ok())
        .ok_or_else(|| SpaError::InvalidStatusCode(endpoint.to_string(), code))?;
    Ok(AdaptedResponse {
        status,
        body: result.body.unwrap_or_default(),
    })
}

impl IntoResponse for AdaptedResponse {
    fn into_response(self) -> Response {
        let content_type = if !self.body.is_empty()
            && serde_json::from_str::<serde_json::Value>(&self.body).is_ok()
        {
            HeaderValue::from_static("application/json")
        } else {
            HeaderValue::from_static("text/plain; charset=utf-8")
        };
        let mut response = (self.status, self.body).into_response();
        response.headers_mut().insert(CONTENT_TYPE, content_type);
        response
    }
}
