//! Invocation event synthesis.
//!
//! Translates one inbound HTTP request into the gateway's HTTP API (payload
//! format 2.0) proxy event, field for field, so handler code written against
//! the deployed gateway runs unmodified. Absent and empty are kept distinct:
//! `queryStringParameters` and `body` are `null` when there is nothing to send.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, OriginalUri};
use axum::http::header::{COOKIE, USER_AGENT};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Uri};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp format used by `requestContext.time`.
pub const REQUEST_TIME_FORMAT: &str = "%d/%b/%Y:%H:%M:%S +0000";

/// Source IP reported when the client address is unknown.
pub const FALLBACK_SOURCE_IP: &str = "127.0.0.1";

const ROUTE_KEY: &str = "$default";

/// Gateway proxy event for one HTTP request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationEvent {
    pub version: String,
    pub route_key: String,
    pub raw_path: String,
    pub raw_query_string: String,
    /// Cookie values only, in header order.
    pub cookies: Vec<String>,
    pub headers: BTreeMap<String, String>,
    /// `None` when the request has no query parameters, never an empty map.
    pub query_string_parameters: Option<BTreeMap<String, String>>,
    pub request_context: RequestContext,
    /// UTF-8 text, or base64 when the bytes are not valid UTF-8; `None` without a body.
    pub body: Option<String>,
    pub path_parameters: BTreeMap<String, String>,
    /// Always `false`, including when `body` carries base64 text.
    pub is_base64_encoded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub account_id: String,
    pub api_id: String,
    pub authentication: Authentication,
    pub authorizer: Authorizer,
    pub domain_name: String,
    pub domain_prefix: String,
    pub http: HttpDescription,
    pub request_id: String,
    pub route_key: String,
    pub stage: String,
    pub time: String,
    pub time_epoch: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authentication {
    pub client_cert: ClientCert,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientCert {
    #[serde(rename = "clientCertPem")]
    pub client_cert_pem: String,
    #[serde(rename = "subjectDN")]
    pub subject_dn: String,
    #[serde(rename = "issuerDN")]
    pub issuer_dn: String,
    #[serde(rename = "serialNumber")]
    pub serial_number: String,
    pub validity: CertValidity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertValidity {
    pub not_before: String,
    pub not_after: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Authorizer {
    pub jwt: JwtAuthorizer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JwtAuthorizer {
    pub claims: BTreeMap<String, String>,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpDescription {
    pub method: String,
    pub path: String,
    pub protocol: String,
    pub source_ip: String,
    pub user_agent: String,
}

impl Authentication {
    /// Static client-certificate block copied from the gateway's documented sample.
    fn fixture() -> Self {
        Self {
            client_cert: ClientCert {
                client_cert_pem: "CERT_CONTENT".to_string(),
                subject_dn: "www.example.com".to_string(),
                issuer_dn: "Example issuer".to_string(),
                serial_number: "a1:a1:a1:a1:a1:a1:a1:a1:a1:a1:a1:a1:a1:a1:a1:a1".to_string(),
                validity: CertValidity {
                    not_before: "May 28 12:30:02 2019 GMT".to_string(),
                    not_after: "Aug  5 09:36:04 2021 GMT".to_string(),
                },
            },
        }
    }
}

impl Authorizer {
    fn fixture() -> Self {
        Self {
            jwt: JwtAuthorizer {
                claims: BTreeMap::from([
                    ("claim1".to_string(), "value1".to_string()),
                    ("claim2".to_string(), "value2".to_string()),
                ]),
                scopes: vec!["scope1".to_string(), "scope2".to_string()],
            },
        }
    }
}

impl InvocationEvent {
    /// Synthesize the event for a request whose body has already been read.
    ///
    /// The client address comes from [`ConnectInfo`] and the full path from
    /// [`OriginalUri`] when those extensions are present, so a route nested
    /// under the environment prefix still reports the prefixed path.
    pub fn from_request(
        parts: &Parts,
        body: &[u8],
        path_parameters: BTreeMap<String, String>,
    ) -> Self {
        Self::from_request_at(parts, body, path_parameters, Utc::now())
    }

    pub(crate) fn from_request_at(
        parts: &Parts,
        body: &[u8],
        path_parameters: BTreeMap<String, String>,
        now: DateTime<Utc>,
    ) -> Self {
        let uri: &Uri = parts
            .extensions
            .get::<OriginalUri>()
            .map(|original| &original.0)
            .unwrap_or(&parts.uri);
        let raw_path = uri.path().to_string();
        let raw_query_string = uri.query().unwrap_or_default().to_string();

        let headers = flatten_headers(&parts.headers);
        let user_agent = parts
            .headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let source_ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.ip().to_string())
            .unwrap_or_else(|| FALLBACK_SOURCE_IP.to_string());

        Self {
            version: "2.0".to_string(),
            route_key: ROUTE_KEY.to_string(),
            raw_path: raw_path.clone(),
            raw_query_string: raw_query_string.clone(),
            cookies: cookie_values(&parts.headers),
            headers,
            query_string_parameters: query_parameters(&raw_query_string),
            request_context: RequestContext {
                account_id: "123456789012".to_string(),
                api_id: "api-id".to_string(),
                authentication: Authentication::fixture(),
                authorizer: Authorizer::fixture(),
                domain_name: "id.execute-api.us-east-1.amazonaws.com".to_string(),
                domain_prefix: "id".to_string(),
                http: HttpDescription {
                    method: parts.method.to_string(),
                    path: raw_path,
                    protocol: format!("{:?}", parts.version),
                    source_ip,
                    user_agent,
                },
                request_id: uuid::Uuid::new_v4().to_string(),
                route_key: ROUTE_KEY.to_string(),
                stage: ROUTE_KEY.to_string(),
                time: now.format(REQUEST_TIME_FORMAT).to_string(),
                time_epoch: now.timestamp_millis(),
            },
            body: encode_body(body),
            path_parameters,
            is_base64_encoded: false,
        }
    }
}

/// Header map with repeated headers joined by `,`. Names are lower-case.
fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        out.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    out
}

/// Cookie values across all `Cookie` headers, one per name.
///
/// A repeated name keeps the position it was first seen at and the value it
/// was last given.
fn cookie_values(headers: &HeaderMap) -> Vec<String> {
    let mut cookies: Vec<(String, String)> = Vec::new();
    let pairs = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|header| header.split(';'))
        .filter_map(|pair| pair.trim().split_once('='));
    for (name, value) in pairs {
        let name = name.trim();
        let value = value.trim().to_string();
        match cookies.iter_mut().find(|(existing, _)| existing.as_str() == name) {
            Some((_, slot)) => *slot = value,
            None => cookies.push((name.to_string(), value)),
        }
    }
    cookies.into_iter().map(|(_, value)| value).collect()
}

/// Decoded query parameters; a repeated key keeps its last value.
fn query_parameters(raw: &str) -> Option<BTreeMap<String, String>> {
    if raw.is_empty() {
        return None;
    }
    let params: BTreeMap<String, String> = decode_query_pairs(raw).into_iter().collect();
    (!params.is_empty()).then_some(params)
}

fn decode_query_pairs(raw: &str) -> Vec<(String, String)> {
    let uri = format!("/?{}", raw);
    match uri.parse::<Uri>() {
        Ok(uri) => axum::extract::Query::<Vec<(String, String)>>::try_from_uri(&uri)
            .map(|q| q.0)
            .unwrap_or_default(),
        Err(_) => Vec::new(),
    }
}

fn encode_body(body: &[u8]) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    Some(match std::str::from_utf8(body) {
        Ok(text) => text.to_string(),
        Err(_) => BASE64.encode(body),
    })
}
