//! Local HTTP surface.
//!
//! [`build_app`] assembles one router per server generation: the bound
//! endpoint routes nested under the environment prefix, plus the root info,
//! `/openapi.json`, `/docs` and `/redoc` routes. Nothing in it is mutated
//! after construction; a new route table means a new router.

pub mod dispatch;
pub mod docs;

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::RawPathParamsRejection;
use axum::extract::{ConnectInfo, RawPathParams, Request};
use axum::http::header::{CONTENT_TYPE, HOST};
use axum::http::{HeaderMap, Uri};
use axum::response::Html;
use axum::routing::{get, MethodFilter, MethodRouter};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::descriptor::{load_descriptors, MalformedPolicy};
use crate::error::SpaError;
use crate::event::FALLBACK_SOURCE_IP;
use crate::openapi::read_document;
use crate::registry::HandlerRegistry;
use crate::routes::RouteTable;

pub use dispatch::DispatchOptions;

pub const OPENAPI_ROUTE: &str = "/openapi.json";
pub const DOCS_ROUTE: &str = "/docs";
pub const REDOC_ROUTE: &str = "/redoc";

fn validate_prefix(prefix: &str) -> crate::Result<()> {
    if [OPENAPI_ROUTE, DOCS_ROUTE, REDOC_ROUTE].contains(&prefix) {
        return Err(SpaError::InvalidConfig(
            "ENVIRONMENT".to_string(),
            format!("prefix '{}' collides with a built-in route", prefix),
        ));
    }
    if prefix.ends_with('/') || prefix.contains([':', '*', '{', '}']) {
        return Err(SpaError::InvalidConfig(
            "ENVIRONMENT".to_string(),
            format!("'{}' is not usable as a path prefix", prefix),
        ));
    }
    Ok(())
}

/// Assemble the application router for one generation.
///
/// `document` is the aggregated API document as written to disk; it is served
/// verbatim.
pub fn build_app(
    config: &ServerConfig,
    routes: &RouteTable,
    document: Vec<u8>,
) -> crate::Result<Router> {
    let prefix = config.prefix();
    validate_prefix(&prefix)?;

    let options = DispatchOptions {
        handler_timeout: config.handler_timeout,
        proxy_headers: config.proxy_headers,
    };

    let mut grouped: BTreeMap<String, MethodRouter> = BTreeMap::new();
    for route in routes.routes() {
        let filter = match MethodFilter::try_from(route.method.clone()) {
            Ok(filter) => filter,
            Err(e) => {
                tracing::warn!(endpoint = %route.endpoint, method = %route.method, error = %e, "method not routable");
                continue;
            }
        };
        let bound = Arc::new(route.clone());
        let handler = move |params: Result<RawPathParams, RawPathParamsRejection>,
                            request: Request| {
            let bound = bound.clone();
            async move { dispatch::dispatch(bound, options, params.ok(), request).await }
        };
        let method_router = grouped.remove(&route.router_path).unwrap_or_default();
        grouped.insert(route.router_path.clone(), method_router.on(filter, handler));
    }

    let mut api = Router::new();
    for (path, method_router) in grouped {
        api = api.route(&path, method_router);
    }

    let root_path = config.root_path.trim_end_matches('/').to_string();
    let openapi_url = format!("{}{}", root_path, OPENAPI_ROUTE);
    let title = docs::document_title(&document);
    let swagger_page = docs::swagger_ui_html(&title, &openapi_url);
    let redoc_page = docs::redoc_html(&title, &openapi_url);
    let document = Bytes::from(document);
    let info_config = Arc::new(config.clone());

    let mut app = Router::new()
        .route(
            "/",
            get(
                move |connect: Option<ConnectInfo<SocketAddr>>, uri: Uri, headers: HeaderMap| {
                    let config = info_config.clone();
                    async move { Json(root_info(&config, connect, &uri, &headers)) }
                },
            ),
        )
        .route(
            OPENAPI_ROUTE,
            get(move || {
                let document = document.clone();
                async move { ([(CONTENT_TYPE, "application/json")], document) }
            }),
        )
        .route(
            DOCS_ROUTE,
            get(move || {
                let page = swagger_page.clone();
                async move { Html(page) }
            }),
        )
        .route(
            REDOC_ROUTE,
            get(move || {
                let page = redoc_page.clone();
                async move { Html(page) }
            }),
        );

    if !routes.is_empty() {
        app = app.nest(&prefix, api);
    }

    tracing::info!(
        prefix = %prefix,
        routes = routes.len(),
        unbound = routes.unbound().len(),
        "application assembled"
    );

    Ok(app
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http()))
}

/// Body of `GET /`: the effective configuration and request details.
fn root_info(
    config: &ServerConfig,
    connect: Option<ConnectInfo<SocketAddr>>,
    uri: &Uri,
    headers: &HeaderMap,
) -> Value {
    let forwarded = if config.proxy_headers {
        dispatch::forwarded_client(headers)
    } else {
        None
    };
    let client_host = forwarded
        .or_else(|| connect.map(|ConnectInfo(addr)| addr.ip().to_string()))
        .unwrap_or_else(|| FALLBACK_SOURCE_IP.to_string());
    let host = headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| config.addr());
    let root_path = config.root_path.trim_end_matches('/');
    let path_and_query = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");

    json!({
        "Message": "Api deployed",
        "Configuration": {
            "environment": config.environment,
            "server": {
                "host": config.host,
                "port": config.port.to_string(),
                "reload": config.reload,
                "log_level": config.log_level,
                "root_path": config.root_path,
                "proxy_headers": config.proxy_headers,
            },
            "request": {
                "client_host": client_host,
                "base_url": format!("http://{}{}/", host, root_path),
                "url": format!("http://{}{}", host, path_and_query),
            },
            "api": {
                "prefix": config.prefix(),
                "openapi_url": format!("{}{}", root_path, OPENAPI_ROUTE),
                "docs_url": format!("{}{}", root_path, DOCS_ROUTE),
                "redoc_url": format!("{}{}", root_path, REDOC_ROUTE),
            }
        }
    })
}

/// Bind `host:port` and serve `app` until `cancel` fires.
pub async fn serve(
    config: &ServerConfig,
    app: Router,
    cancel: CancellationToken,
) -> crate::Result<()> {
    let addr = config.addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| SpaError::Bind(addr.clone(), e.to_string()))?;
    serve_listener(listener, app, cancel).await
}

/// Serve `app` on an already bound listener until `cancel` fires.
pub async fn serve_listener(
    listener: TcpListener,
    app: Router,
    cancel: CancellationToken,
) -> crate::Result<()> {
    let local = listener
        .local_addr()
        .map_err(|e| SpaError::Server(e.to_string()))?;
    tracing::info!(addr = %local, "local API server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(cancel.cancelled_owned())
    .await
    .map_err(|e| SpaError::Server(e.to_string()))?;

    tracing::info!(addr = %local, "local API server stopped");
    Ok(())
}

/// Entry point for a project's own server binary.
///
/// Reads [`ServerConfig::from_env`], serves the artifact at
/// `SPA_DOCUMENT_PATH`, and binds the endpoints found under
/// `SPA_LAMBDAS_PATH` to the handlers in `registry`.
pub async fn serve_from_env(
    registry: HandlerRegistry,
    cancel: CancellationToken,
) -> crate::Result<()> {
    let config = ServerConfig::from_env()?;
    let document = read_document(&config.document_path)?;
    let discovery = load_descriptors(&config.lambdas_path, MalformedPolicy::Skip)?;
    let routes = RouteTable::bind(&discovery.descriptors, &registry)?;
    let app = build_app(&config, &routes, document)?;
    serve(&config, app, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::InvocationContext;
    use crate::descriptor::EndpointDescriptor;
    use crate::event::InvocationEvent;
    use crate::response::HandlerResult;
    use axum::body::Body;
    use axum::http::{Method, StatusCode};
    use std::path::Path;
    use std::time::Duration;
    use tower::ServiceExt;

    const DOCUMENT: &[u8] = br#"{"openapi":"3.0.0","info":{"title":"Test API"},"paths":{}}"#;

    fn descriptor(name: &str, yaml: &str) -> EndpointDescriptor {
        EndpointDescriptor::from_yaml(name, Path::new(name), yaml).unwrap()
    }

    fn echo_path(event: InvocationEvent, _c: InvocationContext) -> HandlerResult {
        HandlerResult::new(200, event.raw_path)
    }

    fn echo_event(event: InvocationEvent, _c: InvocationContext) -> HandlerResult {
        HandlerResult::new(200, serde_json::to_string(&event).unwrap())
    }

    fn app_with(config: &ServerConfig) -> Router {
        let descriptors = vec![
            descriptor("echo", "/echo:\n  post: {}\n"),
            descriptor("explode", "/explode:\n  get: {}\n"),
            descriptor("ping", "/ping:\n  get: {}\n"),
            descriptor("raw_path", "/where:\n  get: {}\n"),
            descriptor("slow", "/slow:\n  get: {}\n"),
            descriptor("teapot", "/bogus:\n  get: {}\n"),
            descriptor("user", "/users/{id}:\n  get: {}\n"),
        ];
        let mut registry = HandlerRegistry::new();
        registry
            .register_fn("echo", echo_event)
            .register_fn("explode", |_e: InvocationEvent, _c: InvocationContext| {
                panic!("handler bug")
            })
            .register_fn("ping", |_e: InvocationEvent, _c: InvocationContext| {
                HandlerResult::new(200, "pong")
            })
            .register_fn("raw_path", echo_path)
            .register_fn("slow", |_e: InvocationEvent, _c: InvocationContext| {
                std::thread::sleep(Duration::from_millis(500));
                HandlerResult::default()
            })
            .register_fn("teapot", |_e: InvocationEvent, _c: InvocationContext| HandlerResult {
                status_code: Some(1000),
                ..Default::default()
            })
            .register_fn("user", echo_event);
        let routes = RouteTable::bind(&descriptors, &registry).unwrap();
        build_app(config, &routes, DOCUMENT.to_vec()).unwrap()
    }

    fn app() -> Router {
        app_with(&ServerConfig::default())
    }

    async fn send(app: Router, method: Method, uri: &str, body: &str) -> (StatusCode, HeaderMap, String) {
        let request = axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_wildcard_path_left_unrouted() {
        let descriptors = vec![
            descriptor("files", "/files/*:\n  get: {}\n"),
            descriptor("ping", "/ping:\n  get: {}\n"),
        ];
        let mut registry = HandlerRegistry::new();
        registry
            .register_fn("files", echo_path)
            .register_fn("ping", echo_path);
        let routes = RouteTable::bind(&descriptors, &registry).unwrap();
        assert_eq!(routes.unbound(), ["files".to_string()]);

        let app = build_app(&ServerConfig::default(), &routes, DOCUMENT.to_vec()).unwrap();
        let (status, _, _) = send(app.clone(), Method::GET, "/dev/files/a", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _, body) = send(app, Method::GET, "/dev/ping", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "/dev/ping");
    }

    #[tokio::test]
    async fn test_endpoint_served_under_prefix() {
        let (status, headers, body) = send(app(), Method::GET, "/dev/ping", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "pong");
        assert_eq!(headers[CONTENT_TYPE], "text/plain; charset=utf-8");

        let (status, _, _) = send(app(), Method::GET, "/ping", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_empty_environment_uses_v1_prefix() {
        let config = ServerConfig {
            environment: String::new(),
            ..Default::default()
        };
        let (status, _, body) = send(app_with(&config), Method::GET, "/v1/ping", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "pong");
    }

    #[tokio::test]
    async fn test_environment_prefix_lower_cased() {
        let config = ServerConfig {
            environment: "QA".to_string(),
            ..Default::default()
        };
        let (status, _, _) = send(app_with(&config), Method::GET, "/qa/ping", "").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_raw_path_includes_prefix() {
        let (_, _, body) = send(app(), Method::GET, "/dev/where", "").await;
        assert_eq!(body, "/dev/where");
    }

    #[tokio::test]
    async fn test_event_carries_query_body_and_method() {
        let (status, headers, body) =
            send(app(), Method::POST, "/dev/echo?a=1&b=2", "hello").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[CONTENT_TYPE], "application/json");

        let event: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(event["queryStringParameters"], json!({"a": "1", "b": "2"}));
        assert_eq!(event["body"], "hello");
        assert_eq!(event["isBase64Encoded"], false);
        assert_eq!(event["requestContext"]["http"]["method"], "POST");
        assert_eq!(event["requestContext"]["http"]["sourceIp"], "127.0.0.1");
    }

    #[tokio::test]
    async fn test_path_parameters_use_declared_names() {
        let (status, _, body) = send(app(), Method::GET, "/dev/users/42", "").await;
        assert_eq!(status, StatusCode::OK);
        let event: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(event["pathParameters"], json!({"id": "42"}));
        assert_eq!(event["queryStringParameters"], Value::Null);
    }

    #[tokio::test]
    async fn test_wrong_method_rejected() {
        let (status, _, _) = send(app(), Method::DELETE, "/dev/ping", "").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_handler_panic_is_500() {
        let (status, _, body) = send(app(), Method::GET, "/dev/explode", "").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            serde_json::from_str::<Value>(&body).unwrap(),
            json!({"message": "Internal Server Error"})
        );
    }

    #[tokio::test]
    async fn test_unrepresentable_status_is_502() {
        let (status, _, _) = send(app(), Method::GET, "/dev/bogus", "").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_handler_timeout_is_504() {
        let config = ServerConfig {
            handler_timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let (status, _, _) = send(app_with(&config), Method::GET, "/dev/slow", "").await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_openapi_served_verbatim() {
        let (status, headers, body) = send(app(), Method::GET, "/openapi.json", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[CONTENT_TYPE], "application/json");
        assert_eq!(body.as_bytes(), DOCUMENT);
    }

    #[tokio::test]
    async fn test_docs_pages() {
        let (status, _, body) = send(app(), Method::GET, "/docs", "").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("swagger-ui"));
        assert!(body.contains("Test API"));

        let (status, _, body) = send(app(), Method::GET, "/redoc", "").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(r#"spec-url="/openapi.json""#));
    }

    #[tokio::test]
    async fn test_root_info() {
        let request = axum::http::Request::builder()
            .uri("/")
            .header(HOST, "localhost:8000")
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let info: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(info["Message"], "Api deployed");
        let config = &info["Configuration"];
        assert_eq!(config["environment"], "dev");
        assert_eq!(config["server"]["port"], "8000");
        assert_eq!(config["server"]["reload"], true);
        assert_eq!(config["request"]["client_host"], "127.0.0.1");
        assert_eq!(config["request"]["base_url"], "http://localhost:8000/");
        assert_eq!(config["api"]["prefix"], "/dev");
        assert_eq!(config["api"]["docs_url"], "/docs");
    }

    #[tokio::test]
    async fn test_cors_permissive() {
        let request = axum::http::Request::builder()
            .uri("/dev/ping")
            .header("origin", "http://example.com")
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
    }

    #[tokio::test]
    async fn test_proxy_headers_override_source_ip() {
        let config = ServerConfig {
            proxy_headers: true,
            ..Default::default()
        };
        let request = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/dev/echo")
            .header("x-forwarded-for", "203.0.113.9")
            .body(Body::empty())
            .unwrap();
        let response = app_with(&config).oneshot(request).await.unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let event: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(event["requestContext"]["http"]["sourceIp"], "203.0.113.9");
    }

    #[test]
    fn test_prefix_colliding_with_builtin_rejected() {
        let config = ServerConfig {
            environment: "docs".to_string(),
            ..Default::default()
        };
        let result = build_app(&config, &RouteTable::default(), DOCUMENT.to_vec());
        assert!(matches!(result, Err(SpaError::InvalidConfig(field, _)) if field == "ENVIRONMENT"));
    }

    #[tokio::test]
    async fn test_no_routes_still_serves_docs() {
        let app = build_app(&ServerConfig::default(), &RouteTable::default(), DOCUMENT.to_vec())
            .unwrap();
        let (status, _, _) = send(app, Method::GET, "/openapi.json", "").await;
        assert_eq!(status, StatusCode::OK);
    }
}
