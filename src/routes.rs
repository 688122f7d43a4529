//! Static route table built from discovered endpoints.
//!
//! Each endpoint declaring exactly one operation becomes one [`BoundRoute`].
//! The table is built once per server generation and never mutated.

use std::fmt;
use std::sync::{Arc, OnceLock};

use axum::http::Method;
use regex::Regex;

use crate::descriptor::EndpointDescriptor;
use crate::error::SpaError;
use crate::handler::Handler;
use crate::registry::HandlerRegistry;

/// One endpoint bound to one method and path.
#[derive(Clone)]
pub struct BoundRoute {
    pub endpoint: String,
    pub method: Method,
    /// Path as declared in the descriptor, e.g. `/users/{id}`.
    pub path: String,
    /// Path registered with the router, e.g. `/users/:p1`.
    pub router_path: String,
    /// Declared names of the captured segments, in path order.
    pub param_names: Vec<String>,
    pub handler: Arc<dyn Handler>,
}

impl fmt::Debug for BoundRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundRoute")
            .field("endpoint", &self.endpoint)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("router_path", &self.router_path)
            .finish()
    }
}

/// Every bound route plus the endpoints that were documented but not bound.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<BoundRoute>,
    unbound: Vec<String>,
}

fn param_segment() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\{([^{}/]+)\}$").expect("valid regex"))
}

/// Translate an OpenAPI path into the router's capture syntax.
///
/// Whole-segment `{name}` captures become `:p<index>` where `<index>` is the
/// segment position, so two routes sharing a prefix always agree on capture
/// names. The declared names are returned separately, in order.
pub fn to_router_path(path: &str) -> (String, Vec<String>) {
    let mut names = Vec::new();
    let segments = path
        .split('/')
        .enumerate()
        .map(|(index, segment)| match param_segment().captures(segment) {
            Some(caps) => {
                names.push(caps[1].to_string());
                format!(":p{}", index)
            }
            None => segment.to_string(),
        })
        .collect::<Vec<_>>();
    (segments.join("/"), names)
}

/// Whether a literal segment of `path` would be read as router syntax.
///
/// The router treats `:` and `*` as capture markers; only whole-segment
/// `{name}` captures are translated, so anything else carrying them is not
/// routable as declared.
pub fn has_router_syntax(path: &str) -> bool {
    path.split('/')
        .filter(|segment| !param_segment().is_match(segment))
        .any(|segment| segment.contains([':', '*']))
}

impl RouteTable {
    /// Bind every endpoint with exactly one operation to its registered handler.
    ///
    /// `descriptors` must be in discovery order. When two endpoints claim the
    /// same method on the same path, the later one replaces the earlier one.
    /// A bindable endpoint missing from `registry` is
    /// [`SpaError::HandlerNotRegistered`].
    pub fn bind(
        descriptors: &[EndpointDescriptor],
        registry: &HandlerRegistry,
    ) -> crate::Result<Self> {
        let mut table = RouteTable::default();

        for descriptor in descriptors {
            let mut operations = descriptor.operations();
            if operations.len() != 1 {
                tracing::warn!(
                    endpoint = %descriptor.name,
                    operations = operations.len(),
                    "endpoint does not declare exactly one operation, documented but not bound"
                );
                table.unbound.push(descriptor.name.clone());
                continue;
            }
            let operation = operations.remove(0);

            if !operation.path.starts_with('/') {
                tracing::warn!(
                    endpoint = %descriptor.name,
                    path = %operation.path,
                    "path does not start with '/', documented but not bound"
                );
                table.unbound.push(descriptor.name.clone());
                continue;
            }

            if has_router_syntax(&operation.path) {
                tracing::warn!(
                    endpoint = %descriptor.name,
                    path = %operation.path,
                    "path contains router syntax outside a capture, documented but not bound"
                );
                table.unbound.push(descriptor.name.clone());
                continue;
            }

            let handler = registry
                .get(&descriptor.name)
                .ok_or_else(|| SpaError::HandlerNotRegistered(descriptor.name.clone()))?;

            let (router_path, param_names) = to_router_path(&operation.path);

            if let Some(index) = table
                .routes
                .iter()
                .position(|r| r.method == operation.method && r.router_path == router_path)
            {
                let replaced = table.routes.remove(index);
                tracing::warn!(
                    method = %operation.method,
                    path = %operation.path,
                    replaced = %replaced.endpoint,
                    winner = %descriptor.name,
                    "route bound by several endpoints, keeping the last"
                );
                table.unbound.push(replaced.endpoint);
            }

            tracing::debug!(
                endpoint = %descriptor.name,
                method = %operation.method,
                path = %operation.path,
                "route bound"
            );
            table.routes.push(BoundRoute {
                endpoint: descriptor.name.clone(),
                method: operation.method,
                path: operation.path,
                router_path,
                param_names,
                handler,
            });
        }

        Ok(table)
    }

    pub fn routes(&self) -> &[BoundRoute] {
        &self.routes
    }

    /// Endpoints present in the API document but without a route.
    pub fn unbound(&self) -> &[String] {
        &self.unbound
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
