//! spa-local: local gateway emulation for serverless-style HTTP APIs.
//!
//! Discovers endpoint directories, merges their descriptors into one OpenAPI
//! document, and serves every endpoint locally by translating each HTTP
//! request into the gateway's invocation event and the handler's result back
//! into an HTTP response.

pub mod config;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod event;
pub mod handler;
pub mod local;
pub mod openapi;
pub mod registry;
pub mod response;
pub mod routes;
pub mod scaffold;
pub mod server;
pub mod supervisor;

pub use config::{Project, ProjectConfig, RuntimeConfig, RuntimeMode, ServerConfig};
pub use context::InvocationContext;
pub use descriptor::{
    discover_endpoint_names, load_descriptors, Discovery, EndpointDescriptor, MalformedPolicy,
};
pub use error::{Result, SpaError};
pub use event::InvocationEvent;
pub use handler::{FnHandler, Handler, HandlerFn, ProcessHandler};
pub use local::{prepare_app, run_local, RunOptions};
pub use openapi::{aggregate, build_api_document, ApiDocument, Aggregation, PathCollision};
pub use registry::HandlerRegistry;
pub use response::{adapt, AdaptedResponse, HandlerResult};
pub use routes::{BoundRoute, RouteTable};
pub use scaffold::{init, InitOptions};
pub use server::{build_app, serve, serve_from_env, serve_listener};
pub use supervisor::{supervise, SupervisorOutcome};
