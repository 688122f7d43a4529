//! HandlerRegistry: the explicit endpoint-name → handler mapping.
//!
//! Populated by a bootstrap step before any route is bound. Route binding
//! looks every bindable endpoint up here and fails fast on a miss, so a
//! missing handler is a startup error rather than a first-request error.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Component, Path};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{RuntimeConfig, RuntimeMode};
use crate::context::InvocationContext;
use crate::descriptor::EndpointDescriptor;
use crate::error::SpaError;
use crate::event::InvocationEvent;
use crate::handler::process::{
    ENDPOINT_ENV, HANDLER_FUNCTION_ENV, HANDLER_MODULE_ENV, PYTHON_BOOTSTRAP,
};
use crate::handler::{FnHandler, Handler, ProcessHandler};
use crate::response::HandlerResult;

/// Module imported when no handler file is configured.
const DEFAULT_HANDLER_MODULE: &str = "lambda_function";

/// Mapping from endpoint name to its handler.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn Handler>>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, replacing any previous registration.
    pub fn register(&mut self, name: impl Into<String>, handler: impl Handler) -> &mut Self {
        let name = name.into();
        if self.handlers.insert(name.clone(), Arc::new(handler)).is_some() {
            tracing::debug!(endpoint = %name, "replacing registered handler");
        }
        self
    }

    /// Register a plain synchronous function.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, func: F) -> &mut Self
    where
        F: Fn(InvocationEvent, InvocationContext) -> HandlerResult + Clone + Send + Sync + 'static,
    {
        self.register(name, FnHandler::new(func))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// One [`ProcessHandler`] per descriptor, with `env` overlaid on the
    /// inherited environment.
    ///
    /// In [`RuntimeMode::Python`] the bootstrap runs from `project_root` and
    /// imports the endpoint's handler file as a module named after its path
    /// below the root. In [`RuntimeMode::Command`] `runtime.command` runs in the
    /// endpoint directory.
    ///
    /// When `runtime.handler_file` names a file, descriptors whose directory
    /// lacks it are left unregistered. An empty name disables the check.
    pub fn from_runtime(
        project_root: &Path,
        descriptors: &[EndpointDescriptor],
        runtime: &RuntimeConfig,
        env: HashMap<String, String>,
    ) -> crate::Result<Self> {
        let command_line = match runtime.mode {
            RuntimeMode::Python => vec![
                runtime.interpreter.clone(),
                "-c".to_string(),
                PYTHON_BOOTSTRAP.to_string(),
            ],
            RuntimeMode::Command => runtime.command.clone(),
        };
        if command_line.first().is_none_or(|program| program.trim().is_empty()) {
            let field = match runtime.mode {
                RuntimeMode::Python => "runtime.interpreter",
                RuntimeMode::Command => "runtime.command",
            };
            return Err(SpaError::InvalidConfig(
                field.to_string(),
                "must name an executable".to_string(),
            ));
        }

        let handler_file = runtime.handler_file.as_deref().filter(|f| !f.is_empty());
        let timeout = Duration::from_secs(runtime.timeout_secs);
        let mut registry = Self::new();
        for descriptor in descriptors {
            if let Some(file) = handler_file {
                if !descriptor.dir.join(file).is_file() {
                    tracing::debug!(
                        endpoint = %descriptor.name,
                        file = %file,
                        "handler file missing, endpoint left unregistered"
                    );
                    continue;
                }
            }

            let handler =
                process_handler(project_root, descriptor, runtime, &command_line, timeout, &env)?;
            registry.register(descriptor.name.clone(), handler);
        }

        tracing::debug!(handlers = registry.len(), mode = ?runtime.mode, "process handlers registered");
        Ok(registry)
    }
}

fn process_handler(
    project_root: &Path,
    descriptor: &EndpointDescriptor,
    runtime: &RuntimeConfig,
    command_line: &[String],
    timeout: Duration,
    env: &HashMap<String, String>,
) -> crate::Result<ProcessHandler> {
    let mut handler_env = env.clone();
    handler_env.insert(ENDPOINT_ENV.to_string(), descriptor.name.clone());
    let dir = match runtime.mode {
        RuntimeMode::Python => {
            let handler_file = runtime.handler_file.as_deref().filter(|f| !f.is_empty());
            let module = handler_module(project_root, &descriptor.dir, handler_file)?;
            handler_env.insert(HANDLER_MODULE_ENV.to_string(), module);
            handler_env.insert(
                HANDLER_FUNCTION_ENV.to_string(),
                runtime.handler_function.clone(),
            );
            project_root.to_path_buf()
        }
        RuntimeMode::Command => descriptor.dir.clone(),
    };
    Ok(ProcessHandler::new(dir, command_line, timeout)?.with_env(handler_env))
}

/// Dotted module path of the handler file in `dir`, relative to `root`.
///
/// `src/lambdas/ping` with `lambda_function.py` gives
/// `src.lambdas.ping.lambda_function`.
fn handler_module(root: &Path, dir: &Path, handler_file: Option<&str>) -> crate::Result<String> {
    let relative = dir.strip_prefix(root).map_err(|_| {
        SpaError::InvalidConfig(
            "folders.lambdas".to_string(),
            format!(
                "endpoint directory '{}' is outside the project root '{}'",
                dir.display(),
                root.display()
            ),
        )
    })?;
    let stem = handler_file
        .map(Path::new)
        .and_then(|f| f.file_stem())
        .and_then(|f| f.to_str())
        .unwrap_or(DEFAULT_HANDLER_MODULE);

    let mut parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    parts.push(stem.to_string());
    Ok(parts.join("."))
}
