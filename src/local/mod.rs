//! In-process local emulation for `spa run local`.
//!
//! One server generation runs the whole startup sequence: discover endpoints,
//! aggregate and write the API document, read it back, register one process
//! handler per endpoint, bind routes, serve. With reload enabled, every
//! relevant file change tears the generation down and starts a new one.

pub mod hot_reload;

use std::collections::HashMap;

use axum::Router;
use tokio_util::sync::CancellationToken;

use crate::config::{Project, ServerConfig};
use crate::descriptor::{load_descriptors, MalformedPolicy};
use crate::error::SpaError;
use crate::openapi::{build_api_document, read_document};
use crate::registry::HandlerRegistry;
use crate::routes::RouteTable;
use crate::server::{build_app, serve};

/// Knobs for [`run_local`] that are not part of the server configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub malformed: MalformedPolicy,
}

/// Run the startup sequence once and return the generation's router.
///
/// Endpoints are discovered under `config.lambdas_path` and the artifact is
/// written to `config.document_path`; the base document comes from the
/// project.
pub fn prepare_app(
    project: &Project,
    config: &ServerConfig,
    options: &RunOptions,
) -> crate::Result<Router> {
    let discovery = load_descriptors(&config.lambdas_path, options.malformed)?;

    let aggregation = build_api_document(
        &project.base_document_path(),
        &discovery.descriptors,
        &config.document_path,
    )?;
    if !aggregation.collisions.is_empty() {
        tracing::warn!(
            collisions = aggregation.collisions.len(),
            "API document built with overwritten paths"
        );
    }
    let document = read_document(&config.document_path)?;

    let env: HashMap<String, String> = config.to_env_vars().into_iter().collect();
    let registry = HandlerRegistry::from_runtime(
        &project.root,
        &discovery.descriptors,
        &project.config.runtime,
        env,
    )?;
    let routes = RouteTable::bind(&discovery.descriptors, &registry)?;

    build_app(config, &routes, document)
}

/// Serve the project locally until `cancel` fires.
///
/// Without reload a startup error is returned immediately. With reload, a
/// startup error is logged and the next file change triggers another attempt.
pub async fn run_local(
    project: &Project,
    config: ServerConfig,
    options: RunOptions,
    cancel: CancellationToken,
) -> crate::Result<()> {
    if !config.reload {
        let app = prepare_app(project, &config, &options)?;
        return serve(&config, app, cancel).await;
    }

    let artifact = config
        .document_path
        .canonicalize()
        .unwrap_or_else(|_| config.document_path.clone());
    let mut changes = hot_reload::watch_changes(
        vec![config.lambdas_path.clone()],
        vec![project.base_document_path()],
        vec![artifact, config.document_path.clone()],
        cancel.child_token(),
    )?;

    let mut generation_count: u64 = 0;
    loop {
        generation_count += 1;
        let app = match prepare_app(project, &config, &options) {
            Ok(app) => app,
            Err(e) => {
                tracing::error!(error = %e, "startup failed, waiting for changes");
                tokio::select! {
                    changed = changes.recv() => {
                        if changed.is_none() {
                            return Err(e);
                        }
                        continue;
                    }
                    _ = cancel.cancelled() => return Ok(()),
                }
            }
        };

        let generation = cancel.child_token();
        let serve_config = config.clone();
        let serve_token = generation.clone();
        let mut server =
            tokio::spawn(async move { serve(&serve_config, app, serve_token).await });
        tracing::info!(generation = generation_count, "server generation started");

        tokio::select! {
            changed = changes.recv() => {
                generation.cancel();
                let _ = (&mut server).await;
                if changed.is_none() {
                    return Ok(());
                }
                tracing::info!("change detected, restarting");
            }
            _ = cancel.cancelled() => {
                let _ = server.await;
                return Ok(());
            }
            result = &mut server => {
                return match result {
                    Ok(result) => result,
                    Err(e) => Err(SpaError::Server(e.to_string())),
                };
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::{ProjectConfig, RuntimeMode};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::path::Path;
    use std::time::Duration;
    use tower::ServiceExt;

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn project(root: &Path) -> (Project, ServerConfig) {
        write(
            &root.join("api.yaml"),
            "openapi: 3.0.0\ninfo:\n  title: Demo\n  version: '1'\npaths: {}\n",
        );
        write(
            &root.join("src/lambdas/ping/endpoint.yaml"),
            "/ping:\n  get:\n    summary: Ping\n",
        );
        write(&root.join("src/lambdas/ping/lambda_function.py"), "");
        write(&root.join("src/lambdas/not_an_endpoint/readme.txt"), "");

        let mut config = ProjectConfig::new("demo");
        config.runtime.mode = RuntimeMode::Command;
        config.runtime.command = vec![
            "sh".to_string(),
            "-c".to_string(),
            r#"cat > /dev/null; echo '{"statusCode": 200, "body": "pong"}'"#.to_string(),
        ];
        let project = Project {
            root: root.to_path_buf(),
            config,
        };
        let server = ServerConfig {
            reload: false,
            port: 0,
            lambdas_path: project.lambdas_path(),
            document_path: project.document_path(),
            ..Default::default()
        };
        (project, server)
    }

    #[tokio::test]
    async fn test_prepare_app_serves_process_handler() {
        let dir = tempfile::tempdir().unwrap();
        let (project, config) = project(dir.path());

        let app = prepare_app(&project, &config, &RunOptions::default()).unwrap();

        let response = app
            .oneshot(Request::builder().uri("/dev/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"pong");

        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(project.document_path()).unwrap()).unwrap();
        assert_eq!(written["info"]["title"], "Demo");
        assert!(written["paths"]["/ping"]["get"].is_object());
    }

    #[tokio::test]
    async fn test_prepare_app_strict_aborts_on_malformed_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let (project, config) = project(dir.path());
        write(
            &dir.path().join("src/lambdas/broken/endpoint.yaml"),
            "- just\n- a list\n",
        );

        let strict = RunOptions {
            malformed: MalformedPolicy::Abort,
        };
        assert!(prepare_app(&project, &config, &strict).is_err());
        assert!(prepare_app(&project, &config, &RunOptions::default()).is_ok());
    }

    #[tokio::test]
    async fn test_missing_lambdas_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (project, mut config) = project(dir.path());
        config.lambdas_path = dir.path().join("nowhere");
        let result = prepare_app(&project, &config, &RunOptions::default());
        assert!(matches!(result, Err(SpaError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_run_local_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let (project, config) = project(dir.path());
        let cancel = CancellationToken::new();

        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            stopper.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            run_local(&project, config, RunOptions::default(), cancel),
        )
        .await;
        assert!(matches!(result, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_run_local_with_reload_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let (project, mut config) = project(dir.path());
        config.reload = true;
        let cancel = CancellationToken::new();

        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            stopper.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            run_local(&project, config, RunOptions::default(), cancel),
        )
        .await;
        assert!(matches!(result, Ok(Ok(()))));
    }
}
