//! Local project skeleton for `spa init`.

use std::path::{Path, PathBuf};

use crate::config::{ProjectConfig, PROJECT_DIR, PROJECT_FILE};
use crate::descriptor::DESCRIPTOR_FILE;
use crate::error::SpaError;

/// Name of the endpoint every new project starts with.
pub const SAMPLE_ENDPOINT: &str = "hello_world";

const SAMPLE_DESCRIPTOR: &str = r#"/hello:
  get:
    summary: Greets the caller
    parameters:
      - name: name
        in: query
        required: false
        schema:
          type: string
    responses:
      "200":
        description: Greeting message
"#;

const SAMPLE_HANDLER: &str = r#"import json


def lambda_handler(event, context):
    params = event.get("queryStringParameters") or {}
    name = params.get("name", "world")
    return {
        "statusCode": 200,
        "body": json.dumps({"message": f"Hello, {name}!", "requestId": context.aws_request_id}),
    }
"#;

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub name: String,
    pub description: String,
    pub pattern_version: String,
    pub db_dialect: Option<String>,
    /// Directory the project directory is created in.
    pub parent: PathBuf,
}

fn base_document(config: &ProjectConfig) -> crate::Result<String> {
    let document = serde_json::json!({
        "openapi": "3.0.3",
        "info": {
            "title": config.project_name,
            "description": config.description,
            "version": "1.0.0",
        },
        "paths": {},
    });
    serde_yaml::to_string(&document)
        .map_err(|e| SpaError::InvalidDocument("api.yaml".to_string(), e.to_string()))
}

fn write_file(path: &Path, content: &str) -> crate::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| SpaError::io(parent, e))?;
    }
    std::fs::write(path, content).map_err(|e| SpaError::io(path, e))
}

/// Create `<parent>/<name>` with a project config, a base API document and
/// one sample endpoint. Returns the project root.
///
/// Fails without touching anything if the target directory already exists.
pub fn init(options: &InitOptions) -> crate::Result<PathBuf> {
    let mut config = ProjectConfig::new(options.name.trim());
    config.description = options.description.clone();
    config.pattern_version = options.pattern_version.clone();
    config.db_dialect = options.db_dialect.clone();
    config.validate()?;

    let root = options.parent.join(&config.project_name);
    if root.exists() {
        return Err(SpaError::InvalidConfig(
            "name".to_string(),
            format!("'{}' already exists", root.display()),
        ));
    }

    let project_toml = toml::to_string_pretty(&config)
        .map_err(|e| SpaError::InvalidConfig("project".to_string(), e.to_string()))?;
    write_file(&root.join(PROJECT_DIR).join(PROJECT_FILE), &project_toml)?;
    write_file(&root.join(&config.api.base_document), &base_document(&config)?)?;

    let endpoint = root.join(&config.folders.lambdas).join(SAMPLE_ENDPOINT);
    write_file(&endpoint.join(DESCRIPTOR_FILE), SAMPLE_DESCRIPTOR)?;
    if let Some(handler_file) = config.runtime.handler_file.as_deref().filter(|f| !f.is_empty()) {
        write_file(&endpoint.join(handler_file), SAMPLE_HANDLER)?;
    }

    tracing::info!(root = %root.display(), "project created");
    Ok(root)
}
