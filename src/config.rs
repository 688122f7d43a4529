//! Server and project configuration.
//!
//! [`ServerConfig`] is the explicit value every startup step receives; it is
//! read from `SERVER_*` / `ENVIRONMENT` variables and can be rendered back into
//! them for a child process. [`ProjectConfig`] is the project's persisted
//! configuration in `.spa/project.toml`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SpaError;

/// Directory holding the project's persisted configuration.
pub const PROJECT_DIR: &str = ".spa";

/// File name of the project configuration inside [`PROJECT_DIR`].
pub const PROJECT_FILE: &str = "project.toml";

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENVIRONMENT: &str = "dev";
const DEFAULT_LAMBDAS: &str = "src/lambdas";
const DEFAULT_BASE_DOCUMENT: &str = "api.yaml";
const DEFAULT_DOCUMENT_OUTPUT: &str = "src/api_local/openapi.json";

/// Runtime configuration of the local HTTP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub reload: bool,
    pub log_level: String,
    pub root_path: String,
    pub proxy_headers: bool,
    /// Raw `ENVIRONMENT` value; the route prefix is derived from it.
    pub environment: String,
    /// Aggregated API document written at build time and served at `/openapi.json`.
    pub document_path: PathBuf,
    /// Handlers root scanned for endpoint directories.
    pub lambdas_path: PathBuf,
    /// Upper bound on a single handler invocation. `None` waits indefinitely.
    pub handler_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            reload: true,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            root_path: String::new(),
            proxy_headers: false,
            environment: DEFAULT_ENVIRONMENT.to_string(),
            document_path: PathBuf::from(DEFAULT_DOCUMENT_OUTPUT),
            lambdas_path: PathBuf::from(DEFAULT_LAMBDAS),
            handler_timeout: None,
        }
    }
}

impl ServerConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> crate::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through an arbitrary variable lookup.
    ///
    /// Every variable is optional. Booleans are true only for the literal
    /// `true`. An unset `ENVIRONMENT` defaults to `dev`, while an empty one is
    /// kept empty so that [`prefix`](Self::prefix) falls back to `/v1`.
    pub fn from_lookup<F>(lookup: F) -> crate::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let port = match lookup("SERVER_PORT") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|e| {
                SpaError::InvalidConfig("SERVER_PORT".to_string(), format!("'{}': {}", raw, e))
            })?,
            None => defaults.port,
        };

        let handler_timeout = match lookup("SPA_HANDLER_TIMEOUT_SECS") {
            Some(raw) => {
                let secs = raw.trim().parse::<u64>().map_err(|e| {
                    SpaError::InvalidConfig(
                        "SPA_HANDLER_TIMEOUT_SECS".to_string(),
                        format!("'{}': {}", raw, e),
                    )
                })?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            None => None,
        };

        Ok(Self {
            host: lookup("SERVER_HOST").unwrap_or(defaults.host),
            port,
            reload: lookup("SERVER_RELOAD").map_or(defaults.reload, |v| v == "true"),
            log_level: lookup("SERVER_LOG_LEVEL").unwrap_or(defaults.log_level),
            root_path: lookup("SERVER_ROOT_PATH").unwrap_or(defaults.root_path),
            proxy_headers: lookup("SERVER_PROXY_HEADERS")
                .map_or(defaults.proxy_headers, |v| v == "true"),
            environment: lookup("ENVIRONMENT").unwrap_or(defaults.environment),
            document_path: lookup("SPA_DOCUMENT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.document_path),
            lambdas_path: lookup("SPA_LAMBDAS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.lambdas_path),
            handler_timeout,
        })
    }

    /// Path prefix all application routes are mounted under.
    pub fn prefix(&self) -> String {
        let env = self.environment.to_lowercase();
        if env.is_empty() {
            "/v1".to_string()
        } else {
            format!("/{}", env)
        }
    }

    /// `host:port` bind address.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Render the configuration as the environment a child server process reads.
    pub fn to_env_vars(&self) -> Vec<(String, String)> {
        let mut vars = vec![
            ("SERVER_HOST".to_string(), self.host.clone()),
            ("SERVER_PORT".to_string(), self.port.to_string()),
            ("SERVER_RELOAD".to_string(), self.reload.to_string()),
            ("SERVER_LOG_LEVEL".to_string(), self.log_level.clone()),
            ("SERVER_ROOT_PATH".to_string(), self.root_path.clone()),
            ("SERVER_PROXY_HEADERS".to_string(), self.proxy_headers.to_string()),
            ("ENVIRONMENT".to_string(), self.environment.clone()),
            (
                "SPA_DOCUMENT_PATH".to_string(),
                self.document_path.display().to_string(),
            ),
            (
                "SPA_LAMBDAS_PATH".to_string(),
                self.lambdas_path.display().to_string(),
            ),
        ];
        if let Some(timeout) = self.handler_timeout {
            vars.push((
                "SPA_HANDLER_TIMEOUT_SECS".to_string(),
                timeout.as_secs().to_string(),
            ));
        }
        vars
    }
}

/// Project configuration, parsed from `.spa/project.toml`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProjectConfig {
    pub project_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_pattern_version")]
    pub pattern_version: String,
    pub db_dialect: Option<String>,
    #[serde(default)]
    pub folders: FoldersConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub server: ChildServerConfig,
}

/// Source folders, relative to the project root.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FoldersConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_lambdas")]
    pub lambdas: PathBuf,
}

/// Inputs and output of API document aggregation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_document")]
    pub base_document: PathBuf,
    #[serde(default = "default_document_output")]
    pub output: PathBuf,
}

/// How `spa run local` executes an endpoint's handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeMode {
    /// Import `handler_function` from the endpoint's handler module with the
    /// bundled bootstrap, run by `interpreter` from the project root.
    #[default]
    Python,
    /// Run `command` inside the endpoint directory.
    Command,
}

/// How endpoint handlers are executed by `spa run local`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub mode: RuntimeMode,
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default = "default_handler_function")]
    pub handler_function: String,
    /// Command run inside each endpoint directory per invocation in
    /// `command` mode.
    #[serde(default)]
    pub command: Vec<String>,
    /// File that must exist in an endpoint directory for its handler to register.
    #[serde(default = "default_handler_file")]
    pub handler_file: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Dependency installation command run by `spa install`.
    #[serde(default)]
    pub install_command: Vec<String>,
}

/// Child server started by `spa run command`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChildServerConfig {
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_pattern_version() -> String {
    "latest".to_string()
}

fn default_root() -> PathBuf {
    PathBuf::from("src")
}

fn default_lambdas() -> PathBuf {
    PathBuf::from(DEFAULT_LAMBDAS)
}

fn default_base_document() -> PathBuf {
    PathBuf::from(DEFAULT_BASE_DOCUMENT)
}

fn default_document_output() -> PathBuf {
    PathBuf::from(DEFAULT_DOCUMENT_OUTPUT)
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_handler_function() -> String {
    "lambda_handler".to_string()
}

fn default_handler_file() -> Option<String> {
    Some("lambda_function.py".to_string())
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

impl Default for FoldersConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            lambdas: default_lambdas(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_document: default_base_document(),
            output: default_document_output(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mode: RuntimeMode::default(),
            interpreter: default_interpreter(),
            handler_function: default_handler_function(),
            command: Vec::new(),
            handler_file: default_handler_file(),
            timeout_secs: default_timeout_secs(),
            install_command: Vec::new(),
        }
    }
}

impl Default for ChildServerConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl ProjectConfig {
    /// A fresh configuration with every optional section at its default.
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            description: String::new(),
            pattern_version: default_pattern_version(),
            db_dialect: None,
            folders: FoldersConfig::default(),
            api: ApiConfig::default(),
            runtime: RuntimeConfig::default(),
            server: ChildServerConfig::default(),
        }
    }

    /// Validate the config, failing fast before anything is built or spawned.
    pub fn validate(&self) -> crate::Result<()> {
        if self.project_name.trim().is_empty() {
            return Err(SpaError::InvalidConfig(
                "project_name".to_string(),
                "must not be empty".to_string(),
            ));
        }

        if let Some(dialect) = &self.db_dialect {
            if dialect != "mysql" && dialect != "postgresql" {
                return Err(SpaError::InvalidConfig(
                    "db_dialect".to_string(),
                    format!("expected 'mysql' or 'postgresql', got '{}'", dialect),
                ));
            }
        }

        if self.folders.lambdas.as_os_str().is_empty() {
            return Err(SpaError::InvalidConfig(
                "folders.lambdas".to_string(),
                "must not be empty".to_string(),
            ));
        }

        match self.runtime.mode {
            RuntimeMode::Python if self.runtime.interpreter.trim().is_empty() => {
                return Err(SpaError::InvalidConfig(
                    "runtime.interpreter".to_string(),
                    "must name an executable".to_string(),
                ));
            }
            RuntimeMode::Python if self.runtime.handler_function.trim().is_empty() => {
                return Err(SpaError::InvalidConfig(
                    "runtime.handler_function".to_string(),
                    "must not be empty".to_string(),
                ));
            }
            RuntimeMode::Command if self.runtime.command.is_empty() => {
                return Err(SpaError::InvalidConfig(
                    "runtime.command".to_string(),
                    "must name an executable".to_string(),
                ));
            }
            _ => {}
        }

        if self.runtime.timeout_secs == 0 {
            return Err(SpaError::InvalidConfig(
                "runtime.timeout_secs".to_string(),
                "must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Flatten the config into dotted `key = value` pairs, sorted by key.
    pub fn entries(&self) -> crate::Result<Vec<(String, String)>> {
        let value = toml::Value::try_from(self)
            .map_err(|e| SpaError::InvalidConfig("project".to_string(), e.to_string()))?;
        let mut out = BTreeMap::new();
        flatten_toml("", &value, &mut out);
        Ok(out.into_iter().collect())
    }
}

fn flatten_toml(prefix: &str, value: &toml::Value, out: &mut BTreeMap<String, String>) {
    match value {
        toml::Value::Table(table) => {
            for (key, inner) in table {
                let dotted = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_toml(&dotted, inner, out);
            }
        }
        toml::Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        other => {
            out.insert(prefix.to_string(), other.to_string());
        }
    }
}

/// A project on disk: its root directory plus its parsed configuration.
#[derive(Debug, Clone)]
pub struct Project {
    pub root: PathBuf,
    pub config: ProjectConfig,
}

impl Project {
    /// Load and validate `<root>/.spa/project.toml`.
    pub fn load(root: &Path) -> crate::Result<Self> {
        let path = root.join(PROJECT_DIR).join(PROJECT_FILE);
        if !path.is_file() {
            return Err(SpaError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(&path).map_err(|e| SpaError::io(&path, e))?;
        let config: ProjectConfig = toml::from_str(&content)
            .map_err(|e| SpaError::InvalidConfig(path.display().to_string(), e.to_string()))?;
        config.validate()?;
        Ok(Self {
            root: root.to_path_buf(),
            config,
        })
    }

    /// Walk up from `start` to the first directory holding `.spa/project.toml`.
    pub fn locate(start: &Path) -> crate::Result<Self> {
        for dir in start.ancestors() {
            if dir.join(PROJECT_DIR).join(PROJECT_FILE).is_file() {
                return Self::load(dir);
            }
        }
        Err(SpaError::NotFound(format!(
            "{}/{} in {} or any parent",
            PROJECT_DIR,
            PROJECT_FILE,
            start.display()
        )))
    }

    pub fn lambdas_path(&self) -> PathBuf {
        self.root.join(&self.config.folders.lambdas)
    }

    pub fn base_document_path(&self) -> PathBuf {
        self.root.join(&self.config.api.base_document)
    }

    pub fn document_path(&self) -> PathBuf {
        self.root.join(&self.config.api.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn parse_toml(toml_str: &str) -> ProjectConfig {
        toml::from_str(toml_str).expect("valid TOML")
    }

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8000);
        assert!(config.reload);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.root_path, "");
        assert!(!config.proxy_headers);
        assert_eq!(config.environment, "dev");
        assert_eq!(config.prefix(), "/dev");
        assert_eq!(config.handler_timeout, None);
    }

    #[test]
    fn test_server_config_from_vars() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("SERVER_HOST", "0.0.0.0"),
            ("SERVER_PORT", "9001"),
            ("SERVER_RELOAD", "false"),
            ("SERVER_PROXY_HEADERS", "true"),
            ("ENVIRONMENT", "QA"),
            ("SPA_HANDLER_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.addr(), "0.0.0.0:9001");
        assert!(!config.reload);
        assert!(config.proxy_headers);
        assert_eq!(config.prefix(), "/qa");
        assert_eq!(config.handler_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_booleans_require_literal_true() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("SERVER_RELOAD", "True"),
            ("SERVER_PROXY_HEADERS", "1"),
        ]))
        .unwrap();
        assert!(!config.reload);
        assert!(!config.proxy_headers);
    }

    #[test]
    fn test_empty_environment_prefix_is_v1() {
        let config = ServerConfig::from_lookup(lookup_from(&[("ENVIRONMENT", "")])).unwrap();
        assert_eq!(config.prefix(), "/v1");
    }

    #[test]
    fn test_invalid_port_rejected() {
        let result = ServerConfig::from_lookup(lookup_from(&[("SERVER_PORT", "eighty")]));
        assert!(matches!(result, Err(SpaError::InvalidConfig(field, _)) if field == "SERVER_PORT"));
    }

    #[test]
    fn test_env_vars_round_trip() {
        let original = ServerConfig {
            port: 8123,
            environment: "staging".to_string(),
            handler_timeout: Some(Duration::from_secs(7)),
            ..ServerConfig::default()
        };
        let vars: HashMap<String, String> = original.to_env_vars().into_iter().collect();
        let restored = ServerConfig::from_lookup(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn test_project_config_defaults() {
        let config = parse_toml(r#"project_name = "demo""#);
        assert!(config.validate().is_ok());
        assert_eq!(config.pattern_version, "latest");
        assert_eq!(config.folders.lambdas, PathBuf::from("src/lambdas"));
        assert_eq!(config.api.base_document, PathBuf::from("api.yaml"));
        assert_eq!(config.runtime.mode, RuntimeMode::Python);
        assert_eq!(config.runtime.interpreter, "python3");
        assert_eq!(config.runtime.handler_function, "lambda_handler");
        assert!(config.runtime.command.is_empty());
        assert_eq!(config.runtime.timeout_secs, 30);
        assert_eq!(config.server.shutdown_grace_secs, 10);
    }

    #[test]
    fn test_empty_project_name_rejected() {
        let config = parse_toml(r#"project_name = "  ""#);
        assert!(
            matches!(config.validate(), Err(SpaError::InvalidConfig(field, _)) if field == "project_name")
        );
    }

    #[test]
    fn test_unknown_dialect_rejected() {
        let config = parse_toml(
            r#"
            project_name = "demo"
            db_dialect = "oracle"
            "#,
        );
        assert!(
            matches!(config.validate(), Err(SpaError::InvalidConfig(field, msg)) if field == "db_dialect" && msg.contains("oracle"))
        );
    }

    #[test]
    fn test_empty_runtime_command_rejected() {
        let config = parse_toml(
            r#"
            project_name = "demo"

            [runtime]
            mode = "command"
            command = []
            "#,
        );
        assert!(
            matches!(config.validate(), Err(SpaError::InvalidConfig(field, _)) if field == "runtime.command")
        );
    }

    #[test]
    fn test_python_mode_needs_interpreter() {
        let config = parse_toml(
            r#"
            project_name = "demo"

            [runtime]
            interpreter = ""
            "#,
        );
        assert!(
            matches!(config.validate(), Err(SpaError::InvalidConfig(field, _)) if field == "runtime.interpreter")
        );

        let config = parse_toml(
            r#"
            project_name = "demo"

            [runtime]
            mode = "command"
            command = ["node", "index.js"]
            "#,
        );
        assert!(config.validate().is_ok());
        assert_eq!(config.runtime.mode, RuntimeMode::Command);
    }

    #[test]
    fn test_entries_are_dotted_and_sorted() {
        let config = parse_toml(
            r#"
            project_name = "demo"
            db_dialect = "mysql"
            "#,
        );
        let entries = config.entries().unwrap();
        let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert!(entries.contains(&("project_name".to_string(), "demo".to_string())));
        assert!(entries.contains(&("folders.lambdas".to_string(), "src/lambdas".to_string())));
    }

    #[test]
    fn test_project_locate_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".spa")).unwrap();
        std::fs::write(
            dir.path().join(".spa/project.toml"),
            "project_name = \"demo\"\n",
        )
        .unwrap();
        let nested = dir.path().join("src/lambdas/ping");
        std::fs::create_dir_all(&nested).unwrap();

        let project = Project::locate(&nested).unwrap();
        assert_eq!(project.root, dir.path());
        assert_eq!(project.lambdas_path(), dir.path().join("src/lambdas"));
    }

    #[test]
    fn test_project_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(Project::load(dir.path()), Err(SpaError::NotFound(_))));
    }
}
