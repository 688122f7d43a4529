//! Endpoint discovery: finds handler directories under the handlers root and
//! parses each one's `endpoint.yaml` into an operation fragment.
//!
//! A directory is an endpoint iff it contains the description file; anything
//! else under the root is ignored. Names are returned in lexicographic order,
//! which is the order later path collisions are resolved in.

use std::path::{Path, PathBuf};

use axum::http::Method;
use serde_json::{Map, Value};

use crate::error::SpaError;

/// Description file every endpoint directory must contain.
pub const DESCRIPTOR_FILE: &str = "endpoint.yaml";

/// Path-item keys treated as HTTP operations.
pub const HTTP_METHODS: [&str; 8] = [
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

/// One discovered endpoint: its logical name and its OpenAPI fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointDescriptor {
    /// Directory name; unique under the handlers root.
    pub name: String,
    /// The endpoint directory itself.
    pub dir: PathBuf,
    /// Path-keyed operation fragment, e.g. `{"/ping": {"get": {...}}}`.
    pub fragment: Map<String, Value>,
}

/// A single HTTP method + path declared by a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub method: Method,
    pub path: String,
}

/// What to do when an endpoint's description file cannot be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MalformedPolicy {
    /// Abort the whole discovery with the parse error.
    Abort,
    /// Exclude the endpoint, record the error, and keep going.
    #[default]
    Skip,
}

/// Result of loading every descriptor under a handlers root.
#[derive(Debug, Default)]
pub struct Discovery {
    pub descriptors: Vec<EndpointDescriptor>,
    /// Endpoints excluded under [`MalformedPolicy::Skip`], with the reason.
    pub skipped: Vec<(String, SpaError)>,
}

impl EndpointDescriptor {
    /// Parse a description file's YAML text.
    pub fn from_yaml(name: &str, dir: &Path, content: &str) -> crate::Result<Self> {
        let value = parse_yaml(content)
            .map_err(|msg| SpaError::MalformedDescriptor(name.to_string(), msg))?;

        let Value::Object(fragment) = value else {
            return Err(SpaError::MalformedDescriptor(
                name.to_string(),
                "expected a mapping keyed by path".to_string(),
            ));
        };

        for (path, item) in &fragment {
            if !item.is_object() {
                return Err(SpaError::MalformedDescriptor(
                    name.to_string(),
                    format!("path '{}' must map to an operations mapping", path),
                ));
            }
        }

        Ok(Self {
            name: name.to_string(),
            dir: dir.to_path_buf(),
            fragment,
        })
    }

    /// Every `(method, path)` pair the fragment declares, in file order.
    pub fn operations(&self) -> Vec<Operation> {
        let mut ops = Vec::new();
        for (path, item) in &self.fragment {
            let Some(item) = item.as_object() else {
                continue;
            };
            for key in item.keys() {
                let lower = key.to_ascii_lowercase();
                if !HTTP_METHODS.contains(&lower.as_str()) {
                    continue;
                }
                if let Ok(method) = Method::from_bytes(lower.to_ascii_uppercase().as_bytes()) {
                    ops.push(Operation {
                        method,
                        path: path.clone(),
                    });
                }
            }
        }
        ops
    }
}

/// List the endpoint directory names under `root`, sorted.
///
/// Fails with [`SpaError::NotFound`] if `root` does not exist. Entries that are
/// not directories, or directories without [`DESCRIPTOR_FILE`], are skipped.
pub fn discover_endpoint_names(root: &Path) -> crate::Result<Vec<String>> {
    if !root.exists() {
        return Err(SpaError::NotFound(root.display().to_string()));
    }

    let entries = std::fs::read_dir(root).map_err(|e| SpaError::io(root, e))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| SpaError::io(root, e))?;
        let dir = entry.path();
        if !dir.is_dir() || !dir.join(DESCRIPTOR_FILE).is_file() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(raw) => {
                tracing::warn!(dir = ?raw, "skipping endpoint directory with non-UTF-8 name");
            }
        }
    }

    names.sort();
    Ok(names)
}

/// Discover every endpoint under `root` and parse its description file.
pub fn load_descriptors(root: &Path, policy: MalformedPolicy) -> crate::Result<Discovery> {
    let names = discover_endpoint_names(root)?;
    let mut discovery = Discovery::default();

    for name in names {
        let dir = root.join(&name);
        let file = dir.join(DESCRIPTOR_FILE);
        let parsed = std::fs::read_to_string(&file)
            .map_err(|e| SpaError::io(&file, e))
            .and_then(|content| EndpointDescriptor::from_yaml(&name, &dir, &content));

        match parsed {
            Ok(descriptor) => discovery.descriptors.push(descriptor),
            Err(e) if policy == MalformedPolicy::Skip => {
                tracing::warn!(endpoint = %name, error = %e, "skipping endpoint with unreadable descriptor");
                discovery.skipped.push((name, e));
            }
            Err(e) => return Err(e),
        }
    }

    tracing::info!(
        root = %root.display(),
        endpoints = discovery.descriptors.len(),
        skipped = discovery.skipped.len(),
        "endpoint discovery complete"
    );
    Ok(discovery)
}

/// Parse YAML text into a JSON value, stringifying scalar mapping keys
/// (`200:` under `responses` becomes `"200"`).
pub(crate) fn parse_yaml(content: &str) -> Result<Value, String> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(content).map_err(|e| e.to_string())?;
    yaml_to_json(yaml)
}

fn yaml_to_json(value: serde_yaml::Value) -> Result<Value, String> {
    Ok(match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                let f = n.as_f64().unwrap_or(f64::NAN);
                serde_json::Number::from_f64(f)
                    .map(Value::Number)
                    .ok_or_else(|| format!("number {} has no JSON representation", n))?
            }
        }
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Sequence(seq) => Value::Array(
            seq.into_iter()
                .map(yaml_to_json)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        serde_yaml::Value::Mapping(mapping) => {
            let mut map = Map::with_capacity(mapping.len());
            for (key, inner) in mapping {
                map.insert(yaml_key(key)?, yaml_to_json(inner)?);
            }
            Value::Object(map)
        }
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(tagged.value)?,
    })
}

fn yaml_key(key: serde_yaml::Value) -> Result<String, String> {
    match key {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        serde_yaml::Value::Null => Ok("null".to_string()),
        other => Err(format!("unsupported mapping key: {:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PING_YAML: &str = r#"
/ping:
  get:
    summary: Health check
    responses:
      200:
        description: pong
"#;

    fn write_endpoint(root: &Path, name: &str, yaml: &str) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(DESCRIPTOR_FILE), yaml).unwrap();
    }

    #[test]
    fn test_discovery_returns_only_valid_endpoints() {
        let root = tempfile::tempdir().unwrap();
        write_endpoint(root.path(), "ping", PING_YAML);
        write_endpoint(root.path(), "users", "/users:\n  post: {}\n");
        // Directories without the description file are not endpoints.
        std::fs::create_dir_all(root.path().join("shared_utils")).unwrap();
        std::fs::create_dir_all(root.path().join("draft")).unwrap();
        std::fs::write(root.path().join("draft/endpoint.yml"), PING_YAML).unwrap();
        // A stray file named like the descriptor at the root is ignored.
        std::fs::write(root.path().join(DESCRIPTOR_FILE), PING_YAML).unwrap();

        let names = discover_endpoint_names(root.path()).unwrap();
        assert_eq!(names, vec!["ping", "users"]);
    }

    #[test]
    fn test_discovery_sorted_lexicographically() {
        let root = tempfile::tempdir().unwrap();
        for name in ["zeta", "alpha", "mid"] {
            write_endpoint(root.path(), name, PING_YAML);
        }
        let names = discover_endpoint_names(root.path()).unwrap();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_missing_root_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("nope");
        let result = discover_endpoint_names(&missing);
        assert!(matches!(result, Err(SpaError::NotFound(p)) if p.ends_with("nope")));
    }

    #[test]
    fn test_descriptor_parses_numeric_keys() {
        let descriptor = EndpointDescriptor::from_yaml("ping", Path::new("ping"), PING_YAML).unwrap();
        let responses = &descriptor.fragment["/ping"]["get"]["responses"];
        assert!(responses.get("200").is_some());
    }

    #[test]
    fn test_operations_extracts_methods() {
        let yaml = r#"
/items/{id}:
  parameters:
    - name: id
      in: path
  get: {}
  DELETE: {}
"#;
        let descriptor = EndpointDescriptor::from_yaml("items", Path::new("items"), yaml).unwrap();
        let ops = descriptor.operations();
        assert_eq!(
            ops,
            vec![
                Operation {
                    method: Method::GET,
                    path: "/items/{id}".to_string()
                },
                Operation {
                    method: Method::DELETE,
                    path: "/items/{id}".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_non_mapping_descriptor_rejected() {
        let result = EndpointDescriptor::from_yaml("bad", Path::new("bad"), "- just\n- a list\n");
        assert!(matches!(result, Err(SpaError::MalformedDescriptor(name, _)) if name == "bad"));

        let result = EndpointDescriptor::from_yaml("bad", Path::new("bad"), "/ping: 42\n");
        assert!(
            matches!(result, Err(SpaError::MalformedDescriptor(_, msg)) if msg.contains("/ping"))
        );
    }

    #[test]
    fn test_malformed_descriptor_aborts_under_abort_policy() {
        let root = tempfile::tempdir().unwrap();
        write_endpoint(root.path(), "good", PING_YAML);
        write_endpoint(root.path(), "broken", "/x: [unclosed\n");

        let result = load_descriptors(root.path(), MalformedPolicy::Abort);
        assert!(matches!(result, Err(SpaError::MalformedDescriptor(name, _)) if name == "broken"));
    }

    #[test]
    fn test_malformed_descriptor_skipped_under_skip_policy() {
        let root = tempfile::tempdir().unwrap();
        write_endpoint(root.path(), "good", PING_YAML);
        write_endpoint(root.path(), "broken", "/x: [unclosed\n");

        let discovery = load_descriptors(root.path(), MalformedPolicy::Skip).unwrap();
        assert_eq!(discovery.descriptors.len(), 1);
        assert_eq!(discovery.descriptors[0].name, "good");
        assert_eq!(discovery.skipped.len(), 1);
        assert_eq!(discovery.skipped[0].0, "broken");
    }
}
