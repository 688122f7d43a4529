//! API document aggregation.
//!
//! Loads the base document (metadata plus an empty `paths` map), merges every
//! endpoint's fragment into `paths` with shallow last-wins overwrite, and writes
//! the result as the JSON artifact the server later serves verbatim.

use std::collections::HashMap;
use std::path::Path;

use serde_json::{Map, Value};

use crate::descriptor::{parse_yaml, EndpointDescriptor};
use crate::error::SpaError;

/// A base or aggregated API document.
///
/// Invariant: the root holds a `paths` key whose value is an object. All other
/// root keys are metadata and are kept in their original order.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiDocument {
    root: Map<String, Value>,
}

/// A path key declared by more than one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathCollision {
    pub path: String,
    /// Endpoint whose operations were overwritten.
    pub overwritten: String,
    /// Endpoint whose operations are now in the document.
    pub winner: String,
}

/// Output of [`aggregate`].
#[derive(Debug, Clone)]
pub struct Aggregation {
    pub document: ApiDocument,
    pub collisions: Vec<PathCollision>,
}

impl ApiDocument {
    /// Build a document from a parsed root value.
    ///
    /// `paths` may be an empty mapping or null; it must be present.
    pub fn from_value(origin: &str, value: Value) -> crate::Result<Self> {
        let Value::Object(mut root) = value else {
            return Err(SpaError::InvalidDocument(
                origin.to_string(),
                "document root must be a mapping".to_string(),
            ));
        };
        match root.get("paths") {
            Some(Value::Object(_)) => {}
            Some(Value::Null) => {
                root.insert("paths".to_string(), Value::Object(Map::new()));
            }
            Some(_) => {
                return Err(SpaError::InvalidDocument(
                    origin.to_string(),
                    "'paths' must be a mapping".to_string(),
                ));
            }
            None => {
                return Err(SpaError::InvalidDocument(
                    origin.to_string(),
                    "missing 'paths' field".to_string(),
                ));
            }
        }
        Ok(Self { root })
    }

    /// The `paths` mapping.
    pub fn paths(&self) -> &Map<String, Value> {
        match self.root.get("paths") {
            Some(Value::Object(paths)) => paths,
            _ => unreachable!("ApiDocument always holds a paths object"),
        }
    }

    fn paths_mut(&mut self) -> &mut Map<String, Value> {
        match self.root.get_mut("paths") {
            Some(Value::Object(paths)) => paths,
            _ => unreachable!("ApiDocument always holds a paths object"),
        }
    }

    /// Root keys other than `paths`.
    pub fn metadata(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.root.iter().filter(|(k, _)| k.as_str() != "paths")
    }

    /// Serialize with 2-space indentation.
    pub fn to_pretty_json(&self) -> crate::Result<String> {
        serde_json::to_string_pretty(&self.root)
            .map_err(|e| SpaError::InvalidDocument("<memory>".to_string(), e.to_string()))
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.root)
    }
}

/// Load the base document from a YAML (or JSON) file.
pub fn load_base_document(path: &Path) -> crate::Result<ApiDocument> {
    if !path.is_file() {
        return Err(SpaError::NotFound(path.display().to_string()));
    }
    let content = std::fs::read_to_string(path).map_err(|e| SpaError::io(path, e))?;
    let value = parse_yaml(&content)
        .map_err(|msg| SpaError::InvalidDocument(path.display().to_string(), msg))?;
    ApiDocument::from_value(&path.display().to_string(), value)
}

/// Merge every descriptor's fragment into `base.paths`, in slice order.
///
/// A path key declared again by a later endpoint replaces the earlier value
/// wholesale; each such overwrite is reported as a [`PathCollision`].
pub fn aggregate(mut base: ApiDocument, descriptors: &[EndpointDescriptor]) -> Aggregation {
    let mut owners: HashMap<String, String> = HashMap::new();
    let mut collisions = Vec::new();

    let paths = base.paths_mut();
    for descriptor in descriptors {
        for (path, item) in &descriptor.fragment {
            if let Some(previous) = owners.insert(path.clone(), descriptor.name.clone()) {
                if previous != descriptor.name {
                    tracing::warn!(
                        path = %path,
                        overwritten = %previous,
                        winner = %descriptor.name,
                        "API path declared by several endpoints, keeping the last"
                    );
                    collisions.push(PathCollision {
                        path: path.clone(),
                        overwritten: previous,
                        winner: descriptor.name.clone(),
                    });
                }
            }
            paths.insert(path.clone(), item.clone());
        }
    }

    Aggregation {
        document: base,
        collisions,
    }
}

/// Write the document as UTF-8 JSON with 2-space indentation, creating parent
/// directories as needed.
pub fn write_document(document: &ApiDocument, path: &Path) -> crate::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| SpaError::io(parent, e))?;
        }
    }
    let json = document.to_pretty_json()?;
    std::fs::write(path, json).map_err(|e| SpaError::io(path, e))?;
    tracing::info!(
        path = %path.display(),
        paths = document.paths().len(),
        "API document written"
    );
    Ok(())
}

/// Read the written artifact back verbatim, checking it is JSON.
pub fn read_document(path: &Path) -> crate::Result<Vec<u8>> {
    if !path.is_file() {
        return Err(SpaError::NotFound(path.display().to_string()));
    }
    let bytes = std::fs::read(path).map_err(|e| SpaError::io(path, e))?;
    serde_json::from_slice::<Value>(&bytes)
        .map_err(|e| SpaError::InvalidDocument(path.display().to_string(), e.to_string()))?;
    Ok(bytes)
}

/// Load the base document, aggregate, and write the artifact in one step.
pub fn build_api_document(
    base_path: &Path,
    descriptors: &[EndpointDescriptor],
    output: &Path,
) -> crate::Result<Aggregation> {
    let base = load_base_document(base_path)?;
    let aggregation = aggregate(base, descriptors);
    write_document(&aggregation.document, output)?;
    Ok(aggregation)
}
