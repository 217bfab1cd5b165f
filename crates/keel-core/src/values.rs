//! Values handling with deep merge support

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};

/// Values container with deep merge capability
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Values(pub JsonValue);

impl Values {
    /// Create empty values
    pub fn new() -> Self {
        Self(JsonValue::Object(serde_json::Map::new()))
    }

    /// Load values from a YAML file
    ///
    /// The document must be a mapping (or empty).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .and_then(Self::into_mapping)
            .map_err(|e| CoreError::config(format!("{}: {}", path.display(), e)))
    }

    /// Parse values from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::new());
        }
        let value: JsonValue = serde_yaml::from_str(yaml)?;
        Ok(Self(value))
    }

    /// Parse values from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let value: JsonValue = serde_json::from_str(json)?;
        Ok(Self(value))
    }

    /// Deep merge another Values into this one
    ///
    /// Rules:
    /// - Scalars: overlay replaces base
    /// - Objects: recursive merge
    /// - Arrays: overlay replaces base (not appended)
    pub fn merge(&mut self, overlay: &Values) {
        deep_merge(&mut self.0, &overlay.0);
    }

    /// Merge multiple values in order
    pub fn merge_all(values: Vec<Values>) -> Self {
        let mut result = Values::new();
        for v in values {
            result.merge(&v);
        }
        result
    }

    /// Set a value by dotted path (e.g., "image.tag")
    pub fn set(&mut self, path: &str, value: JsonValue) -> Result<()> {
        let parts: Vec<&str> = path.split('.').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(CoreError::config(format!("invalid key path '{}'", path)));
        }
        set_nested(&mut self.0, &parts, value);
        Ok(())
    }

    /// Get a value by dotted path
    pub fn get(&self, path: &str) -> Option<&JsonValue> {
        let parts: Vec<&str> = path.split('.').collect();
        get_nested(&self.0, &parts)
    }

    /// Get the inner JSON value
    pub fn inner(&self) -> &JsonValue {
        &self.0
    }

    /// Convert to JSON value
    pub fn into_inner(self) -> JsonValue {
        self.0
    }

    /// Check if values are empty
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            JsonValue::Object(map) => map.is_empty(),
            JsonValue::Null => true,
            _ => false,
        }
    }

    /// Serialize back to a YAML document
    pub fn to_yaml(&self) -> Result<String> {
        if self.is_empty() {
            return Ok("{}\n".to_string());
        }
        Ok(serde_yaml::to_string(&self.0)?)
    }

    /// Normalize to a mapping: null becomes `{}`, anything else is rejected
    fn into_mapping(self) -> Result<Self> {
        match self.0 {
            JsonValue::Object(_) => Ok(self),
            JsonValue::Null => Ok(Self::new()),
            other => Err(CoreError::config(format!(
                "expected a mapping at the document root, found {}",
                kind_name(&other)
            ))),
        }
    }

    /// Scope values for a subchart
    ///
    /// A subchart sees the parent's `<subchart_name>.*` values as its root
    /// values, plus `global.*` preserved as-is.
    pub fn scope_for_subchart(&self, subchart_name: &str) -> Values {
        let mut scoped = serde_json::Map::new();

        if let JsonValue::Object(parent_obj) = &self.0 {
            if let Some(global) = parent_obj.get("global") {
                scoped.insert("global".to_string(), global.clone());
            }

            if let Some(JsonValue::Object(subchart_obj)) = parent_obj.get(subchart_name) {
                for (k, v) in subchart_obj {
                    scoped.insert(k.clone(), v.clone());
                }
            }
        }

        Values(JsonValue::Object(scoped))
    }

    /// Merge subchart defaults with scoped parent values
    pub fn for_subchart(
        subchart_defaults: Values,
        parent_values: &Values,
        subchart_name: &str,
    ) -> Values {
        let mut result = subchart_defaults;
        let scoped = parent_values.scope_for_subchart(subchart_name);
        result.merge(&scoped);
        result
    }
}

/// Merge caller overrides on top of chart defaults
///
/// Override values take precedence at every key, nested mappings merge
/// recursively and scalars or sequences are replaced wholesale. The override
/// must be a mapping; a bare scalar or sequence is a configuration error.
pub fn merge_values(defaults: &Values, overrides: &Values) -> Result<Values> {
    let overrides = overrides.clone().into_mapping()?;
    let mut merged = defaults.clone().into_mapping()?;
    merged.merge(&overrides);
    Ok(merged)
}

/// Override sources supplied by a caller
///
/// Sources are applied in this order, later ones winning: value files,
/// JSON values, plain `key=value` pairs, string pairs and file pairs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueOptions {
    /// YAML files merged in order
    #[serde(default)]
    pub value_files: Vec<PathBuf>,

    /// `key={"json":"value"}` assignments
    #[serde(default)]
    pub json_values: Vec<String>,

    /// `key=value` assignments with type inference
    #[serde(default)]
    pub values: Vec<String>,

    /// `key=value` assignments kept as strings
    #[serde(default)]
    pub string_values: Vec<String>,

    /// `key=path` assignments reading the value from a file
    #[serde(default)]
    pub file_values: Vec<String>,
}

impl ValueOptions {
    /// Options holding only `key=value` assignments
    pub fn with_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            values: values.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Whether no override source is set
    pub fn is_empty(&self) -> bool {
        self.value_files.is_empty()
            && self.json_values.is_empty()
            && self.values.is_empty()
            && self.string_values.is_empty()
            && self.file_values.is_empty()
    }

    /// Combine all sources into a single override tree
    pub fn merge(&self) -> Result<Values> {
        let mut result = Values::new();

        for path in &self.value_files {
            result.merge(&Values::from_file(path)?);
        }

        for arg in &self.json_values {
            let (key, raw) = split_assignment(arg)?;
            let value: JsonValue = serde_json::from_str(raw).map_err(|e| {
                CoreError::config(format!("failed parsing JSON for key '{}': {}", key, e))
            })?;
            result.set(key, value)?;
        }

        result.merge(&parse_set_values(&self.values)?);

        for arg in self.string_values.iter().flat_map(|a| split_list(a)) {
            let (key, raw) = split_assignment(&arg)?;
            result.set(key, JsonValue::String(raw.to_string()))?;
        }

        for arg in &self.file_values {
            let (key, path) = split_assignment(arg)?;
            let content = std::fs::read_to_string(path).map_err(|e| {
                CoreError::config(format!("failed reading '{}' for key '{}': {}", path, key, e))
            })?;
            result.set(key, JsonValue::String(content))?;
        }

        Ok(result)
    }

    /// Merge all sources on top of the given chart defaults
    pub fn merge_with(&self, defaults: &Values) -> Result<Values> {
        merge_values(defaults, &self.merge()?)
    }
}

/// Parse `key=value` assignments (comma separated lists allowed)
pub fn parse_set_values(set_args: &[String]) -> Result<Values> {
    let mut values = Values::new();

    for arg in set_args.iter().flat_map(|a| split_list(a)) {
        let (key, val) = split_assignment(&arg)?;
        values.set(key, infer_scalar(val))?;
    }

    Ok(values)
}

fn infer_scalar(val: &str) -> JsonValue {
    if val == "true" {
        JsonValue::Bool(true)
    } else if val == "false" {
        JsonValue::Bool(false)
    } else if val == "null" {
        JsonValue::Null
    } else if let Ok(num) = val.parse::<i64>() {
        JsonValue::Number(num.into())
    } else if let Some(num) = val
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
    {
        JsonValue::Number(num)
    } else if val.starts_with('[') || val.starts_with('{') {
        serde_json::from_str(val).unwrap_or_else(|_| JsonValue::String(val.to_string()))
    } else {
        JsonValue::String(val.to_string())
    }
}

fn split_assignment(arg: &str) -> Result<(&str, &str)> {
    match arg.split_once('=') {
        Some((key, val)) if !key.trim().is_empty() => Ok((key.trim(), val)),
        _ => Err(CoreError::config(format!(
            "invalid assignment '{}', expected key=value",
            arg
        ))),
    }
}

/// Split on commas that are not escaped and not inside brackets
fn split_list(arg: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut chars = arg.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '[' | '{' => {
                depth += 1;
                current.push(c);
            }
            ']' | '}' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

fn kind_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "a sequence",
        JsonValue::Object(_) => "a mapping",
    }
}

/// Deep merge two JSON values
fn deep_merge(base: &mut JsonValue, overlay: &JsonValue) {
    match (base, overlay) {
        (JsonValue::Object(base_map), JsonValue::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, overlay) => {
            *base = overlay.clone();
        }
    }
}

/// Set a nested value by path
fn set_nested(value: &mut JsonValue, path: &[&str], new_value: JsonValue) {
    let Some((key, remaining)) = path.split_first() else {
        *value = new_value;
        return;
    };

    if !value.is_object() {
        *value = JsonValue::Object(serde_json::Map::new());
    }

    if let JsonValue::Object(map) = value {
        let entry = map
            .entry(key.to_string())
            .or_insert_with(|| JsonValue::Object(serde_json::Map::new()));
        set_nested(entry, remaining, new_value);
    }
}

/// Get a nested value by path
fn get_nested<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let Some((key, remaining)) = path.split_first() else {
        return Some(value);
    };

    match value {
        JsonValue::Object(map) => map.get(*key).and_then(|v| get_nested(v, remaining)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deep_merge() {
        let mut base = Values::from_yaml(
            r#"
image:
  repository: nginx
  tag: "1.0"
replicas: 1
"#,
        )
        .unwrap();

        let overlay = Values::from_yaml(
            r#"
image:
  tag: "2.0"
  pullPolicy: Always
replicas: 3
"#,
        )
        .unwrap();

        base.merge(&overlay);

        assert_eq!(base.get("image.repository").unwrap(), "nginx");
        assert_eq!(base.get("image.tag").unwrap(), "2.0");
        assert_eq!(base.get("image.pullPolicy").unwrap(), "Always");
        assert_eq!(base.get("replicas").unwrap(), 3);
    }

    #[test]
    fn test_merge_values_override_wins_and_defaults_survive() {
        let defaults = Values::from_yaml(
            r#"
ports: [80, 443]
service:
  type: ClusterIP
  port: 80
debug: false
"#,
        )
        .unwrap();
        let overrides = Values::from_yaml(
            r#"
ports: [8080]
service:
  port: 8080
extra: added
"#,
        )
        .unwrap();

        let merged = merge_values(&defaults, &overrides).unwrap();

        // Shared keys take the override
        assert_eq!(merged.get("service.port").unwrap(), 8080);
        assert_eq!(merged.get("ports").unwrap(), &serde_json::json!([8080]));
        // Keys only in defaults are unchanged
        assert_eq!(merged.get("service.type").unwrap(), "ClusterIP");
        assert_eq!(merged.get("debug").unwrap(), false);
        // Keys only in overrides are added
        assert_eq!(merged.get("extra").unwrap(), "added");
        // Inputs are untouched
        assert_eq!(defaults.get("service.port").unwrap(), 80);
    }

    #[test]
    fn test_merge_values_scalar_replaces_mapping() {
        let defaults = Values::from_yaml("resources:\n  limits:\n    cpu: 1\n").unwrap();
        let overrides = Values::from_yaml("resources: none\n").unwrap();

        let merged = merge_values(&defaults, &overrides).unwrap();
        assert_eq!(merged.get("resources").unwrap(), "none");
        assert!(merged.get("resources.limits").is_none());
    }

    #[test]
    fn test_merge_values_rejects_non_mapping_override() {
        let defaults = Values::from_yaml("a: 1\n").unwrap();

        for doc in ["- a\n- b\n", "just a string\n", "42\n"] {
            let overrides = Values::from_yaml(doc).unwrap();
            assert!(matches!(
                merge_values(&defaults, &overrides),
                Err(CoreError::Config { .. })
            ));
        }
    }

    #[test]
    fn test_merge_values_null_override_is_empty() {
        let defaults = Values::from_yaml("a: 1\n").unwrap();
        let merged = merge_values(&defaults, &Values(JsonValue::Null)).unwrap();
        assert_eq!(merged, defaults);
    }

    #[test]
    fn test_set_nested() {
        let mut values = Values::new();
        values.set("image.tag", JsonValue::String("v1".into())).unwrap();
        values.set("replicas", JsonValue::Number(3.into())).unwrap();

        assert_eq!(values.get("image.tag").unwrap(), "v1");
        assert_eq!(values.get("replicas").unwrap(), 3);
        assert!(values.set("image..tag", JsonValue::Null).is_err());
    }

    #[test]
    fn test_parse_set_values() {
        let args = vec![
            "image.tag=v2".to_string(),
            "replicas=5,debug=true".to_string(),
            "ratio=0.5".to_string(),
            r"name=a\,b".to_string(),
            "hosts=[\"a\",\"b\"]".to_string(),
        ];

        let values = parse_set_values(&args).unwrap();

        assert_eq!(values.get("image.tag").unwrap(), "v2");
        assert_eq!(values.get("replicas").unwrap(), 5);
        assert_eq!(values.get("debug").unwrap(), true);
        assert_eq!(values.get("ratio").unwrap(), 0.5);
        assert_eq!(values.get("name").unwrap(), "a,b");
        assert_eq!(values.get("hosts").unwrap(), &serde_json::json!(["a", "b"]));
    }

    #[test]
    fn test_parse_set_values_invalid() {
        let err = parse_set_values(&["novalue".to_string()]).unwrap_err();
        assert!(matches!(err, CoreError::Config { .. }));
    }

    #[test]
    fn test_value_options_order() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("override.yaml");
        std::fs::write(&file, "tag: from-file\nport: 1\nname: file\n").unwrap();
        let cert = dir.path().join("cert.pem");
        std::fs::write(&cert, "PEM").unwrap();

        let options = ValueOptions {
            value_files: vec![file],
            json_values: vec![r#"extra={"a":1}"#.to_string()],
            values: vec!["port=2".to_string()],
            string_values: vec!["tag=007".to_string()],
            file_values: vec![format!("tls.cert={}", cert.display())],
        };

        let merged = options.merge().unwrap();
        assert_eq!(merged.get("name").unwrap(), "file");
        assert_eq!(merged.get("port").unwrap(), 2);
        assert_eq!(merged.get("tag").unwrap(), "007");
        assert_eq!(merged.get("extra.a").unwrap(), 1);
        assert_eq!(merged.get("tls.cert").unwrap(), "PEM");
    }

    #[test]
    fn test_value_file_must_be_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("bad.yaml");
        std::fs::write(&file, "- one\n- two\n").unwrap();

        let options = ValueOptions {
            value_files: vec![file],
            ..Default::default()
        };
        assert!(matches!(options.merge(), Err(CoreError::Config { .. })));
    }

    #[test]
    fn test_scope_for_subchart() {
        let parent = Values::from_yaml(
            r#"
global:
  imageRegistry: docker.io
redis:
  enabled: true
  replicas: 3
postgresql:
  enabled: false
"#,
        )
        .unwrap();

        let scoped = parent.scope_for_subchart("redis");

        assert_eq!(scoped.get("global.imageRegistry").unwrap(), "docker.io");
        assert_eq!(scoped.get("replicas").unwrap(), 3);
        assert!(scoped.get("postgresql").is_none());
        assert!(scoped.get("redis").is_none());
    }

    #[test]
    fn test_for_subchart_with_defaults() {
        let subchart_defaults = Values::from_yaml(
            r#"
replicas: 1
image:
  repository: redis
"#,
        )
        .unwrap();
        let parent = Values::from_yaml("redis:\n  replicas: 3\n").unwrap();

        let result = Values::for_subchart(subchart_defaults, &parent, "redis");
        assert_eq!(result.get("replicas").unwrap(), 3);
        assert_eq!(result.get("image.repository").unwrap(), "redis");
    }
}
