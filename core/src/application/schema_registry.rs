// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! §4.1 stage 4 + §3 Manifest: per-`tool.action` JSON Schema validation and
//! capability manifests, loaded once at startup and read-only thereafter.
//!
//! Grounded in the teacher's manifest-loading bootstrap texture
//! (`NodeConfigManifest::load_or_default`), generalized from node config to
//! a `tool.action -> (schema, manifest)` registry, using `jsonschema` (already
//! in the teacher's dependency stack) for keyword-level validation.

use std::collections::HashMap;

use jsonschema::Validator;
use serde_json::Value;

use crate::domain::errors::{GatewayError, ValidationError};
use crate::domain::manifest::Manifest;

struct Entry {
    validator: Validator,
    manifest: Manifest,
}

/// Loaded once at startup from a directory of `<tool>.<action>.json` files,
/// each holding `{schema: {...}, manifest: {...}}`. Read-only after construction.
pub struct SchemaRegistry {
    entries: HashMap<String, Entry>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    /// Register one `tool.action`'s schema and manifest. `schema` must be a
    /// valid JSON Schema document; construction fails fast on a malformed one
    /// rather than deferring the error to first use.
    pub fn register(&mut self, tool_action: impl Into<String>, schema: &Value, manifest: Manifest) -> anyhow::Result<()> {
        let validator = jsonschema::validator_for(schema)?;
        self.entries.insert(tool_action.into(), Entry { validator, manifest });
        Ok(())
    }

    pub fn manifest(&self, tool_action: &str) -> Option<&Manifest> {
        self.entries.get(tool_action).map(|e| &e.manifest)
    }

    pub fn contains(&self, tool_action: &str) -> bool {
        self.entries.contains_key(tool_action)
    }

    /// §4.1 stage 4: validate `args`, translating every schema-keyword failure
    /// into a closed `ERR_*` token so upstream models can correct
    /// deterministically on the same input every time.
    pub fn validate(&self, tool_action: &str, args: &Value) -> Result<(), GatewayError> {
        let entry = self.entries.get(tool_action).ok_or_else(|| GatewayError::UnknownTool {
            tool_action: tool_action.to_string(),
        })?;

        let errors: Vec<ValidationError> = entry
            .validator
            .iter_errors(args)
            .map(|e| ValidationError {
                token: token_for_keyword(&e.kind),
                pointer: e.instance_path.to_string(),
                message: e.to_string(),
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(GatewayError::SchemaValidationFailed {
                tool_action: tool_action.to_string(),
                errors,
            })
        }
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(serde::Deserialize)]
struct ManifestFile {
    schema: Value,
    manifest: Manifest,
}

/// Load every `*.json` manifest file in `dir` into a fresh registry. Each file
/// holds `{"schema": {...}, "manifest": {...}}`; the `tool_action` key comes
/// from `manifest.tool_action`, not the filename. A missing directory yields
/// an empty registry rather than an error (fresh installs have none yet).
pub fn load_dir(dir: &std::path::Path) -> anyhow::Result<SchemaRegistry> {
    let mut registry = SchemaRegistry::new();
    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return Ok(registry);
    };
    for entry in read_dir {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let contents = std::fs::read_to_string(&path)?;
        let file: ManifestFile = serde_json::from_str(&contents)?;
        let tool_action = file.manifest.tool_action.clone();
        registry.register(tool_action, &file.schema, file.manifest)?;
    }
    Ok(registry)
}

/// Map a `jsonschema` validation-error kind to the closed token vocabulary
/// from §7 (`ERR_REQUIRED`, `ERR_TYPE`, `ERR_ENUM`, `ERR_PATTERN`,
/// `ERR_ADDITIONAL`, `ERR_MAXLENGTH`, ...). Unrecognized keywords fall back to
/// a generic token rather than panicking — the set of `jsonschema` error
/// kinds is larger than the contract we promise upstream models.
fn token_for_keyword(kind: &jsonschema::ValidationErrorKind) -> String {
    use jsonschema::ValidationErrorKind as K;
    match kind {
        K::Required { .. } => "ERR_REQUIRED",
        K::Type { .. } => "ERR_TYPE",
        K::Enum { .. } => "ERR_ENUM",
        K::Pattern { .. } => "ERR_PATTERN",
        K::AdditionalProperties { .. } => "ERR_ADDITIONAL",
        K::MaxLength { .. } => "ERR_MAXLENGTH",
        K::MinLength { .. } => "ERR_MINLENGTH",
        K::Maximum { .. } | K::ExclusiveMaximum { .. } => "ERR_MAXIMUM",
        K::Minimum { .. } | K::ExclusiveMinimum { .. } => "ERR_MINIMUM",
        K::MaxItems { .. } => "ERR_MAXITEMS",
        K::MinItems { .. } => "ERR_MINITEMS",
        K::UniqueItems => "ERR_UNIQUEITEMS",
        K::Format { .. } => "ERR_FORMAT",
        _ => "ERR_SCHEMA",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_schema() -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    #[test]
    fn unknown_tool_action_is_rejected() {
        let registry = SchemaRegistry::new();
        let err = registry.validate("file.read", &serde_json::json!({})).unwrap_err();
        assert!(matches!(err, GatewayError::UnknownTool { .. }));
    }

    #[test]
    fn missing_required_field_yields_err_required() {
        let mut registry = SchemaRegistry::new();
        registry.register("file.read", &simple_schema(), Manifest::new("file.read")).unwrap();
        let err = registry.validate("file.read", &serde_json::json!({})).unwrap_err();
        match err {
            GatewayError::SchemaValidationFailed { errors, .. } => {
                assert!(errors.iter().any(|e| e.token == "ERR_REQUIRED"));
            }
            _ => panic!("expected schema validation failure"),
        }
    }

    #[test]
    fn additional_property_is_rejected() {
        let mut registry = SchemaRegistry::new();
        registry.register("file.read", &simple_schema(), Manifest::new("file.read")).unwrap();
        let args = serde_json::json!({"path": "/tmp/x", "extra": 1});
        let err = registry.validate("file.read", &args).unwrap_err();
        match err {
            GatewayError::SchemaValidationFailed { errors, .. } => {
                assert!(errors.iter().any(|e| e.token == "ERR_ADDITIONAL"));
            }
            _ => panic!("expected schema validation failure"),
        }
    }

    #[test]
    fn valid_args_pass() {
        let mut registry = SchemaRegistry::new();
        registry.register("file.read", &simple_schema(), Manifest::new("file.read")).unwrap();
        assert!(registry.validate("file.read", &serde_json::json!({"path": "/tmp/x"})).is_ok());
    }
}
