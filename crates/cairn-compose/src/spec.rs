//! Declared component configuration.
//!
//! A [`Manifest`] is the root of a declaration tree: a name (the root
//! identity) plus a [`ComponentSpec`]. Specs are parsed once per run and
//! never mutated afterwards.

use std::path::Path;

use cairn_common::constants::DECLARATIVE_TYPE;
use cairn_common::error::{CairnError, Result};
use cairn_common::types::{InstanceId, validate_key};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

/// A declared configuration node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentSpec {
    /// Registered component type name.
    #[serde(rename = "type")]
    pub component_type: String,
    /// Input values; strings may embed `${...}` expressions.
    #[serde(default)]
    pub inputs: Map<String, Value>,
    /// Declared child components.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<ChildSpecs>,
}

impl ComponentSpec {
    /// Creates a leaf spec with the given type and inputs.
    pub fn new(component_type: impl Into<String>, inputs: Map<String, Value>) -> Self {
        Self {
            component_type: component_type.into(),
            inputs,
            components: None,
        }
    }

    /// Adds declared children.
    #[must_use]
    pub fn with_components(mut self, components: ChildSpecs) -> Self {
        self.components = Some(components);
        self
    }

    /// Parses a spec from a JSON value.
    ///
    /// # Errors
    ///
    /// Returns a structural error if `value` is not a mapping with a string
    /// `type`, or if any field is malformed.
    pub fn from_value(value: Value) -> Result<Self> {
        let Some(fields) = value.as_object() else {
            return Err(CairnError::structural(format!(
                "expected a component declaration, got {value}"
            )));
        };
        if !fields.get("type").is_some_and(Value::is_string) {
            return Err(CairnError::structural(format!(
                "component declaration has no string `type`: {value}"
            )));
        }
        serde_json::from_value(value).map_err(|e| CairnError::structural(e.to_string()))
    }

    /// Returns the declared children, if any.
    #[must_use]
    pub fn children(&self) -> &[(String, Self)] {
        match &self.components {
            Some(children) => children.entries(),
            None => &[],
        }
    }
}

/// Ordered, keyed child declarations.
///
/// Declared as a mapping (keys are declaration keys) or as a sequence
/// (keys are indices `"0"`, `"1"`, ...).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(try_from = "Value")]
pub struct ChildSpecs {
    entries: Vec<(String, ComponentSpec)>,
}

impl ChildSpecs {
    /// Builds keyed children, validating every key.
    ///
    /// # Errors
    ///
    /// Returns a structural error for invalid or duplicate keys.
    pub fn keyed<K>(entries: impl IntoIterator<Item = (K, ComponentSpec)>) -> Result<Self>
    where
        K: Into<String>,
    {
        let mut collected: Vec<(String, ComponentSpec)> = Vec::new();
        for (key, spec) in entries {
            let key = key.into();
            validate_key(&key)?;
            if collected.iter().any(|(k, _)| *k == key) {
                return Err(CairnError::structural(format!(
                    "duplicate declaration key \"{key}\""
                )));
            }
            collected.push((key, spec));
        }
        Ok(Self { entries: collected })
    }

    /// Builds children keyed by their position.
    pub fn sequence(specs: impl IntoIterator<Item = ComponentSpec>) -> Self {
        Self {
            entries: specs
                .into_iter()
                .enumerate()
                .map(|(i, spec)| (i.to_string(), spec))
                .collect(),
        }
    }

    /// Parses children from a JSON mapping or sequence.
    ///
    /// # Errors
    ///
    /// Returns a structural error if `value` is neither, or if an element is
    /// not a component declaration.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Self::keyed(
                map.into_iter()
                    .map(|(k, v)| ComponentSpec::from_value(v).map(|spec| (k, spec)))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Value::Array(items) => Ok(Self::sequence(
                items
                    .into_iter()
                    .map(ComponentSpec::from_value)
                    .collect::<Result<Vec<_>>>()?,
            )),
            other => Err(CairnError::structural(format!(
                "components must be a mapping or a sequence, got {other}"
            ))),
        }
    }

    /// The keyed entries in declaration order.
    #[must_use]
    pub fn entries(&self) -> &[(String, ComponentSpec)] {
        &self.entries
    }

    /// Number of declared children.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether no children are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TryFrom<Value> for ChildSpecs {
    type Error = CairnError;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(value)
    }
}

impl Serialize for ChildSpecs {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, spec) in &self.entries {
            map.serialize_entry(key, spec)?;
        }
        map.end()
    }
}

/// The root of a declaration tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    /// Root declaration key; becomes the root identity.
    pub name: String,
    /// Root component.
    pub root: ComponentSpec,
}

impl Manifest {
    /// Parses a manifest from a JSON value.
    ///
    /// The root `type` defaults to `Declarative`.
    ///
    /// # Errors
    ///
    /// Returns a structural error if `name` is missing or invalid, or the
    /// remaining fields do not form a component declaration.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut fields) = value else {
            return Err(CairnError::structural("manifest must be a mapping"));
        };
        let name = match fields.remove("name") {
            Some(Value::String(name)) => name,
            _ => return Err(CairnError::structural("manifest requires a string `name`")),
        };
        validate_key(&name)?;
        if !fields.contains_key("type") {
            let _ = fields.insert("type".into(), Value::String(DECLARATIVE_TYPE.into()));
        }
        let root = ComponentSpec::from_value(Value::Object(fields))?;
        Ok(Self { name, root })
    }

    /// Parses a YAML manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid YAML or not a manifest.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(text)?;
        Self::from_value(value)
    }

    /// Parses a JSON manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid JSON or not a manifest.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    /// Reads a manifest file; `.json` files are parsed as JSON, everything
    /// else as YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "loading manifest");
        let text = std::fs::read_to_string(path).map_err(|e| CairnError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        if path.extension().is_some_and(|ext| ext == "json") {
            Self::from_json_str(&text)
        } else {
            Self::from_yaml_str(&text)
        }
    }

    /// The identity assigned to the root component.
    ///
    /// # Errors
    ///
    /// Returns a structural error if the name is not a valid key.
    pub fn root_id(&self) -> Result<InstanceId> {
        InstanceId::root(&self.name)
    }
}
