//! Input values parsed into explicit literal/reference trees.
//!
//! Raw declared inputs are JSON. Every string is scanned once for variable
//! expressions; strings containing at least one become [`InputValue::Template`]
//! nodes, everything else collapses into [`InputValue::Literal`]. Whether an
//! input is static is then a structural question rather than a string match.

use cairn_common::error::Result;
use cairn_common::types::Outputs;
use serde_json::Value;

use crate::variable::{TemplatePart, VariableReference, parse_template};

/// A declared input value.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    /// A value with no embedded references.
    Literal(Value),
    /// A string with at least one embedded reference.
    Template(Vec<TemplatePart>),
    /// A sequence containing at least one template.
    Array(Vec<InputValue>),
    /// A mapping containing at least one template.
    Object(Vec<(String, InputValue)>),
}

impl InputValue {
    /// Parses a raw JSON value.
    ///
    /// # Errors
    ///
    /// Returns a structural error if a string holds a malformed expression.
    pub fn parse(value: &Value) -> Result<Self> {
        match value {
            Value::String(text) => {
                let parts = parse_template(text)?;
                if parts
                    .iter()
                    .any(|part| matches!(part, TemplatePart::Reference(_)))
                {
                    Ok(Self::Template(parts))
                } else {
                    let unescaped = match parts.into_iter().next() {
                        Some(TemplatePart::Literal(s)) => s,
                        _ => String::new(),
                    };
                    Ok(Self::Literal(Value::String(unescaped)))
                }
            }
            Value::Array(items) => {
                let parsed = items.iter().map(Self::parse).collect::<Result<Vec<_>>>()?;
                if parsed.iter().all(Self::is_static) {
                    Ok(Self::Literal(Value::Array(
                        parsed.into_iter().filter_map(Self::into_literal).collect(),
                    )))
                } else {
                    Ok(Self::Array(parsed))
                }
            }
            Value::Object(fields) => {
                let parsed = fields
                    .iter()
                    .map(|(k, v)| Self::parse(v).map(|p| (k.clone(), p)))
                    .collect::<Result<Vec<_>>>()?;
                if parsed.iter().all(|(_, v)| v.is_static()) {
                    Ok(Self::Literal(Value::Object(
                        parsed
                            .into_iter()
                            .filter_map(|(k, v)| v.into_literal().map(|v| (k, v)))
                            .collect(),
                    )))
                } else {
                    Ok(Self::Object(parsed))
                }
            }
            other => Ok(Self::Literal(other.clone())),
        }
    }

    /// Returns whether this value contains no variable expressions.
    #[must_use]
    pub const fn is_static(&self) -> bool {
        matches!(self, Self::Literal(_))
    }

    fn into_literal(self) -> Option<Value> {
        match self {
            Self::Literal(value) => Some(value),
            _ => None,
        }
    }

    /// Collects every reference in declaration order.
    #[must_use]
    pub fn references(&self) -> Vec<&VariableReference> {
        let mut found = Vec::new();
        self.collect_references(&mut found);
        found
    }

    fn collect_references<'a>(&'a self, found: &mut Vec<&'a VariableReference>) {
        match self {
            Self::Literal(_) => {}
            Self::Template(parts) => found.extend(parts.iter().filter_map(|part| match part {
                TemplatePart::Reference(r) => Some(r),
                TemplatePart::Literal(_) => None,
            })),
            Self::Array(items) => {
                for item in items {
                    item.collect_references(found);
                }
            }
            Self::Object(fields) => {
                for (_, value) in fields {
                    value.collect_references(found);
                }
            }
        }
    }

    /// Substitutes every reference using `lookup`.
    ///
    /// `lookup` returns `Ok(None)` when the reference's source has not
    /// produced output yet. The value is all-or-nothing: if any reference is
    /// unavailable the result is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Propagates errors returned by `lookup`.
    pub fn resolve<F>(&self, lookup: &mut F) -> Result<Option<Value>>
    where
        F: FnMut(&VariableReference) -> Result<Option<Value>>,
    {
        match self {
            Self::Literal(value) => Ok(Some(value.clone())),
            Self::Template(parts) => resolve_template(parts, lookup),
            Self::Array(items) => {
                let mut resolved = Vec::with_capacity(items.len());
                for item in items {
                    let Some(value) = item.resolve(lookup)? else {
                        return Ok(None);
                    };
                    resolved.push(value);
                }
                Ok(Some(Value::Array(resolved)))
            }
            Self::Object(fields) => {
                let mut resolved = serde_json::Map::new();
                for (key, item) in fields {
                    let Some(value) = item.resolve(lookup)? else {
                        return Ok(None);
                    };
                    let _ = resolved.insert(key.clone(), value);
                }
                Ok(Some(Value::Object(resolved)))
            }
        }
    }
}

/// A template that is exactly one reference yields the referenced value
/// untouched; otherwise pieces are concatenated into a string.
fn resolve_template<F>(parts: &[TemplatePart], lookup: &mut F) -> Result<Option<Value>>
where
    F: FnMut(&VariableReference) -> Result<Option<Value>>,
{
    if let [TemplatePart::Reference(only)] = parts {
        return lookup(only);
    }
    let mut text = String::new();
    for part in parts {
        match part {
            TemplatePart::Literal(s) => text.push_str(s),
            TemplatePart::Reference(r) => match lookup(r)? {
                Some(Value::String(s)) => text.push_str(&s),
                Some(other) => text.push_str(&other.to_string()),
                None => return Ok(None),
            },
        }
    }
    Ok(Some(Value::String(text)))
}

/// The declared inputs of one instance, field by field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inputs {
    fields: Vec<(String, InputValue)>,
}

/// Result of resolving an instance's inputs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedInputs {
    /// Fields whose references all resolved, in declaration order.
    pub values: Outputs,
    /// Fields left unresolved because a source has no output yet.
    pub pending: Vec<String>,
}

impl ResolvedInputs {
    /// Returns whether every field resolved.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Inputs {
    /// Parses a declared input mapping.
    ///
    /// # Errors
    ///
    /// Returns a structural error if any string holds a malformed expression.
    pub fn parse(raw: &serde_json::Map<String, Value>) -> Result<Self> {
        let fields = raw
            .iter()
            .map(|(k, v)| InputValue::parse(v).map(|p| (k.clone(), p)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { fields })
    }

    /// Returns whether no field contains a variable expression.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.fields.iter().all(|(_, v)| v.is_static())
    }

    /// Iterates over the fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &InputValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Collects every reference across all fields in declaration order.
    #[must_use]
    pub fn references(&self) -> Vec<&VariableReference> {
        self.fields
            .iter()
            .flat_map(|(_, value)| value.references())
            .collect()
    }

    /// Resolves every field; each field is atomic.
    ///
    /// # Errors
    ///
    /// Propagates errors returned by `lookup`.
    pub fn resolve<F>(&self, mut lookup: F) -> Result<ResolvedInputs>
    where
        F: FnMut(&VariableReference) -> Result<Option<Value>>,
    {
        let mut resolved = ResolvedInputs::default();
        for (key, value) in &self.fields {
            match value.resolve(&mut lookup)? {
                Some(v) => {
                    let _ = resolved.values.insert(key.clone(), v);
                }
                None => resolved.pending.push(key.clone()),
            }
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn inputs(value: Value) -> Inputs {
        let map = value.as_object().expect("test inputs must be an object");
        Inputs::parse(map).expect("parse inputs")
    }

    fn lookup_from(
        table: Vec<(&'static str, Value)>,
    ) -> impl FnMut(&VariableReference) -> Result<Option<Value>> {
        move |r| {
            Ok(table
                .iter()
                .find(|(expr, _)| *expr == r.expression())
                .map(|(_, v)| v.clone()))
        }
    }

    #[test]
    fn static_inputs_collapse_to_literals() {
        let parsed = inputs(json!({"name": "api", "tags": {"team": "core"}, "ports": [80, 443]}));
        assert!(parsed.is_static());
        assert!(parsed.references().is_empty());
    }

    #[test]
    fn nested_reference_keeps_structure() {
        let parsed = inputs(json!({"routes": {"$connect": "${fn.arn}", "stage": "dev"}}));
        assert!(!parsed.is_static());
        let refs = parsed.references();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].expression(), "${fn.arn}");
    }

    #[test]
    fn whole_string_reference_preserves_type() {
        let parsed = inputs(json!({"memory": "${cfg.memory}"}));
        let resolved = parsed
            .resolve(lookup_from(vec![("${cfg.memory}", json!(512))]))
            .expect("resolve");
        assert_eq!(resolved.values.get("memory"), Some(&json!(512)));
        assert!(resolved.is_complete());
    }

    #[test]
    fn interpolation_stringifies_values() {
        let parsed = inputs(json!({"url": "https://${api.id}.example.com:${api.port}/"}));
        let table = vec![("${api.id}", json!("x1")), ("${api.port}", json!(8443))];
        let resolved = parsed.resolve(lookup_from(table)).expect("resolve");
        assert_eq!(
            resolved.values.get("url"),
            Some(&json!("https://x1.example.com:8443/"))
        );
    }

    #[test]
    fn field_with_any_pending_reference_is_pending_as_a_whole() {
        let parsed = inputs(json!({
            "both": "${a.id}-${b.id}",
            "only_a": ["${a.id}"],
            "plain": true
        }));
        let resolved = parsed
            .resolve(lookup_from(vec![("${a.id}", json!("x1"))]))
            .expect("resolve");
        assert_eq!(resolved.pending, vec!["both".to_string()]);
        assert_eq!(resolved.values.get("only_a"), Some(&json!(["x1"])));
        assert_eq!(resolved.values.get("plain"), Some(&json!(true)));
        assert!(!resolved.is_complete());
    }

    #[test]
    fn escaped_dollar_is_unescaped_in_literals() {
        let parsed = inputs(json!({"price": "$$5"}));
        let resolved = parsed.resolve(|_| Ok(None)).expect("resolve");
        assert_eq!(resolved.values.get("price"), Some(&json!("$5")));
    }
}
