//! Reference binding and output substitution.
//!
//! Binding happens once per run, at graph-build time: each reference is
//! attached to the instance it names plus the output path left over.
//! Resolution is a pure function over outputs that already exist; ordering
//! guarantees producers run first.

use std::collections::{BTreeMap, HashMap};

use cairn_common::error::{CairnError, Result};
use cairn_common::types::{InstanceId, Outputs};
use serde_json::Value;

use crate::input::{Inputs, ResolvedInputs};
use crate::variable::{PathSegment, VariableReference};

/// A reference attached to the instance that produces its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// Identity of the producing instance.
    pub source: InstanceId,
    /// Path into the producer's outputs; empty means the whole output set.
    pub output_path: Vec<PathSegment>,
}

/// All bindings of one consumer, keyed by expression text.
pub type Bindings = HashMap<String, Binding>;

/// Anything able to report the outputs an instance has produced so far.
pub trait OutputSource {
    /// Returns the outputs of `id`, or `None` if it has not produced any.
    fn outputs_of(&self, id: &InstanceId) -> Option<&Outputs>;
}

impl OutputSource for HashMap<InstanceId, Outputs> {
    fn outputs_of(&self, id: &InstanceId) -> Option<&Outputs> {
        self.get(id)
    }
}

impl OutputSource for BTreeMap<InstanceId, Outputs> {
    fn outputs_of(&self, id: &InstanceId) -> Option<&Outputs> {
        self.get(id)
    }
}

/// Binds a reference held by `consumer` to a known instance.
///
/// Scopes are searched innermost first: the consumer's own children, then
/// the children of each ancestor up to the root, then absolute identities.
/// Within a scope the longest matching identity prefix wins.
///
/// # Errors
///
/// Returns [`CairnError::UnknownReference`] if no scope contains an
/// instance matching the reference path.
pub fn bind<F>(consumer: &InstanceId, reference: &VariableReference, exists: F) -> Result<Binding>
where
    F: Fn(&InstanceId) -> bool,
{
    let path = reference.path();
    let mut scopes: Vec<Option<InstanceId>> = Vec::new();
    let mut scope = Some(consumer.clone());
    while let Some(current) = scope {
        scope = current.parent();
        scopes.push(Some(current));
    }
    scopes.push(None);

    for scope in &scopes {
        for split in (1..=path.len()).rev() {
            let Some(candidate) = candidate_identity(scope.as_ref(), &path[..split]) else {
                continue;
            };
            if exists(&candidate) {
                tracing::trace!(
                    consumer = %consumer,
                    reference = %reference,
                    source = %candidate,
                    "reference bound"
                );
                return Ok(Binding {
                    source: candidate,
                    output_path: path[split..].to_vec(),
                });
            }
        }
    }

    Err(CairnError::UnknownReference {
        consumer: consumer.to_string(),
        expression: reference.expression().to_owned(),
        reason: "no instance with this identity is declared".into(),
    })
}

fn candidate_identity(scope: Option<&InstanceId>, keys: &[PathSegment]) -> Option<InstanceId> {
    let (first, rest) = keys.split_first()?;
    let mut id = match scope {
        Some(scope) => scope.child(&first.as_key()).ok()?,
        None => InstanceId::root(&first.as_key()).ok()?,
    };
    for key in rest {
        id = id.child(&key.as_key()).ok()?;
    }
    Some(id)
}

/// Binds every reference in `inputs`.
///
/// # Errors
///
/// Returns the first [`CairnError::UnknownReference`] encountered.
pub fn bind_all<F>(consumer: &InstanceId, inputs: &Inputs, exists: F) -> Result<Bindings>
where
    F: Fn(&InstanceId) -> bool,
{
    let mut bindings = Bindings::new();
    for reference in inputs.references() {
        if bindings.contains_key(reference.expression()) {
            continue;
        }
        let binding = bind(consumer, reference, &exists)?;
        let _ = bindings.insert(reference.expression().to_owned(), binding);
    }
    Ok(bindings)
}

/// Walks `path` into `value`.
#[must_use]
pub fn select<'a>(value: &'a Value, path: &[PathSegment]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, segment| match (current, segment) {
        (Value::Object(map), segment) => map.get(&*segment.as_key()),
        (Value::Array(items), PathSegment::Index(index)) => items.get(*index),
        (Value::Array(items), PathSegment::Key(key)) => {
            key.parse::<usize>().ok().and_then(|index| items.get(index))
        }
        _ => None,
    })
}

/// Looks up a bound reference's value in a producer's outputs.
#[must_use]
pub fn select_output(outputs: &Outputs, path: &[PathSegment]) -> Option<Value> {
    let Some((first, rest)) = path.split_first() else {
        return Some(Value::Object(outputs.clone()));
    };
    outputs
        .get(&*first.as_key())
        .and_then(|value| select(value, rest))
        .cloned()
}

/// Resolves `consumer`'s inputs against the outputs produced so far.
///
/// A reference whose source has no outputs yet leaves its field pending.
///
/// # Errors
///
/// Returns [`CairnError::UnknownReference`] if a reference was never bound,
/// or if its source produced outputs that lack the referenced path.
pub fn resolve_inputs<S>(
    consumer: &InstanceId,
    inputs: &Inputs,
    bindings: &Bindings,
    outputs: &S,
) -> Result<ResolvedInputs>
where
    S: OutputSource + ?Sized,
{
    inputs.resolve(|reference| {
        let binding = bindings.get(reference.expression()).ok_or_else(|| {
            CairnError::UnknownReference {
                consumer: consumer.to_string(),
                expression: reference.expression().to_owned(),
                reason: "reference was not bound".into(),
            }
        })?;
        let Some(produced) = outputs.outputs_of(&binding.source) else {
            return Ok(None);
        };
        select_output(produced, &binding.output_path)
            .map(Some)
            .ok_or_else(|| CairnError::UnknownReference {
                consumer: consumer.to_string(),
                expression: reference.expression().to_owned(),
                reason: format!("{} produced no such output", binding.source),
            })
    })
}
