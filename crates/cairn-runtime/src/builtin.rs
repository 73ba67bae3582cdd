//! Component types every registry starts with.

use async_trait::async_trait;
use cairn_common::error::{CairnError, Result};
use cairn_common::types::Outputs;
use cairn_compose::spec::ComponentSpec;

use crate::component::{Children, Component, LifecycleError, PriorInstance};
use crate::context::Context;

/// A composite whose children are its declared `components`.
///
/// Its outputs are its own resolved inputs, so a composite can re-export
/// selected child outputs through references.
#[derive(Debug, Clone, Copy, Default)]
pub struct Declarative;

#[async_trait]
impl Component for Declarative {
    async fn deploy(
        &self,
        inputs: &Outputs,
        _previous: Option<&PriorInstance>,
        ctx: &Context,
    ) -> std::result::Result<Outputs, LifecycleError> {
        ctx.log("composite outputs mirror its inputs");
        Ok(inputs.clone())
    }

    async fn remove(
        &self,
        _inputs: &Outputs,
        _previous: Option<&PriorInstance>,
        _ctx: &Context,
    ) -> std::result::Result<Option<Outputs>, LifecycleError> {
        Ok(None)
    }
}

/// A leaf that publishes its resolved inputs as outputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct Static;

#[async_trait]
impl Component for Static {
    async fn define(&self, spec: &ComponentSpec, ctx: &Context) -> Result<Children> {
        if spec.children().is_empty() {
            Ok(Children::none())
        } else {
            Err(CairnError::structural(format!(
                "{} is a Static leaf and cannot declare components",
                ctx.instance_id()
            )))
        }
    }

    async fn deploy(
        &self,
        inputs: &Outputs,
        previous: Option<&PriorInstance>,
        ctx: &Context,
    ) -> std::result::Result<Outputs, LifecycleError> {
        if previous.is_some_and(|p| p.outputs == *inputs) {
            return Err(LifecycleError::AlreadySatisfied(format!(
                "{} already publishes these values",
                ctx.instance_id()
            )));
        }
        ctx.success(&format!("published {} value(s)", inputs.len()));
        Ok(inputs.clone())
    }

    async fn remove(
        &self,
        _inputs: &Outputs,
        previous: Option<&PriorInstance>,
        ctx: &Context,
    ) -> std::result::Result<Option<Outputs>, LifecycleError> {
        ctx.status("withdrawing published values");
        Ok(previous.map(|p| p.outputs.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cairn_common::types::InstanceId;
    use serde_json::{Map, json};
    use uuid::Uuid;

    use super::*;
    use crate::context::LogConfig;
    use crate::registry::Registry;

    fn ctx() -> Context {
        Context::new(
            InstanceId::root("app").expect("root"),
            Uuid::new_v4(),
            LogConfig { silent: true },
            Arc::new(Registry::with_builtins()),
        )
    }

    fn outputs(value: serde_json::Value) -> Outputs {
        value.as_object().cloned().expect("object")
    }

    #[tokio::test]
    async fn static_echoes_inputs() {
        let inputs = outputs(json!({"bucket": "logs", "versioned": true}));
        let produced = Static.deploy(&inputs, None, &ctx()).await.expect("deploy");
        assert_eq!(produced, inputs);
    }

    #[tokio::test]
    async fn static_reports_already_satisfied_on_identical_rerun() {
        let inputs = outputs(json!({"bucket": "logs"}));
        let prior = PriorInstance {
            component_type: "Static".into(),
            inputs: inputs.clone(),
            outputs: inputs.clone(),
        };
        let err = Static.deploy(&inputs, Some(&prior), &ctx()).await.unwrap_err();
        assert!(matches!(err, LifecycleError::AlreadySatisfied(_)));
    }

    #[tokio::test]
    async fn static_rejects_children() {
        let spec = ComponentSpec::new("Static", Map::new()).with_components(
            cairn_compose::spec::ChildSpecs::sequence([ComponentSpec::new("Static", Map::new())]),
        );
        assert!(Static.define(&spec, &ctx()).await.is_err());
    }

    #[tokio::test]
    async fn declarative_defines_declared_components() {
        let spec = ComponentSpec::new("Declarative", Map::new()).with_components(
            cairn_compose::spec::ChildSpecs::sequence([ComponentSpec::new("Static", Map::new())]),
        );
        let children = Declarative.define(&spec, &ctx()).await.expect("define");
        assert_eq!(children.len(), 1);
        let inputs = outputs(json!({"endpoint": "https://x1"}));
        assert_eq!(
            Declarative.deploy(&inputs, None, &ctx()).await.expect("deploy"),
            inputs
        );
    }
}
