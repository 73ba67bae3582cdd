//! Per-instance run context handed to every lifecycle call.

use std::sync::Arc;

use cairn_common::error::Result;
use cairn_common::types::InstanceId;
use cairn_compose::spec::ComponentSpec;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::component::{Component, Declaration};
use crate::registry::Registry;

/// Logging switches threaded through a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogConfig {
    /// Suppress provisioner messages emitted through [`Context`].
    pub silent: bool,
}

/// Identity, logging and registry access for one instance.
#[derive(Debug, Clone)]
pub struct Context {
    instance: InstanceId,
    run_id: Uuid,
    log: LogConfig,
    registry: Arc<Registry>,
}

impl Context {
    /// Creates a context for `instance` within the run `run_id`.
    #[must_use]
    pub const fn new(
        instance: InstanceId,
        run_id: Uuid,
        log: LogConfig,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            instance,
            run_id,
            log,
            registry,
        }
    }

    /// Derives the context of another instance in the same run.
    #[must_use]
    pub fn for_instance(&self, instance: InstanceId) -> Self {
        Self {
            instance,
            run_id: self.run_id,
            log: self.log,
            registry: Arc::clone(&self.registry),
        }
    }

    /// Identity of the running instance.
    #[must_use]
    pub const fn instance_id(&self) -> &InstanceId {
        &self.instance
    }

    /// Identifier of the current run.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Logging configuration of the run.
    #[must_use]
    pub const fn log_config(&self) -> LogConfig {
        self.log
    }

    /// Instantiates a registered component type.
    ///
    /// # Errors
    ///
    /// Returns a structural error if `component_type` is not registered.
    pub fn load_type(&self, component_type: &str) -> Result<Arc<dyn Component>> {
        self.registry.get(component_type)
    }

    /// Declares a child owned by the running instance.
    ///
    /// # Errors
    ///
    /// Returns a structural error if `component_type` is not registered.
    pub fn declare(
        &self,
        component_type: &str,
        inputs: Map<String, Value>,
    ) -> Result<Declaration> {
        self.declare_spec(ComponentSpec::new(component_type, inputs))
    }

    /// Declares a full spec, possibly with its own children, owned by the
    /// running instance.
    ///
    /// # Errors
    ///
    /// Returns a structural error if the spec's type is not registered.
    pub fn declare_spec(&self, spec: ComponentSpec) -> Result<Declaration> {
        let _ = self.registry.get(&spec.component_type)?;
        Ok(Declaration::stamped(spec, self.instance.clone()))
    }

    /// Emits an informational provisioner message.
    pub fn log(&self, message: &str) {
        if !self.log.silent {
            tracing::info!(instance = %self.instance, run_id = %self.run_id, "{message}");
        }
    }

    /// Emits a progress message.
    pub fn status(&self, message: &str) {
        if !self.log.silent {
            tracing::info!(instance = %self.instance, run_id = %self.run_id, status = true, "{message}");
        }
    }

    /// Emits a completion message.
    pub fn success(&self, message: &str) {
        if !self.log.silent {
            tracing::info!(instance = %self.instance, run_id = %self.run_id, success = true, "{message}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Mutex;

    use super::*;

    fn context_with(log: LogConfig) -> Context {
        Context::new(
            InstanceId::root("app").expect("root"),
            Uuid::new_v4(),
            log,
            Arc::new(Registry::with_builtins()),
        )
    }

    fn context() -> Context {
        context_with(LogConfig::default())
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().expect("capture lock").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn emitted(log: LogConfig) -> String {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            let ctx = context_with(log);
            ctx.log("creating bucket");
            ctx.status("waiting for bucket");
            ctx.success("bucket ready");
        });
        let bytes = captured.0.lock().expect("capture lock").clone();
        String::from_utf8(bytes).expect("utf8")
    }

    #[test]
    fn declare_stamps_the_running_instance() {
        let ctx = context();
        let declaration = ctx.declare("Static", Map::new()).expect("declare");
        assert_eq!(declaration.declared_by(), Some(ctx.instance_id()));
        assert_eq!(declaration.spec().component_type, "Static");
    }

    #[test]
    fn declare_rejects_unknown_types() {
        let err = context().declare("Bucket", Map::new()).unwrap_err();
        assert!(err.to_string().contains("unrecognized lifecycle object"), "got: {err}");
    }

    #[test]
    fn messages_carry_the_instance() {
        let text = emitted(LogConfig { silent: false });
        for message in ["creating bucket", "waiting for bucket", "bucket ready"] {
            assert!(text.contains(message), "missing {message:?} in: {text}");
        }
        assert!(text.contains("instance=app"), "got: {text}");
    }

    #[test]
    fn silent_suppresses_messages() {
        let text = emitted(LogConfig { silent: true });
        assert!(text.is_empty(), "expected no output, got: {text}");
    }

    #[test]
    fn derived_context_shares_run() {
        let ctx = context();
        let child = ctx.for_instance(ctx.instance_id().child("db").expect("child"));
        assert_eq!(child.run_id(), ctx.run_id());
        assert_eq!(child.instance_id().as_str(), "app.db");
        assert!(child.load_type("Declarative").is_ok());
    }
}
