use async_trait::async_trait;
use imn_model::ModuleSchema;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("module panicked: {0}")]
    Panicked(String),
    #[error("module cancelled")]
    Cancelled,
    #[error("module failure: {0}")]
    Failure(String),
}

/// The polymorphic module capability set (spec.md §9 DESIGN NOTES): a
/// module declares its name and schema once and is addressed through this
/// trait from a fixed compile-time registry, never through runtime code
/// loading.
#[async_trait]
pub trait ModuleSpec: Send + Sync {
    fn name(&self) -> &'static str;

    fn schema(&self) -> &ModuleSchema;

    /// Whether this module listens/responds on the module-scoped subject
    /// triple (`agent.{id}.{module}.in|out|error`) rather than the generic
    /// per-agent one (`agent.{id}.in|out|error`). Spec's subject grammar
    /// frames the module-scoped form as the exception used by "some
    /// modules, e.g. echo, faulty" — so the default here is `false`.
    fn uses_module_scoped_subjects(&self) -> bool {
        false
    }

    /// Called once when the agent loads the module. Built-ins are
    /// stateless, so the default is a no-op; a module backed by a real
    /// socket pool or subprocess would allocate it here.
    async fn setup(&self) -> Result<(), ModuleError> {
        Ok(())
    }

    /// Runs one invocation against already-validated input, producing the
    /// JSON success payload (which MUST include the originating `id`) or a
    /// [`ModuleError`]. Agent runtime wraps this call with a duration guard
    /// and panic isolation — a module MUST NOT assume it alone can crash
    /// the process on a panic.
    async fn handle(&self, input: serde_json::Value, ctx: &CancellationToken) -> Result<serde_json::Value, ModuleError>;

    /// Called once when the agent unloads the module (shutdown or reload).
    async fn teardown(&self) {}
}
