use async_trait::async_trait;
use imn_model::{FieldSpec, FieldType, ModuleSchema};
use once_cell::sync::Lazy;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::contract::{ModuleError, ModuleSpec};

static SCHEMA: Lazy<ModuleSchema> = Lazy::new(|| ModuleSchema {
    module_name: "echo_module".to_string(),
    fields: vec![FieldSpec::required("message", FieldType::String)],
});

/// Trivial module that hands its input back, used as the system's smoke
/// test ("working_module" is the same behavior under an alternate name).
pub struct EchoModule;

#[async_trait]
impl ModuleSpec for EchoModule {
    fn name(&self) -> &'static str {
        "echo_module"
    }

    fn schema(&self) -> &ModuleSchema {
        &SCHEMA
    }

    fn uses_module_scoped_subjects(&self) -> bool {
        true
    }

    async fn handle(&self, input: serde_json::Value, _ctx: &CancellationToken) -> Result<serde_json::Value, ModuleError> {
        let message = input["message"].as_str().ok_or_else(|| ModuleError::InvalidInput("message".into()))?;
        Ok(json!({
            "id": input.get("id").cloned().unwrap_or(serde_json::Value::Null),
            "message": message,
        }))
    }
}

/// `working_module` in spec.md §6 is `echo_module` under a second name.
pub struct WorkingModule;

#[async_trait]
impl ModuleSpec for WorkingModule {
    fn name(&self) -> &'static str {
        "working_module"
    }

    fn schema(&self) -> &ModuleSchema {
        &SCHEMA
    }

    fn uses_module_scoped_subjects(&self) -> bool {
        true
    }

    async fn handle(&self, input: serde_json::Value, ctx: &CancellationToken) -> Result<serde_json::Value, ModuleError> {
        EchoModule.handle(input, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_message_back() {
        let ctx = CancellationToken::new();
        let result = EchoModule.handle(json!({"id": "w1", "message": "hi"}), &ctx).await.unwrap();
        assert_eq!(result["message"], json!("hi"));
        assert_eq!(result["id"], json!("w1"));
    }
}
