use std::time::Duration;

use async_trait::async_trait;
use imn_model::{FieldSpec, FieldType, ModuleSchema};
use once_cell::sync::Lazy;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::contract::{ModuleError, ModuleSpec};

static SCHEMA: Lazy<ModuleSchema> = Lazy::new(|| ModuleSchema {
    module_name: "faulty_module".to_string(),
    fields: vec![
        FieldSpec::required("message", FieldType::String),
        FieldSpec::optional("delay", FieldType::Int, json!(0)).with_min_int(0),
        FieldSpec::optional("crash", FieldType::Bool, json!(false)),
    ],
});

/// Deliberately misbehaving module, used to exercise error handling and
/// crash isolation. `crash=true` raises a handler error rather than
/// panicking: per B5, a simulated crash lands on the `error` terminal
/// state, not `failed` — `failed` is reserved for a genuinely unhandled
/// panic the runtime had to catch.
pub struct FaultyModule;

#[async_trait]
impl ModuleSpec for FaultyModule {
    fn name(&self) -> &'static str {
        "faulty_module"
    }

    fn schema(&self) -> &ModuleSchema {
        &SCHEMA
    }

    fn uses_module_scoped_subjects(&self) -> bool {
        true
    }

    async fn handle(&self, input: serde_json::Value, ctx: &CancellationToken) -> Result<serde_json::Value, ModuleError> {
        let message = input["message"].as_str().ok_or_else(|| ModuleError::InvalidInput("message".into()))?;
        let delay_secs = input["delay"].as_u64().unwrap_or(0);
        let crash = input["crash"].as_bool().unwrap_or(false);

        if delay_secs > 0 {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(delay_secs)) => {}
                _ = ctx.cancelled() => return Err(ModuleError::Cancelled),
            }
        }

        if crash {
            return Err(ModuleError::Failure(format!("faulty_module simulated crash: {message}")));
        }

        Ok(json!({
            "id": input.get("id").cloned().unwrap_or(serde_json::Value::Null),
            "message": message,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn crash_flag_raises_a_handler_error() {
        let ctx = CancellationToken::new();
        let err = FaultyModule.handle(json!({"message": "boom", "crash": true}), &ctx).await.unwrap_err();
        assert!(matches!(err, ModuleError::Failure(_)));
    }

    #[tokio::test]
    async fn without_crash_flag_behaves_like_echo() {
        let ctx = CancellationToken::new();
        let result = FaultyModule.handle(json!({"message": "fine"}), &ctx).await.unwrap();
        assert_eq!(result["message"], json!("fine"));
    }
}
