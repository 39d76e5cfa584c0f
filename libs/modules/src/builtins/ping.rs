use std::time::{Duration, Instant};

use async_trait::async_trait;
use imn_model::{FieldSpec, FieldType, ModuleSchema};
use once_cell::sync::Lazy;
use serde_json::json;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::contract::{ModuleError, ModuleSpec};

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

static SCHEMA: Lazy<ModuleSchema> = Lazy::new(|| ModuleSchema {
    module_name: "ping_module".to_string(),
    fields: vec![
        FieldSpec::required("host", FieldType::String).with_alias("target"),
        FieldSpec::optional("count", FieldType::Int, json!(3)).with_min_int(1),
        FieldSpec::optional("port", FieldType::Int, json!(80)),
    ],
});

/// Reachability probe. There's no portable, unprivileged ICMP socket in
/// safe Rust, so "ping" here means what `tcping` means: a TCP connect
/// against `host:port`, timed round-trip per attempt.
pub struct PingModule;

#[async_trait]
impl ModuleSpec for PingModule {
    fn name(&self) -> &'static str {
        "ping_module"
    }

    fn schema(&self) -> &ModuleSchema {
        &SCHEMA
    }

    async fn handle(&self, input: serde_json::Value, ctx: &CancellationToken) -> Result<serde_json::Value, ModuleError> {
        let host = input["host"].as_str().ok_or_else(|| ModuleError::InvalidInput("host".into()))?;
        let port = input["port"].as_u64().unwrap_or(80) as u16;
        let count = input["count"].as_u64().unwrap_or(3) as usize;

        let mut rtts = Vec::with_capacity(count);
        let mut packets_received = 0u32;

        for _ in 0..count {
            if ctx.is_cancelled() {
                return Err(ModuleError::Cancelled);
            }
            let started = Instant::now();
            let outcome = timeout(PROBE_TIMEOUT, TcpStream::connect((host, port))).await;
            match outcome {
                Ok(Ok(_stream)) => {
                    rtts.push(started.elapsed().as_secs_f64() * 1000.0);
                    packets_received += 1;
                }
                _ => {}
            }
        }

        Ok(json!({
            "id": input.get("id").cloned().unwrap_or(serde_json::Value::Null),
            "address": host,
            "rtts": rtts,
            "packets_sent": count as u32,
            "packets_received": packets_received,
            "is_alive": packets_received > 0,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_host_yields_zero_received() {
        let module = PingModule;
        let ctx = CancellationToken::new();
        let input = json!({"host": "203.0.113.1", "port": 9, "count": 1});
        let result = module.handle(input, &ctx).await.unwrap();
        assert_eq!(result["packets_sent"], json!(1));
        assert_eq!(result["is_alive"], json!(false));
    }

    #[test]
    fn schema_accepts_target_alias() {
        let normalized = imn_model::schema::validate(PingModule.schema(), &json!({"target": "8.8.8.8"})).unwrap();
        assert_eq!(normalized["host"], json!("8.8.8.8"));
    }
}
