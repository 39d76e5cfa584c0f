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
    module_name: "tcping".to_string(),
    fields: vec![
        FieldSpec::required("host", FieldType::String),
        FieldSpec::required("port", FieldType::Int).with_min_int(1),
        FieldSpec::optional("count", FieldType::Int, json!(1)).with_min_int(1),
    ],
});

/// Plain TCP connect-and-time probe against a single port.
pub struct TcpingModule;

#[async_trait]
impl ModuleSpec for TcpingModule {
    fn name(&self) -> &'static str {
        "tcping"
    }

    fn schema(&self) -> &ModuleSchema {
        &SCHEMA
    }

    async fn handle(&self, input: serde_json::Value, ctx: &CancellationToken) -> Result<serde_json::Value, ModuleError> {
        let host = input["host"].as_str().ok_or_else(|| ModuleError::InvalidInput("host".into()))?;
        let port = input["port"].as_u64().ok_or_else(|| ModuleError::InvalidInput("port".into()))? as u16;
        let count = input["count"].as_u64().unwrap_or(1) as usize;

        let mut rtts = Vec::with_capacity(count);
        let mut packets_received = 0u32;

        for _ in 0..count {
            if ctx.is_cancelled() {
                return Err(ModuleError::Cancelled);
            }
            let started = Instant::now();
            if timeout(PROBE_TIMEOUT, TcpStream::connect((host, port))).await.map(|r| r.is_ok()).unwrap_or(false) {
                rtts.push(started.elapsed().as_secs_f64() * 1000.0);
                packets_received += 1;
            }
        }

        Ok(json!({
            "id": input.get("id").cloned().unwrap_or(serde_json::Value::Null),
            "address": host,
            "port": port,
            "rtts": rtts,
            "packets_sent": count as u32,
            "packets_received": packets_received,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_port_is_rejected_before_connect() {
        let module = TcpingModule;
        let ctx = CancellationToken::new();
        let err = module.handle(json!({"host": "example.invalid"}), &ctx).await.unwrap_err();
        assert!(matches!(err, ModuleError::InvalidInput(_)));
    }
}
