use std::sync::Arc;

use imn_kv::KvEngine;
use imn_model::EventLogEntry;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::error::StoreError;

const EVENTS_LIST: &str = "events:log";

/// Append-only, newest-first event log (spec.md §4.2 "Event log").
pub struct EventLog {
    kv: Arc<dyn KvEngine>,
}

impl EventLog {
    pub fn new(kv: Arc<dyn KvEngine>) -> Self {
        Self { kv }
    }

    #[instrument(skip(self, entry, ctx))]
    pub async fn log_event(&self, entry: &EventLogEntry, ctx: &CancellationToken) -> Result<(), StoreError> {
        let bytes = bincode::serialize(entry).map_err(|e| StoreError::Other(e.to_string()))?;
        self.kv.list_prepend(EVENTS_LIST, bytes, ctx).await?;
        Ok(())
    }

    pub async fn get_events(&self, limit: usize, ctx: &CancellationToken) -> Result<Vec<EventLogEntry>, StoreError> {
        let raw = self.kv.list_range(EVENTS_LIST, limit, ctx).await?;
        raw.into_iter()
            .map(|bytes| bincode::deserialize(&bytes).map_err(|e| StoreError::Other(e.to_string())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use imn_kv::SledKvEngine;
    use imn_model::EventKind;

    fn ctx() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn events_read_newest_first() {
        let kv: Arc<dyn KvEngine> = Arc::new(SledKvEngine::temporary().unwrap());
        let log = EventLog::new(kv);
        log.log_event(&EventLogEntry::new(EventKind::WorkflowStarted, "first", Utc::now()), &ctx()).await.unwrap();
        log.log_event(&EventLogEntry::new(EventKind::WorkflowCompleted, "second", Utc::now()), &ctx()).await.unwrap();

        let events = log.get_events(10, &ctx()).await.unwrap();
        assert_eq!(events[0].message, "second");
        assert_eq!(events[1].message, "first");
    }
}
