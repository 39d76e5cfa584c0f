use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::{BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::bus::{Bus, BusError, Handler, SubscriptionId};
use crate::message::BusMessage;

use super::protocol::{read_frame, write_frame, BusControlRequest, BusControlResponse};
use super::retry::RetryConfig;

/// Client-side stub for [`super::server::BusRpcServer`]. `publish` reuses
/// one persistent connection; each `subscribe` opens its own dedicated
/// connection so the server can push messages to it indefinitely.
pub struct BusRpcClient {
    addr: String,
    publish_conn: Mutex<Option<(BufReader<tokio::net::tcp::OwnedReadHalf>, BufWriter<tokio::net::tcp::OwnedWriteHalf>)>>,
    subscriptions: DashMap<u64, CancellationToken>,
    next_id: AtomicU64,
    retry: RetryConfig,
}

impl BusRpcClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            publish_conn: Mutex::new(None),
            subscriptions: DashMap::new(),
            next_id: AtomicU64::new(1),
            retry: RetryConfig::default(),
        }
    }

    async fn connect(&self) -> std::io::Result<TcpStream> {
        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    /// Dials `addr` with capped exponential backoff (spec.md §7), at least
    /// `max_retries + 1` attempts before giving up.
    async fn connect_with_retry(&self) -> std::io::Result<TcpStream> {
        let mut attempt = 0;
        loop {
            match self.connect().await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    if attempt >= self.retry.max_retries {
                        return Err(e);
                    }
                    warn!(attempt, error = %e, addr = %self.addr, "bus rpc connect failed, retrying");
                    self.retry.wait(attempt + 1).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[async_trait]
impl Bus for BusRpcClient {
    async fn publish(&self, message: BusMessage) {
        let mut guard = self.publish_conn.lock().await;
        if guard.is_none() {
            match self.connect_with_retry().await {
                Ok(stream) => {
                    let (r, w) = stream.into_split();
                    *guard = Some((BufReader::new(r), BufWriter::new(w)));
                }
                Err(e) => {
                    warn!(error = %e, "bus rpc publish: connect failed");
                    return;
                }
            }
        }
        if let Some((reader, writer)) = guard.as_mut() {
            let ok = write_frame(writer, &BusControlRequest::Publish(message)).await.is_ok()
                && read_frame::<_, BusControlResponse>(reader).await.is_ok();
            if !ok {
                *guard = None;
            }
        }
    }

    async fn subscribe(&self, subject: &str, handler: Handler) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        self.subscriptions.insert(id, cancel.clone());

        let addr = self.addr.clone();
        let subject = subject.to_string();
        let retry = self.retry;
        tokio::spawn(async move {
            let mut attempt = 0;
            let stream = loop {
                match TcpStream::connect(&addr).await {
                    Ok(s) => break s,
                    Err(e) => {
                        if attempt >= retry.max_retries {
                            warn!(error = %e, "bus rpc subscribe: connect failed");
                            return;
                        }
                        warn!(attempt, error = %e, %addr, "bus rpc subscribe connect failed, retrying");
                        retry.wait(attempt + 1).await;
                        attempt += 1;
                    }
                }
            };
            let (r, w) = stream.into_split();
            let mut reader = BufReader::new(r);
            let mut writer = BufWriter::new(w);

            if write_frame(&mut writer, &BusControlRequest::Subscribe { subject }).await.is_err() {
                return;
            }
            if read_frame::<_, BusControlResponse>(&mut reader).await.is_err() {
                return;
            }

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    frame = read_frame::<_, BusMessage>(&mut reader) => {
                        match frame {
                            Ok(message) => handler(message),
                            Err(_) => break,
                        }
                    }
                }
            }
        });

        SubscriptionId(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError> {
        match self.subscriptions.remove(&id.0) {
            Some((_, cancel)) => {
                cancel.cancel();
                Ok(())
            }
            None => Err(BusError::UnknownSubscription(id.0)),
        }
    }
}
