use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, BufReader, BufWriter};
use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::{info, instrument, warn};

use crate::bus::Bus;

use super::protocol::{read_frame, write_frame, BusControlRequest, BusControlResponse, FrameError};

/// Network front-end for [`crate::InProcessBus`] (or any [`Bus`]
/// implementation), so an agent process can publish and subscribe without
/// sharing memory with the coordinator process. This is the one concrete
/// pub/sub transport this system ships; a production deployment pointing
/// at a real broker would replace it, not the [`Bus`] trait.
pub struct BusRpcServer {
    bus: Arc<dyn Bus>,
}

impl BusRpcServer {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self { bus }
    }

    #[instrument(skip(self))]
    pub async fn serve(&self, addr: impl ToSocketAddrs + std::fmt::Debug) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!(local_addr = ?listener.local_addr()?, "bus rpc server listening");
        loop {
            let (socket, peer) = listener.accept().await?;
            let bus = self.bus.clone();
            tokio::spawn(async move {
                let (read_half, write_half) = socket.into_split();
                if let Err(e) = handle_connection(bus, read_half, write_half).await {
                    warn!(%peer, error = %e, "bus rpc connection ended");
                }
            });
        }
    }
}

async fn handle_connection<R, W>(bus: Arc<dyn Bus>, read_half: R, write_half: W) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(read_half);
    let mut writer = BufWriter::new(write_half);

    let first: BusControlRequest = match read_frame(&mut reader).await {
        Ok(r) => r,
        Err(FrameError::Closed) => return Ok(()),
        Err(e) => return Err(e),
    };

    match first {
        BusControlRequest::Publish(message) => {
            bus.publish(message).await;
            write_frame(&mut writer, &BusControlResponse::PublishAck).await?;
            loop {
                let request: BusControlRequest = match read_frame(&mut reader).await {
                    Ok(r) => r,
                    Err(FrameError::Closed) => return Ok(()),
                    Err(e) => return Err(e),
                };
                match request {
                    BusControlRequest::Publish(message) => {
                        bus.publish(message).await;
                        write_frame(&mut writer, &BusControlResponse::PublishAck).await?;
                    }
                    BusControlRequest::Subscribe { .. } => {
                        // a connection is either a publish connection or a subscribe
                        // connection for its whole lifetime.
                        return Ok(());
                    }
                }
            }
        }
        BusControlRequest::Subscribe { subject } => {
            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<crate::message::BusMessage>();
            let id = bus
                .subscribe(&subject, Box::new(move |msg| {
                    let _ = tx.send(msg);
                }))
                .await;
            write_frame(&mut writer, &BusControlResponse::Subscribed).await?;

            // Forward bus messages to the peer until either side closes.
            let forward = async {
                while let Some(message) = rx.recv().await {
                    if write_frame(&mut writer, &message).await.is_err() {
                        break;
                    }
                }
            };
            // A subscribe connection sends nothing further; any read
            // completing (even with EOF) means the peer is gone.
            let mut scratch = [0u8; 1];
            use tokio::io::AsyncReadExt;
            tokio::select! {
                _ = forward => {}
                _ = reader.read(&mut scratch) => {}
            }
            let _ = bus.unsubscribe(id).await;
            Ok(())
        }
    }
}
