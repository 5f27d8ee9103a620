//! Coordinator server
//!
//! Connections are served one at a time: accept, read one envelope, reply,
//! close. Delete requests fan out to the owning volume before the reply.

use crate::common::{read_message, write_message, CoordinatorConfig, Result};
use crate::coordinator::handler::CoordState;
use crate::coordinator::registry::StorageRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::Instrument;
use uuid::Uuid;

pub struct Coordinator {
    listener: TcpListener,
    state: Arc<CoordState>,
}

impl Coordinator {
    /// Query the configured volumes and bind the client listener
    pub async fn bind(config: CoordinatorConfig) -> Result<Self> {
        tracing::info!("Starting coordinator");
        tracing::info!("  Bind address: {}", config.bind_addr);
        tracing::info!("  Storage nodes: {:?}", config.storage_nodes);

        let registry = StorageRegistry::bootstrap(&config.storage_nodes).await;
        let listener = TcpListener::bind(config.bind_addr).await?;

        Ok(Self {
            listener,
            state: Arc::new(CoordState::new(registry)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared state handle, for inspection while serving
    pub fn state(&self) -> Arc<CoordState> {
        self.state.clone()
    }

    pub async fn serve(self) -> Result<()> {
        tracing::info!("✓ Coordinator ready on {}", self.local_addr()?);

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::error!("Accept error: {}", e);
                    continue;
                }
            };

            let span = tracing::info_span!(
                "coord_request",
                request_id = %Uuid::new_v4(),
                peer = %peer,
            );
            handle_connection(&self.state, stream)
                .instrument(span)
                .await;
        }
    }
}

async fn handle_connection(state: &CoordState, mut stream: TcpStream) {
    let request = match read_message(&mut stream).await {
        Ok(msg) => msg,
        Err(e) => {
            tracing::warn!("Failed to read request: {}", e);
            return;
        }
    };
    tracing::debug!("Received {}", request.kind);

    let reply = match state.handle(request).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!("Dropping request: {}", e);
            return;
        }
    };

    if let Err(e) = write_message(&mut stream, &reply).await {
        tracing::warn!("Failed to send {}: {}", reply.kind, e);
    }
}
