//! TCP front end of the RPP.

use crate::service::Rpp;
use privas_core::wire::{self, WireError};
use privas_core::Message;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub async fn run(rpp: Arc<Rpp>) -> anyhow::Result<()> {
    let addr = rpp.config().listen;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);
    serve(rpp, listener).await?;
    Ok(())
}

/// Accept connections until the listener fails.
pub async fn serve(rpp: Arc<Rpp>, listener: TcpListener) -> io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let rpp = rpp.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(rpp, stream, peer).await {
                tracing::warn!("Connection error from {}: {}", peer, e);
            }
        });
    }
}

/// One exchange per connection, except status polls which may repeat on the
/// same connection.
async fn handle_connection(
    rpp: Arc<Rpp>,
    mut stream: TcpStream,
    peer: SocketAddr,
) -> Result<(), WireError> {
    tracing::debug!("New connection from {}", peer);
    let framing = rpp.framing();
    loop {
        let request = match wire::read_next(&mut stream).await {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(()),
            Err(WireError::Message(e)) => {
                framing.write(&mut stream, &Message::error(e.to_string())).await?;
                return Err(e.into());
            }
            Err(e) => return Err(e),
        };
        let polling = matches!(request, Message::AskMonitor(_));
        let reply = rpp.handle(request).await;
        framing.write(&mut stream, &reply).await?;
        if !polling {
            return Ok(());
        }
    }
}

/// Run the expiry sweep every `interval`.
pub fn spawn_sweeper(rpp: Arc<Rpp>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match rpp.sweep().await {
                Ok(expired) if !expired.is_empty() => {
                    tracing::info!(count = expired.len(), "expired sessions");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "session sweep failed"),
            }
        }
    })
}
