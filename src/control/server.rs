//! WebSocket endpoint for control clients

use super::ControlContext;
use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Accepts control clients on `listener` until `shutdown` fires
pub async fn run_control_server(
    ctx: Arc<ControlContext>,
    listener: TcpListener,
    mut shutdown: watch::Receiver<()>,
) -> Result<()> {
    info!(addr = %listener.local_addr()?, "Control server listening");

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Failed to accept control connection");
                    continue;
                }
            },
            _ = shutdown.changed() => break,
        };

        let ctx = Arc::clone(&ctx);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(ctx, stream, peer, shutdown).await {
                warn!(%peer, error = %e, "Control client ended with error");
            }
        });
    }

    info!("Control server stopped");
    Ok(())
}

async fn handle_client(
    ctx: Arc<ControlContext>,
    stream: TcpStream,
    peer: SocketAddr,
    mut shutdown: watch::Receiver<()>,
) -> Result<()> {
    let ws = accept_async(stream).await?;
    let (mut sink, mut source) = ws.split();

    let client = ctx.next_client_id();
    // Subscribe before the snapshot so no update can fall between the two
    let mut updates = ctx.subscribe();
    let events = ctx.client_events(client);
    sink.send(Message::Text(ctx.init_message()?)).await?;
    info!(client, %peer, "Control client connected");

    loop {
        tokio::select! {
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => events.dispatch(&text),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(client, error = %e, "Control socket error");
                    break;
                }
            },
            update = updates.recv() => match update {
                Ok(outbound) if outbound.is_for(client) => {
                    sink.send(Message::Text(outbound.text.to_string())).await?;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(client, skipped, "Control client lagged, resending state");
                    sink.send(Message::Text(ctx.init_message()?)).await?;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown.changed() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }

    info!(client, %peer, "Control client disconnected");
    Ok(())
}
