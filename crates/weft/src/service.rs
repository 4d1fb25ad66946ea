//! Dispatch of inbound envelopes to a wallet.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use weft_core::{BlockKind, PeerId};
use weft_net::{Envelope, ErrorCode, Handler, Inbound, Message};

use crate::wallet::Wallet;

/// Drain `incoming`, handling each envelope in its own task.
///
/// The loop ends when the transport drops its sending side.
pub fn serve<H>(handler: Arc<H>, mut incoming: mpsc::Receiver<Inbound>) -> JoinHandle<()>
where
    H: Handler + 'static,
{
    tokio::spawn(async move {
        while let Some(inbound) = incoming.recv().await {
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                let Inbound {
                    from,
                    envelope,
                    reply,
                } = inbound;
                let answer = handler.handle(from, envelope).await;
                if let (Some(answer), Some(reply)) = (answer, reply) {
                    // The requester may have given up.
                    let _ = reply.send(answer);
                }
            });
        }
        debug!("inbound stream closed");
    })
}

#[async_trait]
impl Handler for Wallet {
    async fn handle(&self, from: PeerId, envelope: Envelope) -> Option<Envelope> {
        if self.is_closed() {
            return Some(Message::error(ErrorCode::Rejected, "wallet is closed").into());
        }

        let label = envelope.message.label();
        debug!(peer = %from, message = label, "inbound");

        let answer = match envelope.message {
            Message::Block {
                thread,
                kind,
                bytes,
            } => match self.thread(&thread).await {
                Some(thread) => match thread.add_block(Some(&from), &bytes).await {
                    Ok(_) => Message::Ack,
                    Err(e) => Message::error(ErrorCode::Rejected, e.to_string()),
                },
                None if kind == BlockKind::Invite => match self.receive_invite(&from, &bytes).await
                {
                    Ok(_) => Message::Ack,
                    Err(e) => {
                        warn!(peer = %from, error = %e, "rejected invite");
                        Message::error(ErrorCode::Rejected, e.to_string())
                    }
                },
                None => Message::error(ErrorCode::NotFound, format!("unknown thread {}", thread)),
            },

            Message::GetBlock { id } => match self.objects().get(&id).await {
                Ok(Some(bytes)) => Message::BlockData { id, bytes },
                Ok(None) => Message::error(ErrorCode::NotFound, format!("no block {}", id)),
                Err(e) => Message::error(ErrorCode::InternalError, e.to_string()),
            },

            Message::GetHead { thread } => match self.thread(&thread).await {
                Some(t) => Message::Head {
                    thread,
                    head: t.head().await,
                },
                None => Message::error(ErrorCode::NotFound, format!("unknown thread {}", thread)),
            },

            other => Message::error(
                ErrorCode::InvalidMessage,
                format!("unexpected {} message", other.label()),
            ),
        };
        Some(answer.into())
    }
}
