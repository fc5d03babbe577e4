//! NATS transport for the relocator.
//!
//! Catalog messages arrive as JSON [`NotifierMessage`]s on `{prefix}.>`;
//! relocated origins leave on `{prefix}.{group}`. Publishing blocks on the
//! runtime handle because the relocation service runs on a blocking thread.

use std::sync::mpsc::Sender;

use futures::StreamExt as _;
use repick_core::{DryRunPublisher, NotifierMessage, PublishError, Publisher};
use repick_types::Notifier;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::error::RelocatorError;

/// Connect to `url` and start forwarding catalog notifiers to `notifiers`.
pub async fn subscribe(
    url: &str,
    prefix: &str,
    notifiers: Sender<Notifier>,
) -> Result<async_nats::Client, RelocatorError> {
    info!(url = url, "Connecting to NATS");
    let client = async_nats::connect(url)
        .await
        .map_err(|e| RelocatorError::Nats {
            message: format!("failed to connect to {url}: {e}"),
        })?;
    let subject = format!("{prefix}.>");
    let mut subscriber = client
        .subscribe(subject.clone())
        .await
        .map_err(|e| RelocatorError::Nats {
            message: format!("failed to subscribe to {subject}: {e}"),
        })?;
    info!(subject = subject, "Subscribed to catalog messages");

    tokio::spawn(async move {
        while let Some(msg) = subscriber.next().await {
            match serde_json::from_slice::<NotifierMessage>(&msg.payload) {
                Ok(message) => {
                    for notifier in message.notifiers {
                        if notifiers.send(notifier).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!(subject = %msg.subject, error = %e, "Failed to decode catalog message");
                }
            }
        }
    });
    Ok(client)
}

/// Relocated origins go out over NATS, or only to the log in test mode.
#[derive(Debug)]
pub enum Outbound {
    /// Publish on `{prefix}.{group}` through the runtime handle.
    Nats {
        /// Connected client.
        client: async_nats::Client,
        /// Subject prefix.
        prefix: String,
        /// Runtime to block on.
        handle: Handle,
    },
    /// Log only.
    DryRun(DryRunPublisher),
}

impl Publisher for Outbound {
    fn publish(&self, message: &NotifierMessage) -> Result<(), PublishError> {
        let (client, prefix, handle) = match self {
            Self::DryRun(publisher) => return publisher.publish(message),
            Self::Nats {
                client,
                prefix,
                handle,
            } => (client, prefix, handle),
        };
        let subject = format!("{prefix}.{}", message.group);
        let payload = message.to_json()?;
        handle
            .block_on(async {
                client.publish(subject.clone(), payload.into()).await?;
                client.flush().await?;
                Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
            })
            .map_err(|e| PublishError::Transport {
                message: format!("failed to publish to {subject}: {e}"),
            })?;
        debug!(subject = subject, objects = ?message.object_ids(), "Origin published");
        Ok(())
    }
}
