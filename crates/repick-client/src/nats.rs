//! NATS intake of catalog notifiers and publication of repicks.
//!
//! Messages are JSON [`NotifierMessage`]s on `{prefix}.{group}`. The client
//! subscribes to `{prefix}.>` and forwards every notifier to the control
//! loop over a channel.
//!
//! # Sync/Async Bridge
//!
//! The control loop runs on a blocking thread and [`Publisher`] is
//! synchronous, so [`NatsPublisher`] uses
//! [`tokio::runtime::Handle::block_on`] to reach the async client.

use std::sync::mpsc::Sender;

use futures::StreamExt as _;
use repick_core::{NotifierMessage, PublishError, Publisher};
use repick_types::Notifier;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ClientError;

/// Connect to a NATS server.
pub async fn connect(url: &str) -> Result<async_nats::Client, ClientError> {
    info!(url = url, "Connecting to NATS");
    let client = async_nats::connect(url)
        .await
        .map_err(|e| ClientError::Nats {
            message: format!("failed to connect to {url}: {e}"),
        })?;
    info!("NATS connection established");
    Ok(client)
}

/// Subscribe to every group below `prefix` and forward the notifiers of
/// each message to `notifiers` until the receiver is gone.
pub async fn forward_notifiers(
    client: &async_nats::Client,
    prefix: &str,
    notifiers: Sender<Notifier>,
) -> Result<JoinHandle<()>, ClientError> {
    let subject = format!("{prefix}.>");
    let mut subscriber = client
        .subscribe(subject.clone())
        .await
        .map_err(|e| ClientError::Nats {
            message: format!("failed to subscribe to {subject}: {e}"),
        })?;
    info!(subject = subject, "Subscribed to catalog messages");

    Ok(tokio::spawn(async move {
        while let Some(msg) = subscriber.next().await {
            let message = match serde_json::from_slice::<NotifierMessage>(&msg.payload) {
                Ok(message) => message,
                Err(e) => {
                    warn!(subject = %msg.subject, error = %e, "Failed to decode catalog message");
                    continue;
                }
            };
            debug!(
                subject = %msg.subject,
                notifiers = message.notifiers.len(),
                "Catalog message received"
            );
            for notifier in message.notifiers {
                if notifiers.send(notifier).is_err() {
                    return;
                }
            }
        }
    }))
}

/// Publisher sending to `{prefix}.{group}`.
#[derive(Debug, Clone)]
pub struct NatsPublisher {
    client: async_nats::Client,
    prefix: String,
    handle: Handle,
}

impl NatsPublisher {
    /// Publisher on `client` bridging through `handle`.
    pub fn new(client: async_nats::Client, prefix: &str, handle: Handle) -> Self {
        Self {
            client,
            prefix: prefix.to_owned(),
            handle,
        }
    }
}

impl Publisher for NatsPublisher {
    fn publish(&self, message: &NotifierMessage) -> Result<(), PublishError> {
        let subject = format!("{}.{}", self.prefix, message.group);
        let payload = message.to_json()?;
        self.handle.block_on(async {
            self.client
                .publish(subject.clone(), payload.into())
                .await
                .map_err(|e| PublishError::Transport {
                    message: format!("failed to publish to {subject}: {e}"),
                })?;
            self.client
                .flush()
                .await
                .map_err(|e| PublishError::Transport {
                    message: format!("failed to flush NATS: {e}"),
                })
        })?;
        debug!(subject = subject, objects = ?message.object_ids(), "Message published");
        Ok(())
    }
}

/// Publisher used by the client: NATS, or dry-run in test mode.
#[derive(Debug)]
pub enum Outbound {
    /// Publish over NATS.
    Nats(NatsPublisher),
    /// Log only.
    DryRun(repick_core::DryRunPublisher),
}

impl Publisher for Outbound {
    fn publish(&self, message: &NotifierMessage) -> Result<(), PublishError> {
        match self {
            Self::Nats(publisher) => publisher.publish(message),
            Self::DryRun(publisher) => publisher.publish(message),
        }
    }
}
