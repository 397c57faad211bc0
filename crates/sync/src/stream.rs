//! Push-feed client.
//!
//! One task per connection attempt. The task parses envelopes into
//! [`StreamEvent`]s and reports `Connected`/`Lost`; it never reconnects on its
//! own. Retry timing belongs to [`crate::reconnect::ReconnectSupervisor`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use misso_protocol::{LiveSurgery, StreamEnvelope};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Typed events decoded from envelopes
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Update {
        operator: String,
        surgery: LiveSurgery,
    },
    Complete {
        operator: String,
    },
}

/// Everything a connection task reports to its owner
#[derive(Debug, Clone)]
pub enum StreamSignal {
    Connected { connection_id: u64 },
    Event(StreamEvent),
    Lost { connection_id: u64, reason: String },
}

/// Decode one envelope.
///
/// `Ok(None)` covers unknown `type` tags and envelopes that name no operator.
pub fn parse_envelope(text: &str) -> Result<Option<StreamEvent>, serde_json::Error> {
    let envelope: StreamEnvelope = serde_json::from_str(text)?;
    let operator = envelope.operator_name().map(str::to_string);

    Ok(match (envelope, operator) {
        (StreamEnvelope::SurgeryUpdate { surgery, .. }, Some(operator)) => {
            Some(StreamEvent::Update { operator, surgery })
        }
        (StreamEnvelope::SurgeryComplete { .. }, Some(operator)) => {
            Some(StreamEvent::Complete { operator })
        }
        _ => None,
    })
}

#[derive(Debug, Clone)]
pub struct StreamClient {
    url: String,
}

impl StreamClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Start one connection attempt. Signals are delivered on `tx`.
    pub fn spawn<E>(&self, tx: mpsc::Sender<E>) -> StreamConnection
    where
        E: From<StreamSignal> + Send + 'static,
    {
        let connection_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run_connection(
            self.url.clone(),
            connection_id,
            tx,
            shutdown_rx,
        ));

        StreamConnection {
            id: connection_id,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }
}

/// Handle to a running connection task
pub struct StreamConnection {
    id: u64,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StreamConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Send a close frame and wait briefly for the task to exit.
    pub async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(mut handle) = self.handle.take() {
            if tokio::time::timeout(CLOSE_GRACE, &mut handle).await.is_err() {
                handle.abort();
            }
        }
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn run_connection<E>(
    url: String,
    connection_id: u64,
    tx: mpsc::Sender<E>,
    mut shutdown: oneshot::Receiver<()>,
) where
    E: From<StreamSignal> + Send + 'static,
{
    let connect = tokio::select! {
        _ = &mut shutdown => return,
        connect = connect_async(url.as_str()) => connect,
    };

    let (ws, _) = match connect {
        Ok(value) => value,
        Err(err) => {
            warn!(
                component = "stream",
                event = "stream.connect.failed",
                connection_id,
                url = %url,
                error = %err,
                "Stream connect failed"
            );
            let _ = tx
                .send(
                    StreamSignal::Lost {
                        connection_id,
                        reason: err.to_string(),
                    }
                    .into(),
                )
                .await;
            return;
        }
    };

    info!(
        component = "stream",
        event = "stream.connected",
        connection_id,
        url = %url,
        "Stream connected"
    );
    if tx
        .send(StreamSignal::Connected { connection_id }.into())
        .await
        .is_err()
    {
        return;
    }

    let (mut sink, mut frames) = ws.split();

    let reason = loop {
        tokio::select! {
            _ = &mut shutdown => {
                let _ = sink.send(Message::Close(None)).await;
                debug!(
                    component = "stream",
                    event = "stream.closed",
                    connection_id,
                    "Stream closed by owner"
                );
                return;
            }
            frame = frames.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if !forward_envelope(connection_id, text.as_str(), &tx).await {
                        return;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    if sink.send(Message::Pong(data)).await.is_err() {
                        break "pong send failed".to_string();
                    }
                }
                Some(Ok(Message::Close(_))) => break "closed by peer".to_string(),
                Some(Ok(_)) => {}
                Some(Err(err)) => break err.to_string(),
                None => break "stream ended".to_string(),
            }
        }
    };

    warn!(
        component = "stream",
        event = "stream.lost",
        connection_id,
        reason = %reason,
        "Stream connection lost"
    );
    let _ = tx
        .send(
            StreamSignal::Lost {
                connection_id,
                reason,
            }
            .into(),
        )
        .await;
}

/// Returns false once the owner has gone away.
async fn forward_envelope<E>(connection_id: u64, text: &str, tx: &mpsc::Sender<E>) -> bool
where
    E: From<StreamSignal>,
{
    match parse_envelope(text) {
        Ok(Some(event)) => tx.send(StreamSignal::Event(event).into()).await.is_ok(),
        Ok(None) => {
            debug!(
                component = "stream",
                event = "stream.envelope.ignored",
                connection_id,
                "Envelope ignored (unknown type or no operator)"
            );
            true
        }
        Err(err) => {
            warn!(
                component = "stream",
                event = "stream.envelope.malformed",
                connection_id,
                error = %err,
                payload = %truncate(text, 200),
                "Malformed envelope dropped"
            );
            true
        }
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
