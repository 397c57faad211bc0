//! Session state store: owns the working set and processes events sequentially.
//!
//! The store runs as one tokio task. Commands, stream signals, fetch results
//! and reconnect timers all arrive on a single mpsc queue and go through
//! [`transition`] one at a time. Each change publishes a freshly derived
//! [`SyncView`] through `ArcSwap`, so reads are lock-free and never observe a
//! half-applied transition.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use misso_protocol::{Session, SessionId};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::fetcher::SnapshotFetcher;
use crate::reconnect::ReconnectSupervisor;
use crate::stream::{StreamClient, StreamConnection, StreamEvent, StreamSignal};
use crate::transition::{transition, Effect, FetchTicket, Input, SyncState};
use crate::view::SyncView;

const QUEUE_CAPACITY: usize = 256;
const CHANGES_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Push feed to follow once an operator is bound
    pub stream: Option<StreamClient>,
    pub reconnect_delay: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            stream: None,
            reconnect_delay: Duration::from_millis(crate::config::DEFAULT_RECONNECT_DELAY_MS),
        }
    }
}

impl StoreOptions {
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        Ok(Self {
            stream: Some(StreamClient::new(config.resolved_stream_url()?)),
            reconnect_delay: config.reconnect_delay(),
        })
    }
}

/// Caller-facing operations
pub enum StoreCommand {
    Init {
        operator: String,
    },
    Refresh {
        reply: oneshot::Sender<Result<()>>,
    },
    Select {
        id: Option<SessionId>,
    },
    ApplyStreamEvent {
        event: StreamEvent,
    },
    Dispose {
        reply: oneshot::Sender<()>,
    },
}

/// Everything the actor's queue carries
pub enum StoreEvent {
    Command(StoreCommand),
    Stream(StreamSignal),
    FetchDone {
        ticket: FetchTicket,
        result: Result<Vec<Session>>,
    },
    ReconnectDue,
}

impl From<StreamSignal> for StoreEvent {
    fn from(signal: StreamSignal) -> Self {
        StoreEvent::Stream(signal)
    }
}

/// Handle to a running store (cheap to Clone).
#[derive(Clone)]
pub struct SessionStateStore {
    tx: mpsc::Sender<StoreEvent>,
    view: Arc<ArcSwap<SyncView>>,
    changes: broadcast::Sender<Arc<SyncView>>,
}

impl SessionStateStore {
    /// Spawn the store actor. Nothing is fetched or connected until [`Self::init`].
    pub fn spawn<F>(fetcher: F, options: StoreOptions) -> Self
    where
        F: SnapshotFetcher,
    {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let view = Arc::new(ArcSwap::from_pointee(SyncView::default()));
        let (changes, _) = broadcast::channel(CHANGES_CAPACITY);

        let actor = StoreActor {
            state: SyncState::default(),
            revision: 0,
            fetcher: Arc::new(fetcher),
            stream: options.stream,
            connection: None,
            supervisor: ReconnectSupervisor::new(options.reconnect_delay),
            fetches: HashMap::new(),
            waiting: HashMap::new(),
            tx: tx.downgrade(),
            view: Arc::clone(&view),
            changes: changes.clone(),
        };
        tokio::spawn(actor.run(rx));

        Self { tx, view, changes }
    }

    /// Bind the operator, fetch its history and start following the stream.
    pub async fn init(&self, operator: impl Into<String>) -> Result<()> {
        self.send(StoreCommand::Init {
            operator: operator.into(),
        })
        .await
    }

    /// Fetch a fresh snapshot and wait until it has been applied or rejected.
    pub async fn refresh(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(StoreCommand::Refresh { reply }).await?;
        rx.await.map_err(|_| SyncError::Closed)?
    }

    /// Pin a historical session for display, or unpin with `None`.
    pub async fn select(&self, id: Option<SessionId>) -> Result<()> {
        self.send(StoreCommand::Select { id }).await
    }

    /// Feed an event from a transport other than the built-in stream client.
    pub async fn apply_stream_event(&self, event: StreamEvent) -> Result<()> {
        self.send(StoreCommand::ApplyStreamEvent { event }).await
    }

    /// Close the stream, cancel timers and in-flight fetches, stop the actor.
    pub async fn dispose(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(StoreCommand::Dispose { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Lock-free read of the latest derived view.
    pub fn view(&self) -> Arc<SyncView> {
        self.view.load_full()
    }

    /// Every published view, in order.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<SyncView>> {
        self.changes.subscribe()
    }

    /// Resolve with the first view (current or future) matching `predicate`.
    pub async fn wait_for<P>(&self, predicate: P) -> Result<Arc<SyncView>>
    where
        P: Fn(&SyncView) -> bool,
    {
        let mut rx = self.subscribe();
        let current = self.view();
        if predicate(&current) {
            return Ok(current);
        }

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Ok(view) if predicate(&view) => return Ok(view),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        let view = self.view();
                        if predicate(&view) {
                            return Ok(view);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return Err(SyncError::Closed),
                },
                _ = self.tx.closed() => return Err(SyncError::Closed),
            }
        }
    }

    async fn send(&self, cmd: StoreCommand) -> Result<()> {
        self.tx
            .send(StoreEvent::Command(cmd))
            .await
            .map_err(|_| SyncError::Closed)
    }
}

struct StoreActor<F> {
    state: SyncState,
    revision: u64,
    fetcher: Arc<F>,
    stream: Option<StreamClient>,
    connection: Option<StreamConnection>,
    supervisor: ReconnectSupervisor,
    fetches: HashMap<u64, JoinHandle<()>>,
    waiting: HashMap<u64, oneshot::Sender<Result<()>>>,
    tx: mpsc::WeakSender<StoreEvent>,
    view: Arc<ArcSwap<SyncView>>,
    changes: broadcast::Sender<Arc<SyncView>>,
}

impl<F> StoreActor<F>
where
    F: SnapshotFetcher,
{
    async fn run(mut self, mut rx: mpsc::Receiver<StoreEvent>) {
        while let Some(event) = rx.recv().await {
            if let StoreEvent::Command(StoreCommand::Dispose { reply }) = event {
                self.shutdown().await;
                let _ = reply.send(());
                return;
            }
            self.handle(event);
        }
        self.shutdown().await;
    }

    fn handle(&mut self, event: StoreEvent) {
        match event {
            StoreEvent::Command(cmd) => self.handle_command(cmd),
            StoreEvent::Stream(signal) => self.handle_signal(signal),
            StoreEvent::FetchDone { ticket, result } => self.handle_fetch_done(ticket, result),
            StoreEvent::ReconnectDue => {
                self.supervisor.timer_fired();
                if self.connection.is_none() {
                    info!(
                        component = "store",
                        event = "store.stream.reconnecting",
                        attempt = self.supervisor.scheduled_count(),
                        "Reconnecting stream"
                    );
                    self.start_stream();
                }
            }
        }
    }

    fn handle_command(&mut self, cmd: StoreCommand) {
        match cmd {
            StoreCommand::Init { operator } => {
                info!(
                    component = "store",
                    event = "store.init",
                    operator = %operator,
                    "Store initialized"
                );
                self.apply(Input::Bind { operator });
                self.start_stream();
            }
            StoreCommand::Refresh { reply } => {
                if self.state.operator.is_none() {
                    let _ = reply.send(Err(SyncError::Unbound));
                    return;
                }
                let effects = self.apply(Input::Refresh);
                match fetch_ticket(&effects) {
                    Some(ticket) => {
                        self.waiting.insert(ticket.request_id, reply);
                    }
                    None => {
                        let _ = reply.send(Err(SyncError::Closed));
                    }
                }
            }
            StoreCommand::Select { id } => {
                self.apply(Input::Select { id });
            }
            StoreCommand::ApplyStreamEvent { event } => {
                self.apply(stream_input(event));
            }
            StoreCommand::Dispose { reply } => {
                // Intercepted in `run`.
                let _ = reply.send(());
            }
        }
    }

    fn handle_signal(&mut self, signal: StreamSignal) {
        let current = self.connection.as_ref().map(StreamConnection::id);
        match signal {
            StreamSignal::Connected { connection_id } if current == Some(connection_id) => {
                self.apply(Input::Connected);
            }
            StreamSignal::Event(event) => {
                self.apply(stream_input(event));
            }
            StreamSignal::Lost {
                connection_id,
                reason,
            } if current == Some(connection_id) => {
                debug!(
                    component = "store",
                    event = "store.stream.lost",
                    connection_id,
                    reason = %reason,
                    "Stream lost, handing off to supervisor"
                );
                self.connection = None;
                self.apply(Input::Disconnected);
                if let Some(tx) = self.tx.upgrade() {
                    self.supervisor.notify_lost(&tx, StoreEvent::ReconnectDue);
                }
            }
            StreamSignal::Connected { connection_id } | StreamSignal::Lost { connection_id, .. } => {
                debug!(
                    component = "store",
                    event = "store.stream.stale_signal",
                    connection_id,
                    "Signal from a replaced connection ignored"
                );
            }
        }
    }

    fn handle_fetch_done(&mut self, ticket: FetchTicket, result: Result<Vec<Session>>) {
        self.fetches.remove(&ticket.request_id);
        let reply = self.waiting.remove(&ticket.request_id);

        match result {
            Ok(sessions) => {
                debug!(
                    component = "store",
                    event = "store.fetch.resolved",
                    request_id = ticket.request_id,
                    count = sessions.len(),
                    "Snapshot received"
                );
                self.apply(Input::FetchResolved { ticket, sessions });
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(()));
                }
            }
            Err(err) => {
                warn!(
                    component = "store",
                    event = "store.fetch.failed",
                    request_id = ticket.request_id,
                    error = %err,
                    "Snapshot fetch failed"
                );
                self.apply(Input::FetchFailed {
                    ticket,
                    error: err.to_string(),
                });
                if let Some(reply) = reply {
                    let _ = reply.send(Err(err));
                }
            }
        }
    }

    /// Run one transition and execute its effects.
    fn apply(&mut self, input: Input) -> Vec<Effect> {
        let state = std::mem::take(&mut self.state);
        let (state, effects) = transition(state, input);
        self.state = state;

        let mut publish = false;
        for effect in &effects {
            match effect {
                Effect::FetchHistory { operator, ticket } => {
                    self.dispatch_fetch(operator.clone(), *ticket);
                }
                Effect::Publish => publish = true,
                Effect::Dropped { reason } => {
                    debug!(
                        component = "store",
                        event = "store.input.dropped",
                        reason = %reason,
                        "Input dropped"
                    );
                }
            }
        }

        if publish {
            self.publish();
        }
        effects
    }

    fn publish(&mut self) {
        self.revision += 1;
        let view = Arc::new(SyncView::derive(&self.state, self.revision));
        self.view.store(Arc::clone(&view));
        let _ = self.changes.send(view);
    }

    fn dispatch_fetch(&mut self, operator: String, ticket: FetchTicket) {
        let Some(tx) = self.tx.upgrade() else {
            return;
        };
        let fetcher = Arc::clone(&self.fetcher);

        debug!(
            component = "store",
            event = "store.fetch.dispatched",
            operator = %operator,
            request_id = ticket.request_id,
            "Fetching snapshot"
        );
        let handle = tokio::spawn(async move {
            let result = fetcher.fetch_history(&operator).await;
            let _ = tx.send(StoreEvent::FetchDone { ticket, result }).await;
        });
        self.fetches.insert(ticket.request_id, handle);
    }

    fn start_stream(&mut self) {
        if self.connection.is_some() || self.supervisor.is_pending() {
            return;
        }
        let (Some(client), Some(tx)) = (self.stream.as_ref(), self.tx.upgrade()) else {
            return;
        };
        self.connection = Some(client.spawn(tx));
    }

    async fn shutdown(&mut self) {
        self.supervisor.cancel();
        if let Some(connection) = self.connection.take() {
            connection.close().await;
        }
        for (_, handle) in self.fetches.drain() {
            handle.abort();
        }
        for (_, reply) in self.waiting.drain() {
            let _ = reply.send(Err(SyncError::Closed));
        }
        if self.state.connected {
            self.apply(Input::Disconnected);
        }
        info!(
            component = "store",
            event = "store.disposed",
            operator = ?self.state.operator,
            "Store disposed"
        );
    }
}

fn stream_input(event: StreamEvent) -> Input {
    match event {
        StreamEvent::Update { operator, surgery } => Input::StreamUpdate { operator, surgery },
        StreamEvent::Complete { operator } => Input::StreamComplete { operator },
    }
}

fn fetch_ticket(effects: &[Effect]) -> Option<FetchTicket> {
    effects.iter().find_map(|e| match e {
        Effect::FetchHistory { ticket, .. } => Some(*ticket),
        _ => None,
    })
}
