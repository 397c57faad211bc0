//! Pure reconciliation function
//!
//! Every rule for merging snapshots and stream events lives here as a pure,
//! synchronous function: `transition(state, input) -> (state, effects)`.
//! No IO, no async, no locking. The store actor executes the effects.

use misso_protocol::{newest_first, LiveSurgery, Session, SessionId, SyncPhase};

use crate::normalize::normalize_live;

// ---------------------------------------------------------------------------
// SyncState: the canonical working set
// ---------------------------------------------------------------------------

/// Where the session in the live slot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveOrigin {
    /// Promoted from a live-flagged snapshot record.
    Snapshot { request_id: u64 },
    /// Pushed by the stream; `seq` is the stream event counter at arrival.
    Stream { seq: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveSlot {
    pub session: Session,
    pub origin: LiveOrigin,
}

/// Identifies one dispatched fetch and what the store had seen at dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    pub request_id: u64,
    /// Stream events applied before this fetch was dispatched.
    pub stream_seq: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncState {
    pub phase: SyncPhase,
    pub operator: Option<String>,
    /// Durable sessions in the order the last applied snapshot listed them.
    pub history: Vec<Session>,
    pub live: Option<LiveSlot>,
    pub selected: Option<SessionId>,
    pub connected: bool,
    pub last_error: Option<String>,
    /// Id the next fetch will carry.
    pub next_request: u64,
    /// Latest fetch whose result was applied.
    pub applied_request: Option<u64>,
    /// Stream update/complete events applied so far.
    pub stream_seq: u64,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            phase: SyncPhase::Uninitialized,
            operator: None,
            history: Vec::new(),
            live: None,
            selected: None,
            connected: false,
            last_error: None,
            next_request: 1,
            applied_request: None,
            stream_seq: 0,
        }
    }
}

impl SyncState {
    fn issue_ticket(&mut self) -> FetchTicket {
        let ticket = FetchTicket {
            request_id: self.next_request,
            stream_seq: self.stream_seq,
        };
        self.next_request += 1;
        ticket
    }

    fn latest_issued(&self) -> u64 {
        self.next_request.saturating_sub(1)
    }

    fn settled_phase(&self) -> SyncPhase {
        if self.live.is_some() {
            SyncPhase::Live
        } else {
            SyncPhase::Idle
        }
    }

    fn is_bound_to(&self, operator: &str) -> bool {
        self.operator.as_deref() == Some(operator)
    }

    /// Every session in the working set, live one last.
    pub fn working_set(&self) -> impl Iterator<Item = &Session> {
        self.history
            .iter()
            .chain(self.live.as_ref().map(|slot| &slot.session))
    }
}

// ---------------------------------------------------------------------------
// Input: everything that can change the state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Input {
    /// Operator name became known (config endpoint or explicit init).
    Bind { operator: String },
    /// Caller asked for a fresh snapshot.
    Refresh,
    FetchResolved {
        ticket: FetchTicket,
        sessions: Vec<Session>,
    },
    FetchFailed {
        ticket: FetchTicket,
        error: String,
    },
    StreamUpdate {
        operator: String,
        surgery: LiveSurgery,
    },
    StreamComplete { operator: String },
    /// Pin a historical session for display, or unpin with `None`.
    Select { id: Option<SessionId> },
    Connected,
    Disconnected,
}

// ---------------------------------------------------------------------------
// Effects: describe work for the caller
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    FetchHistory {
        operator: String,
        ticket: FetchTicket,
    },
    /// State changed; derived views must be republished.
    Publish,
    /// Input had no effect on the state.
    Dropped { reason: &'static str },
}

// ---------------------------------------------------------------------------
// transition(): the pure core
// ---------------------------------------------------------------------------

/// Pure, synchronous state transition.
///
/// Given the current state and an input event, returns the new state and the
/// effects (fetch dispatches, view publication) to execute.
pub fn transition(mut state: SyncState, input: Input) -> (SyncState, Vec<Effect>) {
    let mut effects: Vec<Effect> = Vec::new();

    match input {
        Input::Bind { operator } => {
            let operator = operator.trim().to_string();
            if operator.is_empty() {
                effects.push(Effect::Dropped {
                    reason: "empty operator name",
                });
            } else if state.is_bound_to(&operator) {
                // Re-binding the same operator is a no-op.
            } else if state.operator.is_some() {
                effects.push(Effect::Dropped {
                    reason: "operator already bound",
                });
            } else {
                let ticket = bind(&mut state, operator.clone());
                effects.push(Effect::FetchHistory { operator, ticket });
                effects.push(Effect::Publish);
            }
        }

        Input::Refresh => match state.operator.clone() {
            Some(operator) => {
                state.phase = SyncPhase::Loading;
                let ticket = state.issue_ticket();
                effects.push(Effect::FetchHistory { operator, ticket });
                effects.push(Effect::Publish);
            }
            None => effects.push(Effect::Dropped {
                reason: "no operator bound",
            }),
        },

        Input::FetchResolved { ticket, sessions } => {
            if is_stale(&state, ticket) {
                effects.push(Effect::Dropped {
                    reason: "stale snapshot",
                });
            } else {
                apply_snapshot(&mut state, ticket, sessions);
                effects.push(Effect::Publish);
            }
        }

        Input::FetchFailed { ticket, error } => {
            if is_stale(&state, ticket) {
                effects.push(Effect::Dropped {
                    reason: "stale fetch failure",
                });
            } else {
                state.last_error = Some(error);
                if ticket.request_id == state.latest_issued() {
                    state.phase = state.settled_phase();
                }
                effects.push(Effect::Publish);
            }
        }

        Input::StreamUpdate { operator, surgery } => {
            let operator = operator.trim().to_string();
            if state.operator.is_none() && !operator.is_empty() {
                let ticket = bind(&mut state, operator.clone());
                effects.push(Effect::FetchHistory {
                    operator: operator.clone(),
                    ticket,
                });
            }

            if state.is_bound_to(&operator) {
                state.stream_seq += 1;
                state.live = Some(LiveSlot {
                    session: normalize_live(&surgery, &operator),
                    origin: LiveOrigin::Stream {
                        seq: state.stream_seq,
                    },
                });
                state.phase = SyncPhase::Live;
                effects.push(Effect::Publish);
            } else {
                effects.push(Effect::Dropped {
                    reason: "update for another operator",
                });
            }
        }

        Input::StreamComplete { operator } => {
            let operator = operator.trim().to_string();
            if state.operator.is_none() {
                effects.push(Effect::Dropped {
                    reason: "no operator bound",
                });
            } else if !state.is_bound_to(&operator) {
                effects.push(Effect::Dropped {
                    reason: "complete for another operator",
                });
            } else {
                state.stream_seq += 1;
                state.live = None;
                state.phase = SyncPhase::Loading;
                let ticket = state.issue_ticket();
                effects.push(Effect::FetchHistory { operator, ticket });
                effects.push(Effect::Publish);
            }
        }

        Input::Select { id } => match id {
            Some(id) if !state.history.iter().any(|s| s.id == Some(id)) => {
                effects.push(Effect::Dropped {
                    reason: "unknown session id",
                });
            }
            id => {
                if state.selected != id {
                    state.selected = id;
                    effects.push(Effect::Publish);
                }
            }
        },

        Input::Connected => {
            if !state.connected {
                state.connected = true;
                effects.push(Effect::Publish);
            }
        }

        Input::Disconnected => {
            if state.connected {
                state.connected = false;
                effects.push(Effect::Publish);
            }
        }
    }

    (state, effects)
}

fn bind(state: &mut SyncState, operator: String) -> FetchTicket {
    state.operator = Some(operator);
    state.phase = SyncPhase::Loading;
    state.issue_ticket()
}

fn is_stale(state: &SyncState, ticket: FetchTicket) -> bool {
    state
        .applied_request
        .is_some_and(|applied| ticket.request_id < applied)
}

/// Replace history wholesale and decide what happens to the live slot.
///
/// The snapshot only gets a say over the live slot when no stream
/// update/complete landed after the fetch was dispatched.
fn apply_snapshot(state: &mut SyncState, ticket: FetchTicket, sessions: Vec<Session>) {
    let (mut flagged, mut durable): (Vec<Session>, Vec<Session>) =
        sessions.into_iter().partition(|s| s.is_live);

    // At most one live record survives; extra flagged rows are treated as finished.
    flagged.sort_by(newest_first);
    let mut flagged = flagged.into_iter();
    let candidate = flagged.next();
    durable.extend(flagged.map(|mut s| {
        s.is_live = false;
        s
    }));

    state.history = durable;
    state.applied_request = Some(ticket.request_id);
    state.last_error = None;

    let stream_moved_on = state.stream_seq > ticket.stream_seq;
    if !stream_moved_on {
        match candidate {
            Some(session) => {
                state.live = Some(LiveSlot {
                    session,
                    origin: LiveOrigin::Snapshot {
                        request_id: ticket.request_id,
                    },
                });
            }
            None => {
                // Only `complete` clears a stream-delivered record.
                if matches!(
                    state.live,
                    Some(LiveSlot {
                        origin: LiveOrigin::Snapshot { .. },
                        ..
                    })
                ) {
                    state.live = None;
                }
            }
        }
    }

    if ticket.request_id == state.latest_issued() {
        state.phase = state.settled_phase();
    }
}
