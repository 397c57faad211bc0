//! Read-only views derived from [`SyncState`].
//!
//! Derived once per state change and cached behind the store's `ArcSwap`, so
//! reads never sort or filter.

use misso_protocol::{newest_first, Session, SessionId, SyncPhase};
use serde::Serialize;

use crate::transition::SyncState;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncView {
    /// Bumped on every published change.
    pub revision: u64,
    pub phase: SyncPhase,
    pub operator: Option<String>,
    pub connected: bool,
    pub live: Option<Session>,
    /// Non-live sessions, newest first.
    pub history: Vec<Session>,
    /// Pinned session, else the live one, else the newest historical one.
    pub current_display: Option<Session>,
    pub selected: Option<SessionId>,
    pub last_error: Option<String>,
}

impl Default for SyncView {
    fn default() -> Self {
        Self::derive(&SyncState::default(), 0)
    }
}

impl SyncView {
    pub fn derive(state: &SyncState, revision: u64) -> Self {
        let mut history: Vec<Session> = state
            .history
            .iter()
            .filter(|s| !s.is_live)
            .cloned()
            .collect();
        history.sort_by(newest_first);

        let live = state.live.as_ref().map(|slot| slot.session.clone());

        let pinned = state
            .selected
            .and_then(|id| history.iter().find(|s| s.id == Some(id)));
        let current_display = pinned
            .or(live.as_ref())
            .or_else(|| history.first())
            .cloned();

        Self {
            revision,
            phase: state.phase,
            operator: state.operator.clone(),
            connected: state.connected,
            live,
            history,
            current_display,
            selected: state.selected,
            last_error: state.last_error.clone(),
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    /// History plus the live session, if any.
    pub fn working_set(&self) -> impl Iterator<Item = &Session> {
        self.history.iter().chain(self.live.as_ref())
    }

    pub fn history_ids(&self) -> Vec<Option<SessionId>> {
        self.history.iter().map(|s| s.id).collect()
    }
}
