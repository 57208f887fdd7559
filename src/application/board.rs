use crate::domain::channel::Address;
use crate::domain::session::{SessionId, SessionStatus, TransferSession};
use crate::error::{Result, TransferError};
use std::sync::Mutex;
use tokio::sync::watch;
use tracing::debug;

#[derive(Default)]
struct BoardState {
    active: Option<SessionId>,
    deposit_address: Option<Address>,
}

/// Publishes the status of the current session for one deposit address and
/// guards the single-active-session rule.
///
/// Updates from a session that is no longer current (the board was reset or
/// a newer session began) are dropped.
pub struct SessionBoard {
    state: Mutex<BoardState>,
    status: watch::Sender<SessionStatus>,
}

impl SessionBoard {
    pub fn new() -> Self {
        let (status, _) = watch::channel(SessionStatus::idle(None));
        Self {
            state: Mutex::new(BoardState::default()),
            status,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn set_deposit_address(&self, address: Address) {
        self.lock().deposit_address = Some(address.clone());
        self.status.send_modify(|s| s.deposit_address = Some(address));
    }

    pub fn deposit_address(&self) -> Option<Address> {
        self.lock().deposit_address.clone()
    }

    /// Makes `session` the current one. Fails while another session for the
    /// same deposit address has not reached a terminal phase.
    pub fn begin(&self, session: &TransferSession) -> Result<()> {
        let mut state = self.lock();
        let busy = state.active.is_some() && !self.status.borrow().is_terminal();
        if busy {
            let address = state
                .deposit_address
                .clone()
                .unwrap_or_else(|| Address::new("unknown"));
            return Err(TransferError::SessionActive(address));
        }
        state.active = Some(session.id().clone());
        self.status
            .send_replace(session.status(state.deposit_address.clone()));
        Ok(())
    }

    /// Publishes `session` if it is still the current one.
    pub fn publish(&self, session: &TransferSession) -> bool {
        let state = self.lock();
        if state.active.as_ref() != Some(session.id()) {
            debug!(session_id = %session.id(), "Discarding update from stale session");
            return false;
        }
        self.status
            .send_replace(session.status(state.deposit_address.clone()));
        true
    }

    pub fn is_current(&self, session_id: &SessionId) -> bool {
        self.lock().active.as_ref() == Some(session_id)
    }

    /// Records a failure that happened before any session existed.
    pub fn fail_idle(&self, err: &TransferError) {
        let mut state = self.lock();
        state.active = None;
        self.status
            .send_replace(SessionStatus::failed(state.deposit_address.clone(), err));
    }

    /// Forgets the current session; its later updates are discarded.
    pub fn reset(&self) {
        let mut state = self.lock();
        *state = BoardState::default();
        self.status.send_replace(SessionStatus::idle(None));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BoardState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for SessionBoard {
    fn default() -> Self {
        Self::new()
    }
}
