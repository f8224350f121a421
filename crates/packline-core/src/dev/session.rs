//! Dev session state: the server state machine, the publication slot and
//! the notification channel.

use super::hmr::Notification;
use crate::bundler::Build;
use crate::error::BuildError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::debug;

/// Capacity of the notification channel; slow clients skip older messages.
const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Building,
    Serving,
    Rebuilding,
    Stopped,
}

impl ServerState {
    /// Whether `self -> to` is a legal transition.
    #[must_use]
    pub fn can_transition(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Idle, Self::Building)
                | (Self::Building | Self::Rebuilding, Self::Serving)
                | (Self::Serving, Self::Rebuilding)
                | (_, Self::Stopped)
        ) && self != Self::Stopped
    }
}

/// The build currently served.
#[derive(Debug, Clone)]
pub struct Published {
    pub ticket: u64,
    pub build: Arc<Build>,
}

/// Outcome of [`DevSession::publish`].
#[derive(Debug)]
pub enum Publication {
    /// Now served; carries the build it replaced.
    Published { previous: Option<Arc<Build>> },
    /// A build with a newer ticket is already published.
    Discarded,
}

pub struct DevSession {
    state: Mutex<ServerState>,
    slot: RwLock<Option<Published>>,
    tickets: AtomicU64,
    events: broadcast::Sender<Notification>,
}

impl DevSession {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(ServerState::Idle),
            slot: RwLock::new(None),
            tickets: AtomicU64::new(0),
            events,
        }
    }

    #[must_use]
    pub fn state(&self) -> ServerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn transition(&self, to: ServerState) -> Result<(), BuildError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.can_transition(to) {
            return Err(BuildError::Internal(format!(
                "invalid server state transition {:?} -> {to:?}",
                *state
            )));
        }
        debug!(from = ?*state, to = ?to, "server state");
        *state = to;
        Ok(())
    }

    /// Ticket for a build about to start; tickets only grow.
    pub fn next_ticket(&self) -> u64 {
        self.tickets.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Atomically serve `build` unless a build with a newer ticket is
    /// already published.
    pub fn publish(&self, ticket: u64, build: Build) -> Publication {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|p| p.ticket >= ticket) {
            debug!(ticket, "stale build discarded");
            return Publication::Discarded;
        }
        let previous = slot.replace(Published {
            ticket,
            build: Arc::new(build),
        });
        Publication::Published {
            previous: previous.map(|p| p.build),
        }
    }

    /// The served build. The lock is released before returning, so a
    /// concurrent publish never affects the caller's snapshot.
    #[must_use]
    pub fn current(&self) -> Option<Published> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn build(&self) -> Option<Arc<Build>> {
        self.current().map(|p| p.build)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.events.subscribe()
    }

    /// Broadcast to connected clients; returns how many received it.
    pub fn notify(&self, notification: Notification) -> usize {
        self.events.send(notification).unwrap_or(0)
    }
}

impl Default for DevSession {
    fn default() -> Self {
        Self::new()
    }
}
