//! Cancellation for in-flight adapter mounts and commands.
//!
//! A [`CancellationSource`] hands out [`CancellationToken`]s. Cancelling the
//! source is visible through every token; the first reason given sticks.

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

/// Why an operation was cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancellationReason {
    /// A newer switch request replaced this one.
    Superseded,
    /// The kernel is shutting down.
    KernelDestroyed,
    /// The host asked for it.
    Requested,
}

impl fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Superseded => write!(f, "superseded"),
            Self::KernelDestroyed => write!(f, "kernel destroyed"),
            Self::Requested => write!(f, "requested"),
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    reason: Mutex<Option<CancellationReason>>,
    notify: Notify,
}

impl Shared {
    fn reason(&self) -> Option<CancellationReason> {
        self.reason
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Cloneable handle to check for cancellation.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    shared: Arc<Shared>,
}

impl CancellationToken {
    /// A token nobody can cancel.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    pub fn reason(&self) -> Option<CancellationReason> {
        self.shared.reason()
    }

    /// Resolves once cancelled. Never resolves for [`CancellationToken::none`].
    pub async fn cancelled(&self) -> CancellationReason {
        loop {
            let notified = self.shared.notify.notified();
            if let Some(reason) = self.reason() {
                return reason;
            }
            notified.await;
        }
    }
}

/// Controller that cancels every token it handed out.
#[derive(Debug, Clone, Default)]
pub struct CancellationSource {
    shared: Arc<Shared>,
}

impl CancellationSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Cancel. Returns false if already cancelled (the original reason is kept).
    pub fn cancel(&self, reason: CancellationReason) -> bool {
        {
            let mut slot = self
                .shared
                .reason
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if slot.is_some() {
                return false;
            }
            *slot = Some(reason);
        }
        self.shared.notify.notify_waiters();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.reason().is_some()
    }
}
