//! EventBus - topic-based publish/subscribe between kernel components.
//!
//! All notification flow between the kernel, adapters and plugins goes
//! through here; components never hold function references to each other.
//!
//! # Delivery
//!
//! - `emit` invokes every handler currently subscribed to the topic, in
//!   subscription order, synchronously.
//! - A failing (or panicking) handler is logged and skipped; the remaining
//!   handlers still run.
//! - An `emit` issued from inside a handler is queued and delivered after the
//!   event currently being delivered has gone through its handler list. Call
//!   stack depth stays constant no matter how handlers chain.
//! - No ordering across topics, no replay for late subscribers.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde_json::Value;
use smol_str::SmolStr;
use tracing::{trace, warn};

use crate::ast::DocumentAst;
use crate::command::CommandId;
use crate::document::DocumentChange;
use crate::error::HandlerError;
use crate::input::{KeyCombo, MouseEvent};
use crate::plugin::PluginId;
use crate::types::{AdapterKind, Selection};

/// Default bound on events waiting behind a delivery in progress.
pub const DEFAULT_MAX_QUEUED_EVENTS: usize = 1024;

/// Event topic name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic(SmolStr);

impl Topic {
    pub const DOCUMENT_CHANGED: Self = Self(SmolStr::new_static("document.changed"));
    pub const DOCUMENT_SAVED: Self = Self(SmolStr::new_static("document.saved"));
    pub const STATE_CHANGED: Self = Self(SmolStr::new_static("state.changed"));
    pub const SELECTION_CHANGED: Self = Self(SmolStr::new_static("selection.changed"));
    pub const ADAPTER_SWITCHED: Self = Self(SmolStr::new_static("adapter.switched"));
    pub const ADAPTER_UNMOUNTED: Self = Self(SmolStr::new_static("adapter.unmounted"));
    pub const INPUT_KEY: Self = Self(SmolStr::new_static("input.key"));
    pub const INPUT_MOUSE: Self = Self(SmolStr::new_static("input.mouse"));
    pub const PLUGIN_REGISTERED: Self = Self(SmolStr::new_static("plugin.registered"));
    pub const PLUGIN_DESTROYED: Self = Self(SmolStr::new_static("plugin.destroyed"));
    pub const COMMAND_EXECUTED: Self = Self(SmolStr::new_static("command.executed"));
    pub const COMMAND_FAILED: Self = Self(SmolStr::new_static("command.failed"));
    pub const OUTLINE_UPDATED: Self = Self(SmolStr::new_static("outline.updated"));
    pub const KERNEL_READY: Self = Self(SmolStr::new_static("kernel.ready"));
    pub const KERNEL_DESTROYING: Self = Self(SmolStr::new_static("kernel.destroying"));

    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Event payloads. One closed set shared by every topic.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    None,
    /// The tree after the change, plus what changed.
    Document {
        revision: u64,
        ast: Arc<DocumentAst>,
        changes: Vec<DocumentChange>,
    },
    State {
        revision: u64,
        dirty: bool,
    },
    Selection(Option<Selection>),
    Adapter {
        kind: AdapterKind,
        reason: Option<String>,
    },
    Key(KeyCombo),
    Mouse(MouseEvent),
    Plugin(PluginId),
    Command {
        id: CommandId,
        error: Option<String>,
    },
    Saved {
        revision: u64,
    },
    Json(Value),
}

/// A delivered event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub topic: Topic,
    pub payload: Payload,
}

/// Result type for event handlers.
pub type HandlerResult = Result<(), HandlerError>;

type Handler = Arc<dyn Fn(&Event) -> HandlerResult + Send + Sync>;

#[derive(Debug, Default)]
struct SlotFlags {
    unsubscribed: AtomicBool,
    paused: AtomicBool,
}

struct Slot {
    id: u64,
    handler: Handler,
    flags: Arc<SlotFlags>,
}

struct BusInner {
    topics: Mutex<HashMap<Topic, Vec<Slot>>>,
    queue: Mutex<VecDeque<Event>>,
    delivering: AtomicBool,
    closed: AtomicBool,
    next_id: AtomicU64,
    max_queued: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Handlers never run under these locks, so a poisoned lock only means a
    // panic elsewhere; the data itself is still consistent.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Topic-based publish/subscribe hub.
///
/// Cloning is cheap and every clone addresses the same bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("topics", &lock(&self.inner.topics).len())
            .field("closed", &self.inner.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_queue_limit(DEFAULT_MAX_QUEUED_EVENTS)
    }

    /// A bus that drops re-entrant events beyond `max_queued` pending ones.
    pub fn with_queue_limit(max_queued: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                topics: Mutex::new(HashMap::new()),
                queue: Mutex::new(VecDeque::new()),
                delivering: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                max_queued,
            }),
        }
    }

    /// Subscribe `handler` to `topic`.
    pub fn subscribe<F>(&self, topic: impl Into<Topic>, handler: F) -> Subscription
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        let topic = topic.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let flags = Arc::new(SlotFlags::default());
        if self.inner.closed.load(Ordering::Acquire) {
            // Nothing will ever be delivered; hand back an inert subscription.
            flags.unsubscribed.store(true, Ordering::Release);
        } else {
            lock(&self.inner.topics)
                .entry(topic.clone())
                .or_default()
                .push(Slot {
                    id,
                    handler: Arc::new(handler),
                    flags: Arc::clone(&flags),
                });
        }
        trace!(%topic, id, "subscribed");
        Subscription {
            id,
            topic,
            flags,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Publish an event on `topic`.
    pub fn emit(&self, topic: impl Into<Topic>, payload: Payload) {
        let event = Event {
            topic: topic.into(),
            payload,
        };
        if self.inner.closed.load(Ordering::Acquire) {
            trace!(topic = %event.topic, "bus closed, dropping event");
            return;
        }
        {
            let mut queue = lock(&self.inner.queue);
            if queue.len() >= self.inner.max_queued {
                warn!(topic = %event.topic, limit = self.inner.max_queued, "event queue full, dropping event");
                return;
            }
            queue.push_back(event);
        }

        loop {
            if self.inner.delivering.swap(true, Ordering::AcqRel) {
                // Someone up the stack is delivering; they will drain the queue.
                return;
            }
            while let Some(event) = lock(&self.inner.queue).pop_front() {
                self.deliver(&event);
            }
            self.inner.delivering.store(false, Ordering::Release);
            if lock(&self.inner.queue).is_empty() {
                break;
            }
        }
    }

    fn deliver(&self, event: &Event) {
        let slots: Vec<(u64, Handler, Arc<SlotFlags>)> = lock(&self.inner.topics)
            .get(&event.topic)
            .map(|slots| {
                slots
                    .iter()
                    .map(|s| (s.id, Arc::clone(&s.handler), Arc::clone(&s.flags)))
                    .collect()
            })
            .unwrap_or_default();

        for (id, handler, flags) in slots {
            if flags.unsubscribed.load(Ordering::Acquire) || flags.paused.load(Ordering::Acquire) {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(topic = %event.topic, subscription = id, error = %err, "event handler failed");
                }
                Err(_) => {
                    warn!(topic = %event.topic, subscription = id, "event handler panicked");
                }
            }
        }
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        lock(&self.inner.topics)
            .get(topic)
            .map(|slots| {
                slots
                    .iter()
                    .filter(|s| !s.flags.unsubscribed.load(Ordering::Acquire))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Drop every subscription and refuse further events.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let mut topics = lock(&self.inner.topics);
        for slot in topics.values().flatten() {
            slot.flags.unsubscribed.store(true, Ordering::Release);
        }
        topics.clear();
        lock(&self.inner.queue).clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

/// Handle to one subscription.
///
/// Dropping the handle does not unsubscribe.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    topic: Topic,
    flags: Arc<SlotFlags>,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Remove the handler. Safe to call any number of times.
    pub fn unsubscribe(&self) {
        if self.flags.unsubscribed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            let mut topics = lock(&bus.topics);
            if let Some(slots) = topics.get_mut(&self.topic) {
                slots.retain(|s| s.id != self.id);
                if slots.is_empty() {
                    topics.remove(&self.topic);
                }
            }
        }
    }

    /// Stop delivering to this handler until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.flags.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.flags.paused.store(false, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        !self.flags.unsubscribed.load(Ordering::Acquire)
            && !self.flags.paused.load(Ordering::Acquire)
    }
}
