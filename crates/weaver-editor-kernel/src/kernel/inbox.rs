//! The kernel's single dispatch channel.
//!
//! Adapters, plugin handlers and async command tails never mutate kernel
//! state directly. They push [`KernelMessage`]s through a [`KernelSender`];
//! the kernel drains the queue in order at well-defined points.

use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::command::CommandId;
use crate::document::DocumentAction;
use crate::input::InputEvent;
use crate::state::Action;

/// Anything that changes kernel-owned state.
#[derive(Debug, Clone, PartialEq)]
pub enum KernelAction {
    /// Structural edit, applied by the document model first.
    Document(DocumentAction),
    /// Editor-state action, applied by the reducer.
    State(Action),
}

impl From<DocumentAction> for KernelAction {
    fn from(action: DocumentAction) -> Self {
        Self::Document(action)
    }
}

impl From<Action> for KernelAction {
    fn from(action: Action) -> Self {
        Self::State(action)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum KernelMessage {
    Dispatch(KernelAction),
    Execute { id: CommandId, payload: Value },
    Input(InputEvent),
}

/// Cloneable handle onto the dispatch channel.
///
/// Sends never block. Once the kernel is gone they are silently dropped;
/// [`is_closed`](Self::is_closed) tells you if that happened.
#[derive(Debug, Clone)]
pub struct KernelSender {
    tx: UnboundedSender<KernelMessage>,
}

impl KernelSender {
    pub fn send(&self, message: KernelMessage) -> bool {
        match self.tx.send(message) {
            Ok(()) => true,
            Err(_) => {
                tracing::trace!("kernel inbox closed, dropping message");
                false
            }
        }
    }

    pub fn dispatch(&self, action: impl Into<KernelAction>) -> bool {
        self.send(KernelMessage::Dispatch(action.into()))
    }

    pub fn execute(&self, id: impl Into<CommandId>, payload: Value) -> bool {
        self.send(KernelMessage::Execute {
            id: id.into(),
            payload,
        })
    }

    pub fn input(&self, event: InputEvent) -> bool {
        self.send(KernelMessage::Input(event))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving end, owned by the kernel.
#[derive(Debug)]
pub(crate) struct Inbox {
    tx: UnboundedSender<KernelMessage>,
    rx: UnboundedReceiver<KernelMessage>,
}

impl Inbox {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    pub(crate) fn sender(&self) -> KernelSender {
        KernelSender {
            tx: self.tx.clone(),
        }
    }

    pub(crate) fn try_next(&mut self) -> Option<KernelMessage> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next message. `None` once closed.
    pub(crate) async fn next(&mut self) -> Option<KernelMessage> {
        self.rx.recv().await
    }

    /// Drop everything queued and refuse further messages.
    pub(crate) fn close(&mut self) {
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_arrive_in_order() {
        let mut inbox = Inbox::new();
        let sender = inbox.sender();
        assert!(sender.dispatch(DocumentAction::set_content("a")));
        assert!(sender.execute("save", Value::Null));
        assert_eq!(
            inbox.try_next(),
            Some(KernelMessage::Dispatch(KernelAction::Document(
                DocumentAction::set_content("a")
            )))
        );
        assert!(matches!(inbox.try_next(), Some(KernelMessage::Execute { .. })));
        assert_eq!(inbox.try_next(), None);
    }

    #[test]
    fn test_closed_inbox_drops_sends() {
        let mut inbox = Inbox::new();
        let sender = inbox.sender();
        inbox.close();
        assert!(!sender.execute("save", Value::Null));
        assert!(sender.is_closed());
    }
}
