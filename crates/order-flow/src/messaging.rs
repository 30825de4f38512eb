//! Outbound messaging port and an in-memory implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use common::{MessageRef, UserId};
use domain::CallbackAction;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::MessagingError;

/// One inline button. Pressing it sends `action` back as a callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub label: String,
    pub action: CallbackAction,
}

impl Button {
    pub fn new(label: impl Into<String>, action: CallbackAction) -> Self {
        Self {
            label: label.into(),
            action,
        }
    }
}

/// Rows of inline buttons attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyboard {
    pub rows: Vec<Vec<Button>>,
}

impl Keyboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a row of buttons.
    pub fn row(mut self, buttons: impl IntoIterator<Item = Button>) -> Self {
        self.rows.push(buttons.into_iter().collect());
        self
    }

    /// Keyboard with a single button.
    pub fn single(label: impl Into<String>, action: CallbackAction) -> Self {
        Self::new().row([Button::new(label, action)])
    }

    /// Iterates over every button, row by row.
    pub fn buttons(&self) -> impl Iterator<Item = &Button> {
        self.rows.iter().flatten()
    }
}

/// Transport operations the order flow needs.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    /// Sends a new message and returns its handle.
    async fn reply(
        &self,
        user_id: UserId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<MessageRef, MessagingError>;

    /// Replaces the text and keyboard of the last message sent to the user.
    async fn edit_last(
        &self,
        user_id: UserId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<(), MessagingError>;

    async fn delete_message(
        &self,
        user_id: UserId,
        message: MessageRef,
    ) -> Result<(), MessagingError>;
}

/// A reply instruction produced while handling an event.
///
/// Handlers only collect these; they are delivered after the conversation
/// has been persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Reply {
        text: String,
        keyboard: Option<Keyboard>,
    },
    EditLast {
        text: String,
        keyboard: Option<Keyboard>,
    },
    Delete(MessageRef),
}

impl Outbound {
    pub fn reply(text: impl Into<String>) -> Self {
        Outbound::Reply {
            text: text.into(),
            keyboard: None,
        }
    }

    pub fn reply_with(text: impl Into<String>, keyboard: Keyboard) -> Self {
        Outbound::Reply {
            text: text.into(),
            keyboard: Some(keyboard),
        }
    }

    pub fn edit_last(text: impl Into<String>, keyboard: Option<Keyboard>) -> Self {
        Outbound::EditLast {
            text: text.into(),
            keyboard,
        }
    }

    /// Sends this instruction through `port`.
    pub async fn deliver<M: MessagingPort + ?Sized>(
        self,
        port: &M,
        user_id: UserId,
    ) -> Result<(), MessagingError> {
        match self {
            Outbound::Reply { text, keyboard } => {
                port.reply(user_id, &text, keyboard).await?;
            }
            Outbound::EditLast { text, keyboard } => {
                port.edit_last(user_id, &text, keyboard).await?;
            }
            Outbound::Delete(message) => {
                // A message the user already removed is not worth failing over.
                if let Err(e) = port.delete_message(user_id, message).await {
                    tracing::warn!(%user_id, %message, error = %e, "message delete failed");
                }
            }
        }
        Ok(())
    }
}

/// Record of an operation performed by `InMemoryMessenger`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Delivered {
    Sent {
        message: MessageRef,
        text: String,
        keyboard: Option<Keyboard>,
    },
    Edited {
        message: MessageRef,
        text: String,
        keyboard: Option<Keyboard>,
    },
    Deleted {
        message: MessageRef,
    },
}

impl Delivered {
    /// Text of a sent or edited message.
    pub fn text(&self) -> Option<&str> {
        match self {
            Delivered::Sent { text, .. } | Delivered::Edited { text, .. } => Some(text),
            Delivered::Deleted { .. } => None,
        }
    }

    pub fn keyboard(&self) -> Option<&Keyboard> {
        match self {
            Delivered::Sent { keyboard, .. } | Delivered::Edited { keyboard, .. } => {
                keyboard.as_ref()
            }
            Delivered::Deleted { .. } => None,
        }
    }

    pub fn message(&self) -> MessageRef {
        match self {
            Delivered::Sent { message, .. }
            | Delivered::Edited { message, .. }
            | Delivered::Deleted { message } => *message,
        }
    }
}

/// Most messages a chat remembers as deletable or editable.
const MAX_LIVE_MESSAGES: usize = 64;

#[derive(Debug, Default)]
struct Chat {
    /// Messages that can still be edited or deleted, flagged when they carry buttons.
    live: BTreeMap<MessageRef, bool>,
    last_sent: Option<MessageRef>,
    outbox: Vec<Delivered>,
}

impl Chat {
    fn push_sent(&mut self, message: MessageRef, has_keyboard: bool) {
        // Without buttons the previous message can never be pressed again.
        if let Some(previous) = self.last_sent {
            if self.live.get(&previous) == Some(&false) {
                self.live.remove(&previous);
            }
        }
        self.live.insert(message, has_keyboard);
        self.last_sent = Some(message);

        while self.live.len() > MAX_LIVE_MESSAGES {
            if self.live.pop_first().is_none() {
                break;
            }
        }
    }
}

#[derive(Debug, Default)]
struct InMemoryMessengerState {
    chats: HashMap<UserId, Chat>,
    next_ref: i64,
    fail_on_send: bool,
}

/// In-memory messenger that queues everything it is asked to send.
///
/// Used by tests and by the HTTP adapter, which drains the queue per user.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMessenger {
    state: Arc<Mutex<InMemoryMessengerState>>,
}

impl InMemoryMessenger {
    /// Creates a new in-memory messenger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the messenger to fail every send and edit.
    pub async fn set_fail_on_send(&self, fail: bool) {
        self.state.lock().await.fail_on_send = fail;
    }

    /// Removes and returns everything queued for the user.
    pub async fn take_messages(&self, user_id: UserId) -> Vec<Delivered> {
        let mut state = self.state.lock().await;
        state
            .chats
            .get_mut(&user_id)
            .map(|chat| std::mem::take(&mut chat.outbox))
            .unwrap_or_default()
    }

    /// Returns everything queued for the user without removing it.
    pub async fn messages(&self, user_id: UserId) -> Vec<Delivered> {
        let state = self.state.lock().await;
        state
            .chats
            .get(&user_id)
            .map(|chat| chat.outbox.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessagingPort for InMemoryMessenger {
    async fn reply(
        &self,
        user_id: UserId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<MessageRef, MessagingError> {
        let mut state = self.state.lock().await;
        if state.fail_on_send {
            return Err(MessagingError::Delivery {
                user_id,
                reason: "transport unavailable".to_string(),
            });
        }

        state.next_ref += 1;
        let message = MessageRef::new(state.next_ref);
        let chat = state.chats.entry(user_id).or_default();
        chat.push_sent(message, keyboard.is_some());
        chat.outbox.push(Delivered::Sent {
            message,
            text: text.to_string(),
            keyboard,
        });
        Ok(message)
    }

    async fn edit_last(
        &self,
        user_id: UserId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<(), MessagingError> {
        let last = {
            let mut state = self.state.lock().await;
            if state.fail_on_send {
                return Err(MessagingError::Delivery {
                    user_id,
                    reason: "transport unavailable".to_string(),
                });
            }
            let chat = state.chats.entry(user_id).or_default();
            match chat.last_sent.filter(|message| chat.live.contains_key(message)) {
                Some(message) => {
                    chat.live.insert(message, keyboard.is_some());
                    chat.outbox.push(Delivered::Edited {
                        message,
                        text: text.to_string(),
                        keyboard,
                    });
                    return Ok(());
                }
                None => keyboard,
            }
        };

        // Nothing left to edit: fall back to a fresh message.
        self.reply(user_id, text, last).await.map(|_| ())
    }

    async fn delete_message(
        &self,
        user_id: UserId,
        message: MessageRef,
    ) -> Result<(), MessagingError> {
        let mut state = self.state.lock().await;
        let chat = state.chats.entry(user_id).or_default();
        if chat.live.remove(&message).is_none() {
            return Err(MessagingError::UnknownMessage(message));
        }
        chat.outbox.push(Delivered::Deleted { message });
        Ok(())
    }
}
