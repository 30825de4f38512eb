//! Inbound transport events.
//!
//! The transport hands over raw command text and callback payload strings.
//! They are decoded here exactly once; everything past this module works on
//! the typed variants.

use std::str::FromStr;

use common::{MessageRef, UserId};
use serde::{Deserialize, Serialize};

use crate::book::SearchCategory;
use crate::error::ParseError;
use crate::quantity::QuantityStep;
use crate::value_objects::VendorCode;

/// Something a user did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundEvent {
    /// A top-level slash command.
    Command {
        user_id: UserId,
        chat_ref: i64,
        command: Command,
    },
    /// Free text typed by the user.
    Text { user_id: UserId, content: String },
    /// A button press on a previously sent message.
    Callback {
        user_id: UserId,
        message: Option<MessageRef>,
        action: CallbackAction,
    },
}

impl InboundEvent {
    pub fn user_id(&self) -> UserId {
        match self {
            InboundEvent::Command { user_id, .. }
            | InboundEvent::Text { user_id, .. }
            | InboundEvent::Callback { user_id, .. } => *user_id,
        }
    }

    /// Short name for logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::Command { .. } => "command",
            InboundEvent::Text { .. } => "text",
            InboundEvent::Callback { .. } => "callback",
        }
    }
}

/// Top-level commands. Every one of them abandons the flow in progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Command {
    /// `/start`: register the user and greet.
    Start,
    /// `/request [text]`: begin a search.
    Search { query: Option<String> },
    /// `/my_orders`: list the cart.
    MyOrders,
    /// `/balance`: show the balance.
    Balance,
    /// `/cancel`: return to idle.
    Cancel,
}

impl Command {
    /// Decodes a command message such as `/request Dune`.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let text = text.trim();
        let (name, rest) = text.split_once(char::is_whitespace).unwrap_or((text, ""));
        let rest = rest.trim();

        match name {
            "/start" => Ok(Command::Start),
            "/request" => Ok(Command::Search {
                query: (!rest.is_empty()).then(|| rest.to_string()),
            }),
            "/my_orders" => Ok(Command::MyOrders),
            "/balance" => Ok(Command::Balance),
            "/cancel" => Ok(Command::Cancel),
            _ => Err(ParseError::UnknownCommand(name.to_string())),
        }
    }
}

/// Decoded button payloads.
///
/// `Display` produces the wire tag and `FromStr` reads it back, so
/// keyboards built by the core always decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum CallbackAction {
    Category(SearchCategory),
    RequestQuantity(VendorCode),
    /// Picker buttons name the book they were rendered for.
    Step(QuantityStep, VendorCode),
    Confirm(VendorCode),
    Cancel(VendorCode),
    Pay,
    Remove(VendorCode),
    Replenish,
}

impl std::fmt::Display for CallbackAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallbackAction::Category(SearchCategory::Title) => f.write_str("book_name"),
            CallbackAction::Category(SearchCategory::Author) => f.write_str("book_author"),
            CallbackAction::Category(SearchCategory::VendorCode) => f.write_str("book_vendor"),
            CallbackAction::RequestQuantity(code) => write!(f, "request_for_count:{code}"),
            CallbackAction::Step(step, code) => write!(f, "{}:{code}", step_tag(*step)),
            CallbackAction::Confirm(code) => write!(f, "confirm:{code}"),
            CallbackAction::Cancel(code) => write!(f, "cancel:{code}"),
            CallbackAction::Pay => f.write_str("pay"),
            CallbackAction::Remove(code) => write!(f, "remove:{code}"),
            CallbackAction::Replenish => f.write_str("replenish"),
        }
    }
}

impl FromStr for CallbackAction {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || ParseError::UnknownCallback(s.to_string());

        if let Some((tag, code)) = s.split_once(':') {
            if code.is_empty() {
                return Err(unknown());
            }
            let code = VendorCode::from(code);
            return match tag {
                "request_for_count" => Ok(CallbackAction::RequestQuantity(code)),
                "plus" => Ok(CallbackAction::Step(QuantityStep::PlusOne, code)),
                "plus5" => Ok(CallbackAction::Step(QuantityStep::PlusFive, code)),
                "minus" => Ok(CallbackAction::Step(QuantityStep::MinusOne, code)),
                "minus5" => Ok(CallbackAction::Step(QuantityStep::MinusFive, code)),
                "confirm" => Ok(CallbackAction::Confirm(code)),
                "cancel" => Ok(CallbackAction::Cancel(code)),
                "remove" => Ok(CallbackAction::Remove(code)),
                _ => Err(unknown()),
            };
        }

        match s {
            "book_name" => Ok(CallbackAction::Category(SearchCategory::Title)),
            "book_author" => Ok(CallbackAction::Category(SearchCategory::Author)),
            "book_vendor" => Ok(CallbackAction::Category(SearchCategory::VendorCode)),
            "pay" => Ok(CallbackAction::Pay),
            "replenish" => Ok(CallbackAction::Replenish),
            _ => Err(unknown()),
        }
    }
}

fn step_tag(step: QuantityStep) -> &'static str {
    match step {
        QuantityStep::PlusOne => "plus",
        QuantityStep::PlusFive => "plus5",
        QuantityStep::MinusOne => "minus",
        QuantityStep::MinusFive => "minus5",
    }
}

impl From<CallbackAction> for String {
    fn from(action: CallbackAction) -> Self {
        action.to_string()
    }
}

impl TryFrom<String> for CallbackAction {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("/start").unwrap(), Command::Start);
        assert_eq!(
            Command::parse("/request").unwrap(),
            Command::Search { query: None }
        );
        assert_eq!(
            Command::parse("/request   Lord of the Rings ").unwrap(),
            Command::Search {
                query: Some("Lord of the Rings".to_string())
            }
        );
        assert_eq!(Command::parse("/my_orders").unwrap(), Command::MyOrders);
        assert_eq!(Command::parse(" /balance").unwrap(), Command::Balance);
        assert!(matches!(
            Command::parse("/shutdown"),
            Err(ParseError::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_callback_tags_decode() {
        assert_eq!(
            "book_vendor".parse::<CallbackAction>().unwrap(),
            CallbackAction::Category(SearchCategory::VendorCode)
        );
        assert_eq!(
            "plus5:V1".parse::<CallbackAction>().unwrap(),
            CallbackAction::Step(QuantityStep::PlusFive, VendorCode::new("V1"))
        );
        assert_eq!(
            "confirm:V1".parse::<CallbackAction>().unwrap(),
            CallbackAction::Confirm(VendorCode::new("V1"))
        );
        assert_eq!(
            "remove:ABC123".parse::<CallbackAction>().unwrap(),
            CallbackAction::Remove(VendorCode::new("ABC123"))
        );
        assert_eq!(
            "request_for_count:V1".parse::<CallbackAction>().unwrap(),
            CallbackAction::RequestQuantity(VendorCode::new("V1"))
        );
    }

    #[test]
    fn test_malformed_callbacks_are_rejected() {
        for tag in ["", "plus", "confirm", "remove:", "cancel:", "refund", "pay:V1"] {
            assert!(
                matches!(
                    tag.parse::<CallbackAction>(),
                    Err(ParseError::UnknownCallback(_))
                ),
                "{tag:?} should not decode"
            );
        }
    }

    #[test]
    fn test_keyboard_tags_decode_to_the_same_action() {
        let actions = [
            CallbackAction::Category(SearchCategory::Author),
            CallbackAction::RequestQuantity("V-7".into()),
            CallbackAction::Step(QuantityStep::MinusOne, "V-7".into()),
            CallbackAction::Confirm("V-7".into()),
            CallbackAction::Cancel("V-7".into()),
            CallbackAction::Remove("V-7".into()),
            CallbackAction::Replenish,
        ];
        for action in actions {
            assert_eq!(action.to_string().parse::<CallbackAction>().unwrap(), action);
        }
    }

    #[test]
    fn test_inbound_event_json_shape() {
        let event: InboundEvent = serde_json::from_value(serde_json::json!({
            "kind": "callback",
            "user_id": 42,
            "message": 7,
            "action": "pay"
        }))
        .unwrap();
        assert_eq!(event.user_id(), UserId::new(42));
        assert_eq!(event.kind(), "callback");
        assert!(matches!(
            event,
            InboundEvent::Callback {
                action: CallbackAction::Pay,
                ..
            }
        ));
    }
}
