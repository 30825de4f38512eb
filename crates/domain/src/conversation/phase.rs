//! Conversation phases.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// The step of a user's in-progress interaction.
///
/// Transitions:
/// ```text
/// Idle ──► AwaitingQuery ──► AwaitingCategory ──► BookSelected ──► AwaitingQuantity ──► Idle
///  │                              ▲   │                                  │
///  └────────── /request <text> ───┘   └── nothing found ──► Idle         └── cancel ──► Idle
///  │
///  └──► AwaitingTopUpAmount ──► Idle
/// ```
/// Any top-level command returns to `Idle` (or restarts the search) from every phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Phase {
    /// No flow in progress.
    #[default]
    Idle,

    /// Waiting for the search text.
    AwaitingQuery,

    /// Search text stored, waiting for the search dimension.
    AwaitingCategory,

    /// Search resolved to one or more books, waiting for "buy".
    BookSelected,

    /// Quantity picker shown.
    AwaitingQuantity,

    /// Waiting for a top-up amount.
    AwaitingTopUpAmount,
}

impl Phase {
    pub fn accepts_query_text(&self) -> bool {
        matches!(self, Phase::AwaitingQuery)
    }

    pub fn accepts_category(&self) -> bool {
        matches!(self, Phase::AwaitingCategory)
    }

    pub fn accepts_quantity_request(&self) -> bool {
        matches!(self, Phase::BookSelected)
    }

    /// Picker steps, confirm and cancel.
    pub fn accepts_quantity_actions(&self) -> bool {
        matches!(self, Phase::AwaitingQuantity)
    }

    pub fn accepts_top_up_request(&self) -> bool {
        matches!(self, Phase::Idle)
    }

    pub fn accepts_top_up_amount(&self) -> bool {
        matches!(self, Phase::AwaitingTopUpAmount)
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Phase::Idle)
    }

    /// Returns the phase name as stored.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "Idle",
            Phase::AwaitingQuery => "AwaitingQuery",
            Phase::AwaitingCategory => "AwaitingCategory",
            Phase::BookSelected => "BookSelected",
            Phase::AwaitingQuantity => "AwaitingQuantity",
            Phase::AwaitingTopUpAmount => "AwaitingTopUpAmount",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Phase {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Idle" => Ok(Phase::Idle),
            "AwaitingQuery" => Ok(Phase::AwaitingQuery),
            "AwaitingCategory" => Ok(Phase::AwaitingCategory),
            "BookSelected" => Ok(Phase::BookSelected),
            "AwaitingQuantity" => Ok(Phase::AwaitingQuantity),
            "AwaitingTopUpAmount" => Ok(Phase::AwaitingTopUpAmount),
            other => Err(ParseError::UnknownPhase(other.to_string())),
        }
    }
}
