//! Conversation state record and its transitions.

use chrono::{DateTime, Utc};
use common::UserId;
use serde::{Deserialize, Serialize};

use super::Phase;
use crate::book::Book;
use crate::error::ConversationError;
use crate::quantity::{QuantityStep, clamp_quantity};
use crate::value_objects::VendorCode;

/// Where a user is in the multi-step flow, plus the data gathered so far.
///
/// The phase decides which pending fields are meaningful; every transition
/// clears the fields the next phase does not use. `pending_quantity` is the
/// only source of the picker value, replies are rendered from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    user_id: UserId,
    phase: Phase,
    pending_search_text: Option<String>,
    pending_book: Option<Book>,
    pending_quantity: Option<u32>,
    updated_at: DateTime<Utc>,
}

impl ConversationState {
    /// Creates an idle conversation for a user.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            phase: Phase::Idle,
            pending_search_text: None,
            pending_book: None,
            pending_quantity: None,
            updated_at: Utc::now(),
        }
    }

    /// Rebuilds a conversation from stored fields.
    ///
    /// Fields the phase does not use are dropped. A picker phase without a
    /// book cannot continue and falls back to `Idle`.
    pub fn restore(
        user_id: UserId,
        phase: Phase,
        pending_search_text: Option<String>,
        pending_book: Option<Book>,
        pending_quantity: Option<u32>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        let mut state = Self {
            user_id,
            phase,
            pending_search_text: None,
            pending_book: None,
            pending_quantity: None,
            updated_at,
        };

        match phase {
            Phase::AwaitingCategory => match pending_search_text {
                Some(text) => state.pending_search_text = Some(text),
                None => state.phase = Phase::Idle,
            },
            Phase::BookSelected => state.pending_book = pending_book,
            Phase::AwaitingQuantity => match pending_book {
                Some(book) => {
                    state.pending_quantity =
                        Some(clamp_quantity(i64::from(pending_quantity.unwrap_or(1)), book.stock));
                    state.pending_book = Some(book);
                }
                None => state.phase = Phase::Idle,
            },
            Phase::Idle | Phase::AwaitingQuery | Phase::AwaitingTopUpAmount => {}
        }

        state
    }
}

// Query methods
impl ConversationState {
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn pending_search_text(&self) -> Option<&str> {
        self.pending_search_text.as_deref()
    }

    pub fn pending_book(&self) -> Option<&Book> {
        self.pending_book.as_ref()
    }

    pub fn pending_quantity(&self) -> Option<u32> {
        self.pending_quantity
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_idle(&self) -> bool {
        self.phase.is_idle()
    }

    /// Returns the stored search text when a category choice is expected.
    pub fn search_request(&self) -> Result<&str, ConversationError> {
        self.ensure(self.phase.accepts_category(), "choose a search category")?;
        self.pending_search_text
            .as_deref()
            .ok_or(ConversationError::StateMismatch {
                phase: self.phase,
                action: "choose a search category",
            })
    }

    /// Returns the book and quantity a confirm would reserve.
    pub fn pending_reservation(&self) -> Result<(&Book, u32), ConversationError> {
        self.ensure(self.phase.accepts_quantity_actions(), "confirm a quantity")?;
        match (&self.pending_book, self.pending_quantity) {
            (Some(book), Some(quantity)) => Ok((book, quantity)),
            _ => Err(ConversationError::StateMismatch {
                phase: self.phase,
                action: "confirm a quantity",
            }),
        }
    }

    /// Checks that a picker button was rendered for the book now in the
    /// picker. Buttons on an older picker message are refused.
    pub fn ensure_picker_for(
        &self,
        vendor_code: &VendorCode,
        action: &'static str,
    ) -> Result<(), ConversationError> {
        self.ensure(self.phase.accepts_quantity_actions(), action)?;
        match &self.pending_book {
            Some(book) if &book.vendor_code == vendor_code => Ok(()),
            Some(book) => Err(ConversationError::BookMismatch {
                pending: book.vendor_code.clone(),
                requested: vendor_code.clone(),
            }),
            None => Err(ConversationError::StateMismatch {
                phase: self.phase,
                action,
            }),
        }
    }

    /// Checks that a top-up amount is expected.
    pub fn expect_top_up_amount(&self) -> Result<(), ConversationError> {
        self.ensure(self.phase.accepts_top_up_amount(), "top up the balance")
    }
}

// Transition methods
impl ConversationState {
    /// Abandons any flow in progress.
    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.pending_search_text = None;
        self.pending_book = None;
        self.pending_quantity = None;
        self.touch();
    }

    /// Starts a new search from any phase.
    ///
    /// With non-blank text the query is stored right away, otherwise the
    /// next text message is awaited.
    pub fn start_search(&mut self, query: Option<&str>) {
        self.reset();
        match query.map(str::trim).filter(|q| !q.is_empty()) {
            Some(text) => {
                self.phase = Phase::AwaitingCategory;
                self.pending_search_text = Some(text.to_string());
            }
            None => self.phase = Phase::AwaitingQuery,
        }
    }

    /// Stores the search text typed after `/request`.
    pub fn receive_query(&mut self, text: &str) -> Result<(), ConversationError> {
        self.ensure(self.phase.accepts_query_text(), "enter search text")?;
        let text = text.trim();
        if text.is_empty() {
            return Err(ConversationError::EmptyQuery);
        }
        self.phase = Phase::AwaitingCategory;
        self.pending_search_text = Some(text.to_string());
        self.touch();
        Ok(())
    }

    /// Records the catalog lookup result for the stored search text.
    ///
    /// No match returns to `Idle`. One match selects that book. Several
    /// matches leave the choice to the quantity request, which names the book.
    pub fn resolve_search(&mut self, matches: &[Book]) -> Result<(), ConversationError> {
        self.ensure(self.phase.accepts_category(), "choose a search category")?;
        match matches {
            [] => self.reset(),
            [book] => {
                self.phase = Phase::BookSelected;
                self.pending_search_text = None;
                self.pending_book = Some(book.clone());
                self.touch();
            }
            _ => {
                self.phase = Phase::BookSelected;
                self.pending_search_text = None;
                self.pending_book = None;
                self.touch();
            }
        }
        Ok(())
    }

    /// Opens the quantity picker for a freshly re-read book.
    ///
    /// Returns the initial quantity, always 1.
    pub fn request_quantity(&mut self, current: Book) -> Result<u32, ConversationError> {
        self.ensure(self.phase.accepts_quantity_request(), "choose a quantity")?;
        if let Some(pending) = &self.pending_book
            && pending.vendor_code != current.vendor_code
        {
            return Err(ConversationError::BookMismatch {
                pending: pending.vendor_code.clone(),
                requested: current.vendor_code,
            });
        }
        if !current.is_in_stock() {
            return Err(ConversationError::OutOfStock {
                vendor_code: current.vendor_code,
            });
        }

        self.phase = Phase::AwaitingQuantity;
        self.pending_book = Some(current);
        self.pending_quantity = Some(1);
        self.touch();
        Ok(1)
    }

    /// Applies a picker step against the book's current stock.
    ///
    /// Returns true if the quantity changed.
    pub fn step_quantity(
        &mut self,
        step: QuantityStep,
        current: Book,
    ) -> Result<bool, ConversationError> {
        self.ensure_picker_for(&current.vendor_code, "change the quantity")?;
        if !current.is_in_stock() {
            return Err(ConversationError::OutOfStock {
                vendor_code: current.vendor_code,
            });
        }

        let before = self.pending_quantity.unwrap_or(1);
        let after = step.apply(before, current.stock);
        self.pending_book = Some(current);
        self.pending_quantity = Some(after);
        self.touch();
        Ok(after != before)
    }

    /// Pulls the pending quantity down to what the store reported available.
    ///
    /// Returns the new quantity.
    pub fn clamp_to_available(&mut self, available: u32) -> Result<u32, ConversationError> {
        self.ensure(self.phase.accepts_quantity_actions(), "change the quantity")?;
        let book = self
            .pending_book
            .as_mut()
            .ok_or(ConversationError::StateMismatch {
                phase: self.phase,
                action: "change the quantity",
            })?;
        if available == 0 {
            return Err(ConversationError::OutOfStock {
                vendor_code: book.vendor_code.clone(),
            });
        }
        book.stock = available;
        let quantity = clamp_quantity(i64::from(self.pending_quantity.unwrap_or(1)), available);
        self.pending_quantity = Some(quantity);
        self.touch();
        Ok(quantity)
    }

    /// Waits for a top-up amount.
    pub fn request_top_up(&mut self) -> Result<(), ConversationError> {
        self.ensure(self.phase.accepts_top_up_request(), "top up the balance")?;
        self.phase = Phase::AwaitingTopUpAmount;
        self.touch();
        Ok(())
    }

    /// Returns the vendor code of the book currently in the picker, if any.
    pub fn pending_vendor_code(&self) -> Option<&VendorCode> {
        self.pending_book.as_ref().map(|book| &book.vendor_code)
    }

    fn ensure(&self, accepted: bool, action: &'static str) -> Result<(), ConversationError> {
        if accepted {
            Ok(())
        } else {
            Err(ConversationError::StateMismatch {
                phase: self.phase,
                action,
            })
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_objects::Money;

    fn book(code: &str, stock: u32) -> Book {
        Book::new(code, "Dune", "Frank Herbert", "Sci-Fi", Money::from_units(20), stock)
    }

    fn user() -> UserId {
        UserId::new(1)
    }

    fn in_picker(stock: u32) -> ConversationState {
        let mut state = ConversationState::new(user());
        state.start_search(Some("Dune"));
        state.resolve_search(&[book("V1", stock)]).unwrap();
        state.request_quantity(book("V1", stock)).unwrap();
        state
    }

    #[test]
    fn test_new_conversation_is_idle() {
        let state = ConversationState::new(user());
        assert!(state.is_idle());
        assert!(state.pending_book().is_none());
        assert!(state.pending_quantity().is_none());
    }

    #[test]
    fn test_search_without_text_waits_for_query() {
        let mut state = ConversationState::new(user());
        state.start_search(None);
        assert_eq!(state.phase(), Phase::AwaitingQuery);

        state.receive_query("  Dune ").unwrap();
        assert_eq!(state.phase(), Phase::AwaitingCategory);
        assert_eq!(state.search_request().unwrap(), "Dune");
    }

    #[test]
    fn test_search_with_text_skips_query_step() {
        let mut state = ConversationState::new(user());
        state.start_search(Some("ABC123"));
        assert_eq!(state.phase(), Phase::AwaitingCategory);
        assert_eq!(state.pending_search_text(), Some("ABC123"));
    }

    #[test]
    fn test_blank_query_is_rejected() {
        let mut state = ConversationState::new(user());
        state.start_search(Some("   "));
        assert_eq!(state.phase(), Phase::AwaitingQuery);
        assert_eq!(state.receive_query(" "), Err(ConversationError::EmptyQuery));
        assert_eq!(state.phase(), Phase::AwaitingQuery);
    }

    #[test]
    fn test_no_match_returns_to_idle() {
        let mut state = ConversationState::new(user());
        state.start_search(Some("ABC123"));
        state.resolve_search(&[]).unwrap();
        assert!(state.is_idle());
        assert!(state.pending_search_text().is_none());
    }

    #[test]
    fn test_single_match_selects_book() {
        let mut state = ConversationState::new(user());
        state.start_search(Some("Dune"));
        state.resolve_search(&[book("V1", 3)]).unwrap();
        assert_eq!(state.phase(), Phase::BookSelected);
        assert_eq!(state.pending_vendor_code(), Some(&VendorCode::new("V1")));
        assert!(state.pending_search_text().is_none());
    }

    #[test]
    fn test_several_matches_defer_the_choice() {
        let mut state = ConversationState::new(user());
        state.start_search(Some("Frank"));
        state
            .resolve_search(&[book("V1", 3), book("V2", 1)])
            .unwrap();
        assert_eq!(state.phase(), Phase::BookSelected);
        assert!(state.pending_book().is_none());

        assert_eq!(state.request_quantity(book("V2", 1)).unwrap(), 1);
        assert_eq!(state.pending_vendor_code(), Some(&VendorCode::new("V2")));
    }

    #[test]
    fn test_quantity_request_for_other_book_is_rejected() {
        let mut state = ConversationState::new(user());
        state.start_search(Some("Dune"));
        state.resolve_search(&[book("V1", 3)]).unwrap();
        assert!(matches!(
            state.request_quantity(book("V9", 3)),
            Err(ConversationError::BookMismatch { .. })
        ));
        assert_eq!(state.phase(), Phase::BookSelected);
    }

    #[test]
    fn test_picker_buttons_must_name_the_pending_book() {
        let mut state = in_picker(5);
        assert_eq!(state.ensure_picker_for(&VendorCode::new("V1"), "confirm a quantity"), Ok(()));
        assert_eq!(
            state.ensure_picker_for(&VendorCode::new("V3"), "confirm a quantity"),
            Err(ConversationError::BookMismatch {
                pending: VendorCode::new("V1"),
                requested: VendorCode::new("V3"),
            })
        );
        assert!(matches!(
            state.step_quantity(QuantityStep::PlusOne, book("V3", 5)),
            Err(ConversationError::BookMismatch { .. })
        ));
        assert_eq!(state.pending_quantity(), Some(1));

        state.reset();
        assert!(matches!(
            state.ensure_picker_for(&VendorCode::new("V1"), "confirm a quantity"),
            Err(ConversationError::StateMismatch { .. })
        ));
    }

    #[test]
    fn test_out_of_stock_book_gets_no_picker() {
        let mut state = ConversationState::new(user());
        state.start_search(Some("Dune"));
        state.resolve_search(&[book("V1", 0)]).unwrap();
        assert!(matches!(
            state.request_quantity(book("V1", 0)),
            Err(ConversationError::OutOfStock { .. })
        ));
        assert_eq!(state.phase(), Phase::BookSelected);
    }

    #[test]
    fn test_picker_starts_at_one() {
        let state = in_picker(5);
        assert_eq!(state.phase(), Phase::AwaitingQuantity);
        assert_eq!(state.pending_quantity(), Some(1));
    }

    #[test]
    fn test_steps_clamp_to_current_stock() {
        let mut state = in_picker(5);
        assert!(state.step_quantity(QuantityStep::PlusFive, book("V1", 5)).unwrap());
        assert_eq!(state.pending_quantity(), Some(5));

        assert!(!state.step_quantity(QuantityStep::PlusOne, book("V1", 5)).unwrap());
        assert_eq!(state.pending_quantity(), Some(5));

        // stock dropped to 2 between steps
        assert!(state.step_quantity(QuantityStep::PlusOne, book("V1", 2)).unwrap());
        assert_eq!(state.pending_quantity(), Some(2));
        assert_eq!(state.pending_book().unwrap().stock, 2);

        state.step_quantity(QuantityStep::MinusFive, book("V1", 2)).unwrap();
        assert!(!state.step_quantity(QuantityStep::MinusOne, book("V1", 2)).unwrap());
        assert_eq!(state.pending_quantity(), Some(1));
    }

    #[test]
    fn test_pending_reservation_reflects_picker() {
        let mut state = in_picker(4);
        state.step_quantity(QuantityStep::PlusOne, book("V1", 4)).unwrap();
        let (pending, quantity) = state.pending_reservation().unwrap();
        assert_eq!(pending.vendor_code.as_str(), "V1");
        assert_eq!(quantity, 2);
    }

    #[test]
    fn test_clamp_to_available_after_failed_reservation() {
        let mut state = in_picker(5);
        state.step_quantity(QuantityStep::PlusFive, book("V1", 5)).unwrap();
        assert_eq!(state.clamp_to_available(3).unwrap(), 3);
        assert_eq!(state.phase(), Phase::AwaitingQuantity);
        assert!(matches!(
            state.clamp_to_available(0),
            Err(ConversationError::OutOfStock { .. })
        ));
    }

    #[test]
    fn test_quantity_actions_rejected_outside_picker() {
        let mut state = ConversationState::new(user());
        assert!(matches!(
            state.step_quantity(QuantityStep::PlusOne, book("V1", 5)),
            Err(ConversationError::StateMismatch { phase: Phase::Idle, .. })
        ));
        assert!(state.pending_reservation().is_err());
        assert!(state.search_request().is_err());
        assert!(state.is_idle());
    }

    #[test]
    fn test_new_search_abandons_picker() {
        let mut state = in_picker(5);
        state.start_search(None);
        assert_eq!(state.phase(), Phase::AwaitingQuery);
        assert!(state.pending_book().is_none());
        assert!(state.pending_quantity().is_none());
    }

    #[test]
    fn test_top_up_only_from_idle() {
        let mut state = ConversationState::new(user());
        state.request_top_up().unwrap();
        assert!(state.expect_top_up_amount().is_ok());

        let mut busy = in_picker(2);
        assert!(busy.request_top_up().is_err());
        assert_eq!(busy.phase(), Phase::AwaitingQuantity);
    }

    #[test]
    fn test_restore_drops_fields_the_phase_does_not_use() {
        let restored = ConversationState::restore(
            user(),
            Phase::BookSelected,
            Some("stale".to_string()),
            Some(book("V1", 3)),
            Some(9),
            Utc::now(),
        );
        assert!(restored.pending_search_text().is_none());
        assert!(restored.pending_quantity().is_none());
        assert!(restored.pending_book().is_some());
    }

    #[test]
    fn test_restore_picker_without_book_falls_back_to_idle() {
        let restored =
            ConversationState::restore(user(), Phase::AwaitingQuantity, None, None, Some(2), Utc::now());
        assert!(restored.is_idle());
    }

    #[test]
    fn test_restore_clamps_quantity_to_snapshot_stock() {
        let restored = ConversationState::restore(
            user(),
            Phase::AwaitingQuantity,
            None,
            Some(book("V1", 3)),
            Some(7),
            Utc::now(),
        );
        assert_eq!(restored.pending_quantity(), Some(3));
    }
}
