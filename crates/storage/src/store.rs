use async_trait::async_trait;
use common::UserId;
use domain::{Book, CartItem, ConversationState, Money, User, VendorCode, cart_total};

use crate::{Result, StorageError};

/// Outcome of an attempt to take stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Stock was decremented; `remaining` is the count after the decrement.
    Reserved { remaining: u32 },
    /// Not enough stock at decision time; nothing was changed.
    InsufficientStock { available: u32 },
    /// No book with that vendor code.
    NotFound,
}

/// Outcome of returning stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released { stock: u32 },
    NotFound,
}

/// Outcome of a balance debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    /// Balance was decremented; `balance` is the new value.
    Debited { balance: Money },
    /// Balance was below the amount; nothing was changed.
    Insufficient { balance: Money },
    /// No user with that ID.
    NotFound,
}

/// Outcome of a balance credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditOutcome {
    Credited { balance: Money },
    /// The new balance would not fit; nothing was changed.
    LimitExceeded { balance: Money },
    NotFound,
}

impl ReserveOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ReserveOutcome::Reserved { .. } => "reserved",
            ReserveOutcome::InsufficientStock { .. } => "insufficient_stock",
            ReserveOutcome::NotFound => "not_found",
        }
    }
}

impl DebitOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            DebitOutcome::Debited { .. } => "debited",
            DebitOutcome::Insufficient { .. } => "insufficient_balance",
            DebitOutcome::NotFound => "not_found",
        }
    }
}

impl CreditOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CreditOutcome::Credited { .. } => "credited",
            CreditOutcome::LimitExceeded { .. } => "limit_exceeded",
            CreditOutcome::NotFound => "not_found",
        }
    }
}

/// Counts one guarded stock or balance update by backend, operation and
/// outcome.
pub(crate) fn record_update(backend: &'static str, op: &'static str, outcome: &'static str) {
    metrics::counter!(
        "store_updates_total",
        "backend" => backend,
        "op" => op,
        "outcome" => outcome
    )
    .increment(1);
}

/// Read access to the book catalog.
///
/// Lookups never fail for a missing book; absence is an empty result.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Exact title match. If several books share a title the lowest vendor
    /// code wins.
    async fn find_by_title(&self, title: &str) -> Result<Option<Book>>;

    /// Case-sensitive author prefix match, ordered by title then vendor code.
    async fn find_by_author_prefix(&self, prefix: &str) -> Result<Vec<Book>>;

    /// Exact vendor code match.
    async fn find_by_vendor_code(&self, vendor_code: &VendorCode) -> Result<Option<Book>>;

    /// Inserts or replaces a book. Catalog ingestion only; the order flow
    /// never calls this.
    async fn upsert_book(&self, book: Book) -> Result<()>;
}

/// Authoritative stock counts.
#[async_trait]
pub trait Inventory: Send + Sync {
    /// Checks `stock >= quantity` and decrements in one atomic step.
    async fn reserve(&self, vendor_code: &VendorCode, quantity: u32) -> Result<ReserveOutcome>;

    /// Increments stock in one atomic step.
    async fn release(&self, vendor_code: &VendorCode, quantity: u32) -> Result<ReleaseOutcome>;

    /// Reads the current stock.
    async fn stock_of(&self, vendor_code: &VendorCode) -> Result<Option<u32>>;
}

/// Per-user spendable balances.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Checks `balance >= amount` and decrements in one atomic step.
    async fn debit(&self, user_id: UserId, amount: Money) -> Result<DebitOutcome>;

    /// Increments the balance in one atomic step.
    async fn credit(&self, user_id: UserId, amount: Money) -> Result<CreditOutcome>;

    async fn balance_of(&self, user_id: UserId) -> Result<Option<Money>>;
}

/// User records.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Creates the user with an empty balance if absent. Idempotent; an
    /// existing user keeps its balance and gets the new chat handle.
    async fn ensure_user(&self, user_id: UserId, chat_ref: i64) -> Result<User>;

    async fn find_user(&self, user_id: UserId) -> Result<Option<User>>;
}

/// Per-user cart lines. Cart operations never touch stock.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Adds a line, merging into an existing line for the same book.
    ///
    /// A merged line keeps its original unit price. Returns the stored line.
    async fn add_item(&self, item: CartItem) -> Result<CartItem>;

    /// Removes a line, returning it if it existed.
    async fn remove_item(&self, user_id: UserId, vendor_code: &VendorCode)
    -> Result<Option<CartItem>>;

    /// Lines in the order they were first reserved.
    async fn list_items(&self, user_id: UserId) -> Result<Vec<CartItem>>;

    /// Sum of `quantity * unit_price` over the current lines.
    async fn total_price(&self, user_id: UserId) -> Result<Money> {
        cart_total(&self.list_items(user_id).await?)
            .ok_or_else(|| StorageError::Overflow(format!("cart total of user {user_id}")))
    }

    /// Removes every line of the user, returning how many were removed.
    async fn clear(&self, user_id: UserId) -> Result<u64>;
}

/// Persisted conversation states, at most one per user.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn load_conversation(&self, user_id: UserId) -> Result<Option<ConversationState>>;

    async fn save_conversation(&self, state: &ConversationState) -> Result<()>;

    async fn clear_conversation(&self, user_id: UserId) -> Result<()>;
}

/// Extension trait providing conversation lifecycle helpers.
#[async_trait]
pub trait ConversationStoreExt: ConversationStore {
    /// Loads the user's conversation, or a fresh idle one.
    async fn conversation_or_idle(&self, user_id: UserId) -> Result<ConversationState> {
        Ok(self
            .load_conversation(user_id)
            .await?
            .unwrap_or_else(|| ConversationState::new(user_id)))
    }

    /// Stores a conversation in progress; an idle one is deleted instead.
    async fn persist_conversation(&self, state: &ConversationState) -> Result<()> {
        if state.is_idle() {
            self.clear_conversation(state.user_id()).await
        } else {
            self.save_conversation(state).await
        }
    }
}

// Blanket implementation for all ConversationStore implementations
impl<T: ConversationStore + ?Sized> ConversationStoreExt for T {}

/// Everything the order flow needs from storage.
pub trait BookshopStore:
    Catalog + Inventory + Ledger + UserDirectory + CartStore + ConversationStore
{
}

impl<T> BookshopStore for T where
    T: Catalog + Inventory + Ledger + UserDirectory + CartStore + ConversationStore + ?Sized
{
}
