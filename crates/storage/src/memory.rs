use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use common::UserId;
use domain::{Book, CartItem, ConversationState, Money, User, VendorCode};
use tokio::sync::RwLock;

use crate::{
    Result, StorageError,
    store::{
        CartStore, Catalog, ConversationStore, CreditOutcome, DebitOutcome, Inventory, Ledger,
        ReleaseOutcome, ReserveOutcome, UserDirectory, record_update,
    },
};

const BACKEND: &str = "memory";

/// Operations that can be made to fail on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    Reserve,
    Release,
    CartAdd,
    CartRemove,
    CartClear,
    Debit,
    Credit,
    SaveConversation,
}

impl FaultPoint {
    fn bit(self) -> u32 {
        1 << self as u32
    }

    fn operation(self) -> &'static str {
        match self {
            FaultPoint::Reserve => "reserve",
            FaultPoint::Release => "release",
            FaultPoint::CartAdd => "cart add",
            FaultPoint::CartRemove => "cart remove",
            FaultPoint::CartClear => "cart clear",
            FaultPoint::Debit => "debit",
            FaultPoint::Credit => "credit",
            FaultPoint::SaveConversation => "conversation save",
        }
    }
}

/// In-memory store.
///
/// Each table sits behind its own lock and every operation takes exactly
/// one of them, so a check and the update it guards happen under the same
/// write guard. Used by tests and by the server when no database is
/// configured.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    books: Arc<RwLock<BTreeMap<VendorCode, Book>>>,
    users: Arc<RwLock<HashMap<UserId, User>>>,
    carts: Arc<RwLock<HashMap<UserId, Vec<CartItem>>>>,
    conversations: Arc<RwLock<HashMap<UserId, ConversationState>>>,
    faults: Arc<AtomicU32>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later call of `point` fail with `StorageError::Unavailable`.
    pub fn fail_on(&self, point: FaultPoint) {
        self.faults.fetch_or(point.bit(), Ordering::SeqCst);
    }

    /// Undoes `fail_on`.
    pub fn recover(&self, point: FaultPoint) {
        self.faults.fetch_and(!point.bit(), Ordering::SeqCst);
    }

    /// Returns the number of users with a conversation in progress.
    pub async fn conversation_count(&self) -> usize {
        self.conversations.read().await.len()
    }

    fn check(&self, point: FaultPoint) -> Result<()> {
        if self.faults.load(Ordering::SeqCst) & point.bit() != 0 {
            tracing::warn!(operation = point.operation(), "injected storage fault");
            return Err(StorageError::Unavailable(point.operation()));
        }
        Ok(())
    }
}

#[async_trait]
impl Catalog for InMemoryStore {
    async fn find_by_title(&self, title: &str) -> Result<Option<Book>> {
        let books = self.books.read().await;
        Ok(books.values().find(|b| b.title == title).cloned())
    }

    async fn find_by_author_prefix(&self, prefix: &str) -> Result<Vec<Book>> {
        let books = self.books.read().await;
        let mut found: Vec<Book> = books
            .values()
            .filter(|b| b.author.starts_with(prefix))
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            a.title
                .cmp(&b.title)
                .then_with(|| a.vendor_code.cmp(&b.vendor_code))
        });
        Ok(found)
    }

    async fn find_by_vendor_code(&self, vendor_code: &VendorCode) -> Result<Option<Book>> {
        Ok(self.books.read().await.get(vendor_code).cloned())
    }

    #[tracing::instrument(skip(self, book), fields(vendor_code = %book.vendor_code))]
    async fn upsert_book(&self, book: Book) -> Result<()> {
        self.books
            .write()
            .await
            .insert(book.vendor_code.clone(), book);
        Ok(())
    }
}

#[async_trait]
impl Inventory for InMemoryStore {
    #[tracing::instrument(skip(self))]
    async fn reserve(&self, vendor_code: &VendorCode, quantity: u32) -> Result<ReserveOutcome> {
        self.check(FaultPoint::Reserve)?;
        if quantity == 0 {
            return Err(StorageError::InvalidQuantity(quantity));
        }

        let mut books = self.books.write().await;
        let outcome = match books.get_mut(vendor_code) {
            None => ReserveOutcome::NotFound,
            Some(book) if book.stock < quantity => ReserveOutcome::InsufficientStock {
                available: book.stock,
            },
            Some(book) => {
                book.stock -= quantity;
                ReserveOutcome::Reserved {
                    remaining: book.stock,
                }
            }
        };
        record_update(BACKEND, "reserve", outcome.label());
        Ok(outcome)
    }

    #[tracing::instrument(skip(self))]
    async fn release(&self, vendor_code: &VendorCode, quantity: u32) -> Result<ReleaseOutcome> {
        self.check(FaultPoint::Release)?;

        let mut books = self.books.write().await;
        let Some(book) = books.get_mut(vendor_code) else {
            return Ok(ReleaseOutcome::NotFound);
        };
        book.stock = book
            .stock
            .checked_add(quantity)
            .ok_or(StorageError::InvalidQuantity(quantity))?;
        Ok(ReleaseOutcome::Released { stock: book.stock })
    }

    async fn stock_of(&self, vendor_code: &VendorCode) -> Result<Option<u32>> {
        Ok(self.books.read().await.get(vendor_code).map(|b| b.stock))
    }
}

#[async_trait]
impl Ledger for InMemoryStore {
    #[tracing::instrument(skip(self))]
    async fn debit(&self, user_id: UserId, amount: Money) -> Result<DebitOutcome> {
        self.check(FaultPoint::Debit)?;
        if amount.is_negative() {
            return Err(StorageError::InvalidAmount(amount));
        }

        let mut users = self.users.write().await;
        let outcome = match users.get_mut(&user_id) {
            None => DebitOutcome::NotFound,
            Some(user) => match user.balance.checked_sub(amount) {
                Some(balance) => {
                    user.balance = balance;
                    DebitOutcome::Debited { balance }
                }
                None => DebitOutcome::Insufficient {
                    balance: user.balance,
                },
            },
        };
        record_update(BACKEND, "debit", outcome.label());
        Ok(outcome)
    }

    #[tracing::instrument(skip(self))]
    async fn credit(&self, user_id: UserId, amount: Money) -> Result<CreditOutcome> {
        self.check(FaultPoint::Credit)?;
        if amount.is_negative() {
            return Err(StorageError::InvalidAmount(amount));
        }

        let mut users = self.users.write().await;
        let outcome = match users.get_mut(&user_id) {
            None => CreditOutcome::NotFound,
            Some(user) => match user.balance.checked_add(amount) {
                Some(balance) => {
                    user.balance = balance;
                    CreditOutcome::Credited { balance }
                }
                None => CreditOutcome::LimitExceeded {
                    balance: user.balance,
                },
            },
        };
        record_update(BACKEND, "credit", outcome.label());
        Ok(outcome)
    }

    async fn balance_of(&self, user_id: UserId) -> Result<Option<Money>> {
        Ok(self.users.read().await.get(&user_id).map(|u| u.balance))
    }
}

#[async_trait]
impl UserDirectory for InMemoryStore {
    #[tracing::instrument(skip(self))]
    async fn ensure_user(&self, user_id: UserId, chat_ref: i64) -> Result<User> {
        let mut users = self.users.write().await;
        let user = users
            .entry(user_id)
            .or_insert_with(|| User::new(user_id, chat_ref));
        user.chat_ref = chat_ref;
        Ok(user.clone())
    }

    async fn find_user(&self, user_id: UserId) -> Result<Option<User>> {
        Ok(self.users.read().await.get(&user_id).cloned())
    }
}

#[async_trait]
impl CartStore for InMemoryStore {
    #[tracing::instrument(skip(self, item), fields(user_id = %item.user_id, vendor_code = %item.vendor_code))]
    async fn add_item(&self, item: CartItem) -> Result<CartItem> {
        self.check(FaultPoint::CartAdd)?;
        if item.quantity == 0 {
            return Err(StorageError::InvalidQuantity(item.quantity));
        }

        let mut carts = self.carts.write().await;
        let lines = carts.entry(item.user_id).or_default();
        if let Some(existing) = lines
            .iter_mut()
            .find(|line| line.vendor_code == item.vendor_code)
        {
            existing.quantity = existing
                .quantity
                .checked_add(item.quantity)
                .ok_or(StorageError::InvalidQuantity(item.quantity))?;
            return Ok(existing.clone());
        }
        lines.push(item.clone());
        Ok(item)
    }

    #[tracing::instrument(skip(self))]
    async fn remove_item(
        &self,
        user_id: UserId,
        vendor_code: &VendorCode,
    ) -> Result<Option<CartItem>> {
        self.check(FaultPoint::CartRemove)?;

        let mut carts = self.carts.write().await;
        let Some(lines) = carts.get_mut(&user_id) else {
            return Ok(None);
        };
        let removed = lines
            .iter()
            .position(|line| &line.vendor_code == vendor_code)
            .map(|index| lines.remove(index));
        if lines.is_empty() {
            carts.remove(&user_id);
        }
        Ok(removed)
    }

    async fn list_items(&self, user_id: UserId) -> Result<Vec<CartItem>> {
        Ok(self
            .carts
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    #[tracing::instrument(skip(self))]
    async fn clear(&self, user_id: UserId) -> Result<u64> {
        self.check(FaultPoint::CartClear)?;
        let removed = self.carts.write().await.remove(&user_id);
        Ok(removed.map_or(0, |lines| lines.len() as u64))
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn load_conversation(&self, user_id: UserId) -> Result<Option<ConversationState>> {
        Ok(self.conversations.read().await.get(&user_id).cloned())
    }

    #[tracing::instrument(skip(self, state), fields(user_id = %state.user_id(), phase = %state.phase()))]
    async fn save_conversation(&self, state: &ConversationState) -> Result<()> {
        self.check(FaultPoint::SaveConversation)?;
        self.conversations
            .write()
            .await
            .insert(state.user_id(), state.clone());
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn clear_conversation(&self, user_id: UserId) -> Result<()> {
        self.conversations.write().await.remove(&user_id);
        Ok(())
    }
}
