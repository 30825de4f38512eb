//! Transactional store for the bookshop.
//!
//! Every resource shared between users (book stock, user balance) is
//! changed by a single atomic conditional update; nothing is read, decided
//! on and written back in separate calls.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StorageError};
pub use memory::{FaultPoint, InMemoryStore};
pub use postgres::PostgresStore;
pub use store::{
    BookshopStore, CartStore, Catalog, ConversationStore, ConversationStoreExt, CreditOutcome,
    DebitOutcome, Inventory, Ledger, ReleaseOutcome, ReserveOutcome, UserDirectory,
};
