use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::UserId;
use domain::{Book, CartItem, ConversationState, Money, Phase, User, VendorCode};
use sqlx::{PgPool, Row, postgres::PgPoolOptions, postgres::PgRow};

use crate::{
    Result, StorageError,
    store::{
        CartStore, Catalog, ConversationStore, CreditOutcome, DebitOutcome, Inventory, Ledger,
        ReleaseOutcome, ReserveOutcome, UserDirectory, record_update,
    },
};

const BACKEND: &str = "postgres";

/// SQLSTATE `numeric_value_out_of_range`.
const OUT_OF_RANGE: &str = "22003";

const BOOK_COLUMNS: &str = "vendor_code, title, author, genre, price_cents, stock";
const CART_COLUMNS: &str = "user_id, vendor_code, title, quantity, unit_price_cents, reserved_at";

/// PostgreSQL-backed store.
///
/// Stock and balance changes are single `UPDATE ... WHERE <guard> RETURNING`
/// statements, so the check and the write are one atomic step in the
/// database no matter how many callers race.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool to `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_book(row: PgRow) -> Result<Book> {
        Ok(Book {
            vendor_code: VendorCode::new(row.try_get::<String, _>("vendor_code")?),
            title: row.try_get("title")?,
            author: row.try_get("author")?,
            genre: row.try_get("genre")?,
            price: Money::from_cents(row.try_get("price_cents")?),
            stock: to_u32(row.try_get("stock")?, "books.stock")?,
        })
    }

    fn row_to_cart_item(row: PgRow) -> Result<CartItem> {
        Ok(CartItem {
            user_id: UserId::new(row.try_get("user_id")?),
            vendor_code: VendorCode::new(row.try_get::<String, _>("vendor_code")?),
            title: row.try_get("title")?,
            quantity: to_u32(row.try_get("quantity")?, "cart_items.quantity")?,
            unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
            reserved_at: row.try_get("reserved_at")?,
        })
    }

    fn row_to_user(row: PgRow) -> Result<User> {
        Ok(User {
            id: UserId::new(row.try_get("id")?),
            balance: Money::from_cents(row.try_get("balance_cents")?),
            chat_ref: row.try_get("chat_ref")?,
        })
    }
}

fn to_u32(value: i32, column: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| StorageError::Corrupt(format!("{column} = {value}")))
}

fn to_i32(quantity: u32) -> Result<i32> {
    i32::try_from(quantity).map_err(|_| StorageError::InvalidQuantity(quantity))
}

/// Escapes LIKE wildcards so the text matches literally as a prefix.
fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[async_trait]
impl Catalog for PostgresStore {
    async fn find_by_title(&self, title: &str) -> Result<Option<Book>> {
        let row = sqlx::query(&format!(
            "SELECT {BOOK_COLUMNS} FROM books WHERE title = $1 ORDER BY vendor_code LIMIT 1"
        ))
        .bind(title)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_book).transpose()
    }

    async fn find_by_author_prefix(&self, prefix: &str) -> Result<Vec<Book>> {
        let rows = sqlx::query(&format!(
            "SELECT {BOOK_COLUMNS} FROM books WHERE author LIKE $1 ORDER BY title, vendor_code"
        ))
        .bind(like_prefix(prefix))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_book).collect()
    }

    async fn find_by_vendor_code(&self, vendor_code: &VendorCode) -> Result<Option<Book>> {
        let row = sqlx::query(&format!(
            "SELECT {BOOK_COLUMNS} FROM books WHERE vendor_code = $1"
        ))
        .bind(vendor_code.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_book).transpose()
    }

    #[tracing::instrument(skip(self, book), fields(vendor_code = %book.vendor_code))]
    async fn upsert_book(&self, book: Book) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO books (vendor_code, title, author, genre, price_cents, stock)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (vendor_code) DO UPDATE SET
                title = EXCLUDED.title,
                author = EXCLUDED.author,
                genre = EXCLUDED.genre,
                price_cents = EXCLUDED.price_cents,
                stock = EXCLUDED.stock
            "#,
        )
        .bind(book.vendor_code.as_str())
        .bind(&book.title)
        .bind(&book.author)
        .bind(&book.genre)
        .bind(book.price.cents())
        .bind(to_i32(book.stock)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl Inventory for PostgresStore {
    #[tracing::instrument(skip(self))]
    async fn reserve(&self, vendor_code: &VendorCode, quantity: u32) -> Result<ReserveOutcome> {
        if quantity == 0 {
            return Err(StorageError::InvalidQuantity(quantity));
        }
        let quantity = to_i32(quantity)?;

        let remaining: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE books SET stock = stock - $2
            WHERE vendor_code = $1 AND stock >= $2
            RETURNING stock
            "#,
        )
        .bind(vendor_code.as_str())
        .bind(quantity)
        .fetch_optional(&self.pool)
        .await?;

        let outcome = match remaining {
            Some(remaining) => ReserveOutcome::Reserved {
                remaining: to_u32(remaining, "books.stock")?,
            },
            // The guard refused; report why. This read does not decide anything.
            None => match self.stock_of(vendor_code).await? {
                Some(available) => ReserveOutcome::InsufficientStock { available },
                None => ReserveOutcome::NotFound,
            },
        };
        record_update(BACKEND, "reserve", outcome.label());
        Ok(outcome)
    }

    #[tracing::instrument(skip(self))]
    async fn release(&self, vendor_code: &VendorCode, quantity: u32) -> Result<ReleaseOutcome> {
        let stock: Option<i32> = sqlx::query_scalar(
            "UPDATE books SET stock = stock + $2 WHERE vendor_code = $1 RETURNING stock",
        )
        .bind(vendor_code.as_str())
        .bind(to_i32(quantity)?)
        .fetch_optional(&self.pool)
        .await?;

        match stock {
            Some(stock) => Ok(ReleaseOutcome::Released {
                stock: to_u32(stock, "books.stock")?,
            }),
            None => Ok(ReleaseOutcome::NotFound),
        }
    }

    async fn stock_of(&self, vendor_code: &VendorCode) -> Result<Option<u32>> {
        let stock: Option<i32> = sqlx::query_scalar("SELECT stock FROM books WHERE vendor_code = $1")
            .bind(vendor_code.as_str())
            .fetch_optional(&self.pool)
            .await?;

        stock.map(|s| to_u32(s, "books.stock")).transpose()
    }
}

#[async_trait]
impl Ledger for PostgresStore {
    #[tracing::instrument(skip(self))]
    async fn debit(&self, user_id: UserId, amount: Money) -> Result<DebitOutcome> {
        if amount.is_negative() {
            return Err(StorageError::InvalidAmount(amount));
        }

        let balance: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE users SET balance_cents = balance_cents - $2
            WHERE id = $1 AND balance_cents >= $2
            RETURNING balance_cents
            "#,
        )
        .bind(user_id.as_i64())
        .bind(amount.cents())
        .fetch_optional(&self.pool)
        .await?;

        let outcome = match balance {
            Some(balance) => DebitOutcome::Debited {
                balance: Money::from_cents(balance),
            },
            None => match self.balance_of(user_id).await? {
                Some(balance) => DebitOutcome::Insufficient { balance },
                None => DebitOutcome::NotFound,
            },
        };
        record_update(BACKEND, "debit", outcome.label());
        Ok(outcome)
    }

    #[tracing::instrument(skip(self))]
    async fn credit(&self, user_id: UserId, amount: Money) -> Result<CreditOutcome> {
        if amount.is_negative() {
            return Err(StorageError::InvalidAmount(amount));
        }

        let updated: std::result::Result<Option<i64>, sqlx::Error> = sqlx::query_scalar(
            "UPDATE users SET balance_cents = balance_cents + $2 WHERE id = $1 RETURNING balance_cents",
        )
        .bind(user_id.as_i64())
        .bind(amount.cents())
        .fetch_optional(&self.pool)
        .await;

        let outcome = match updated {
            Ok(Some(balance)) => CreditOutcome::Credited {
                balance: Money::from_cents(balance),
            },
            Ok(None) => CreditOutcome::NotFound,
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some(OUT_OF_RANGE) => {
                match self.balance_of(user_id).await? {
                    Some(balance) => CreditOutcome::LimitExceeded { balance },
                    None => CreditOutcome::NotFound,
                }
            }
            Err(e) => return Err(e.into()),
        };
        record_update(BACKEND, "credit", outcome.label());
        Ok(outcome)
    }

    async fn balance_of(&self, user_id: UserId) -> Result<Option<Money>> {
        let balance: Option<i64> =
            sqlx::query_scalar("SELECT balance_cents FROM users WHERE id = $1")
                .bind(user_id.as_i64())
                .fetch_optional(&self.pool)
                .await?;

        Ok(balance.map(Money::from_cents))
    }
}

#[async_trait]
impl UserDirectory for PostgresStore {
    #[tracing::instrument(skip(self))]
    async fn ensure_user(&self, user_id: UserId, chat_ref: i64) -> Result<User> {
        let row = sqlx::query(
            r#"
            INSERT INTO users (id, chat_ref) VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET chat_ref = EXCLUDED.chat_ref
            RETURNING id, balance_cents, chat_ref
            "#,
        )
        .bind(user_id.as_i64())
        .bind(chat_ref)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_user(row)
    }

    async fn find_user(&self, user_id: UserId) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, balance_cents, chat_ref FROM users WHERE id = $1")
            .bind(user_id.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_user).transpose()
    }
}

#[async_trait]
impl CartStore for PostgresStore {
    #[tracing::instrument(skip(self, item), fields(user_id = %item.user_id, vendor_code = %item.vendor_code))]
    async fn add_item(&self, item: CartItem) -> Result<CartItem> {
        if item.quantity == 0 {
            return Err(StorageError::InvalidQuantity(item.quantity));
        }

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO cart_items ({CART_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, vendor_code) DO UPDATE SET
                quantity = cart_items.quantity + EXCLUDED.quantity
            RETURNING {CART_COLUMNS}
            "#
        ))
        .bind(item.user_id.as_i64())
        .bind(item.vendor_code.as_str())
        .bind(&item.title)
        .bind(to_i32(item.quantity)?)
        .bind(item.unit_price.cents())
        .bind(item.reserved_at)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_cart_item(row)
    }

    #[tracing::instrument(skip(self))]
    async fn remove_item(
        &self,
        user_id: UserId,
        vendor_code: &VendorCode,
    ) -> Result<Option<CartItem>> {
        let row = sqlx::query(&format!(
            "DELETE FROM cart_items WHERE user_id = $1 AND vendor_code = $2 RETURNING {CART_COLUMNS}"
        ))
        .bind(user_id.as_i64())
        .bind(vendor_code.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_cart_item).transpose()
    }

    async fn list_items(&self, user_id: UserId) -> Result<Vec<CartItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {CART_COLUMNS} FROM cart_items WHERE user_id = $1 ORDER BY reserved_at, vendor_code"
        ))
        .bind(user_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_cart_item).collect()
    }

    async fn total_price(&self, user_id: UserId) -> Result<Money> {
        let cents: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(quantity::BIGINT * unit_price_cents), 0)::BIGINT
            FROM cart_items WHERE user_id = $1
            "#,
        )
        .bind(user_id.as_i64())
        .fetch_one(&self.pool)
        .await?;

        Ok(Money::from_cents(cents))
    }

    #[tracing::instrument(skip(self))]
    async fn clear(&self, user_id: UserId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
            .bind(user_id.as_i64())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ConversationStore for PostgresStore {
    async fn load_conversation(&self, user_id: UserId) -> Result<Option<ConversationState>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT phase, pending_search_text, pending_book, pending_quantity, updated_at
            FROM conversation_state
            WHERE user_id = $1
            "#,
        )
        .bind(user_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let phase: Phase = row
            .try_get::<String, _>("phase")?
            .parse()
            .map_err(|e: domain::ParseError| StorageError::Corrupt(e.to_string()))?;
        let pending_book: Option<Book> = row
            .try_get::<Option<serde_json::Value>, _>("pending_book")?
            .map(serde_json::from_value)
            .transpose()?;
        let pending_quantity = row
            .try_get::<Option<i32>, _>("pending_quantity")?
            .map(|q| to_u32(q, "conversation_state.pending_quantity"))
            .transpose()?;

        Ok(Some(ConversationState::restore(
            user_id,
            phase,
            row.try_get("pending_search_text")?,
            pending_book,
            pending_quantity,
            row.try_get::<DateTime<Utc>, _>("updated_at")?,
        )))
    }

    #[tracing::instrument(skip(self, state), fields(user_id = %state.user_id(), phase = %state.phase()))]
    async fn save_conversation(&self, state: &ConversationState) -> Result<()> {
        let pending_book = state.pending_book().map(serde_json::to_value).transpose()?;
        let pending_quantity = state.pending_quantity().map(to_i32).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO conversation_state
                (user_id, phase, pending_search_text, pending_vendor_code, pending_book, pending_quantity, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id) DO UPDATE SET
                phase = EXCLUDED.phase,
                pending_search_text = EXCLUDED.pending_search_text,
                pending_vendor_code = EXCLUDED.pending_vendor_code,
                pending_book = EXCLUDED.pending_book,
                pending_quantity = EXCLUDED.pending_quantity,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(state.user_id().as_i64())
        .bind(state.phase().as_str())
        .bind(state.pending_search_text())
        .bind(state.pending_vendor_code().map(VendorCode::as_str))
        .bind(pending_book)
        .bind(pending_quantity)
        .bind(state.updated_at())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn clear_conversation(&self, user_id: UserId) -> Result<()> {
        sqlx::query("DELETE FROM conversation_state WHERE user_id = $1")
            .bind(user_id.as_i64())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_prefix_escapes_wildcards() {
        assert_eq!(like_prefix("Tolk"), "Tolk%");
        assert_eq!(like_prefix("100%_\\"), "100\\%\\_\\\\%");
    }
}
