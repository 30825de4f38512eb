//! Order flow orchestrator.

use std::time::Instant;

use common::{MessageRef, UserId};
use domain::{
    Book, CallbackAction, CartItem, Command, ConversationError, ConversationState, InboundEvent,
    Money, ParseError, Phase, QuantityStep, SearchCategory, User, VendorCode, cart_total,
};
use storage::{
    BookshopStore, ConversationStoreExt, CreditOutcome, DebitOutcome, ReleaseOutcome,
    ReserveOutcome, StorageError,
};

use crate::error::{FlowError, Result};
use crate::messaging::{MessagingPort, Outbound};
use crate::replies;
use crate::sequencer::UserSequencer;

/// What became of one inbound event.
#[derive(Debug)]
pub enum Disposition {
    /// The event was applied.
    Applied,
    /// The event was refused for an expected reason and the user was told why.
    Refused(FlowError),
}

impl Disposition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Disposition::Applied)
    }

    pub fn refusal(&self) -> Option<&FlowError> {
        match self {
            Disposition::Applied => None,
            Disposition::Refused(error) => Some(error),
        }
    }
}

/// Turns inbound user events into conversation transitions and store
/// operations.
///
/// Events of one user are handled one at a time, in arrival order; events
/// of different users run concurrently. Stock and balance are only changed
/// through the store's atomic conditional updates, and every two-step
/// operation compensates its first step when the second one fails:
///
/// | operation | first step | second step | compensation |
/// |-----------|------------|-------------|--------------|
/// | confirm   | reserve stock | add cart line | release stock |
/// | remove    | remove cart line | release stock | re-add cart line |
/// | pay       | debit balance | clear cart | credit balance |
pub struct OrderFlow<S, M>
where
    S: BookshopStore,
    M: MessagingPort,
{
    store: S,
    messenger: M,
    sequencer: UserSequencer,
}

impl<S, M> OrderFlow<S, M>
where
    S: BookshopStore,
    M: MessagingPort,
{
    /// Creates a new order flow.
    pub fn new(store: S, messenger: M) -> Self {
        Self {
            store,
            messenger,
            sequencer: UserSequencer::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn messenger(&self) -> &M {
        &self.messenger
    }

    /// Number of users with an event in flight or queued.
    pub fn users_in_flight(&self) -> usize {
        self.sequencer.active_users()
    }

    /// Handles one inbound event.
    ///
    /// Expected outcomes (not found, insufficient stock or balance, an event
    /// the conversation does not accept) come back as
    /// `Disposition::Refused` after the user has been told. Storage and
    /// messaging failures are logged and returned as errors.
    #[tracing::instrument(skip(self, event), fields(user_id = %event.user_id(), kind = event.kind()))]
    pub async fn handle(&self, event: InboundEvent) -> Result<Disposition> {
        let user_id = event.user_id();
        let kind = event.kind();
        metrics::counter!("flow_events_total", "kind" => kind).increment(1);
        let started = Instant::now();

        let _turn = self.sequencer.acquire(user_id).await;
        let result = self.process(user_id, event).await;

        metrics::histogram!("flow_event_duration_seconds", "kind" => kind)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn process(&self, user_id: UserId, event: InboundEvent) -> Result<Disposition> {
        let mut state = match self.store.conversation_or_idle(user_id).await {
            Ok(state) => state,
            Err(e) => return Err(self.fail(user_id, e.into()).await),
        };
        let mut outbox = Vec::new();

        let disposition = match self.dispatch(&mut state, event, &mut outbox).await {
            Ok(()) => Disposition::Applied,
            Err(error) if error.is_expected() => {
                tracing::info!(%error, phase = %state.phase(), "event refused");
                outbox.push(replies::refusal(&error, &state));
                Disposition::Refused(error)
            }
            Err(error) => return Err(self.fail(user_id, error).await),
        };

        if let Err(e) = self.store.persist_conversation(&state).await {
            return Err(self.fail(user_id, e.into()).await);
        }

        for message in outbox {
            message.deliver(&self.messenger, user_id).await?;
        }
        Ok(disposition)
    }

    /// Logs a failure that is not the user's doing and asks them to retry.
    async fn fail(&self, user_id: UserId, error: FlowError) -> FlowError {
        tracing::error!(%user_id, %error, "event handling failed");
        if !matches!(error, FlowError::Messaging(_))
            && let Err(e) = replies::storage_failure()
                .deliver(&self.messenger, user_id)
                .await
        {
            tracing::warn!(%user_id, error = %e, "failure notice not delivered");
        }
        error
    }

    async fn dispatch(
        &self,
        state: &mut ConversationState,
        event: InboundEvent,
        outbox: &mut Vec<Outbound>,
    ) -> Result<()> {
        let user_id = state.user_id();

        if let InboundEvent::Command {
            chat_ref,
            command: Command::Start,
            ..
        } = event
        {
            return self.on_start(state, chat_ref, outbox).await;
        }

        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or(FlowError::UserNotFound(user_id))?;

        match event {
            InboundEvent::Command { command, .. } => {
                self.on_command(state, &user, command, outbox).await
            }
            InboundEvent::Text { content, .. } => self.on_text(state, &content, outbox).await,
            InboundEvent::Callback {
                message, action, ..
            } => self.on_callback(state, message, action, outbox).await,
        }
    }
}

// Command handlers
impl<S, M> OrderFlow<S, M>
where
    S: BookshopStore,
    M: MessagingPort,
{
    async fn on_start(
        &self,
        state: &mut ConversationState,
        chat_ref: i64,
        outbox: &mut Vec<Outbound>,
    ) -> Result<()> {
        state.reset();
        let user = self.store.ensure_user(state.user_id(), chat_ref).await?;
        tracing::info!(user_id = %user.id, balance = %user.balance, "user registered");
        outbox.push(replies::greeting());
        Ok(())
    }

    async fn on_command(
        &self,
        state: &mut ConversationState,
        user: &User,
        command: Command,
        outbox: &mut Vec<Outbound>,
    ) -> Result<()> {
        match command {
            Command::Start => Ok(()),
            Command::Search { query } => {
                state.start_search(query.as_deref());
                match state.search_request() {
                    Ok(query) => outbox.push(replies::choose_category(query)),
                    Err(_) => outbox.push(replies::ask_query()),
                }
                Ok(())
            }
            Command::MyOrders => {
                state.reset();
                let lines = self.store.list_items(user.id).await?;
                if lines.is_empty() {
                    outbox.push(replies::empty_cart());
                    return Ok(());
                }
                for line in &lines {
                    outbox.push(replies::cart_line(line)?);
                }
                let total = cart_total(&lines).ok_or_else(|| {
                    StorageError::Overflow(format!("cart total of user {}", user.id))
                })?;
                outbox.push(replies::cart_summary(user.balance, total));
                Ok(())
            }
            Command::Balance => {
                state.reset();
                outbox.push(replies::balance(user.balance));
                Ok(())
            }
            Command::Cancel => {
                state.reset();
                outbox.push(replies::command_cancelled());
                Ok(())
            }
        }
    }

    async fn on_text(
        &self,
        state: &mut ConversationState,
        content: &str,
        outbox: &mut Vec<Outbound>,
    ) -> Result<()> {
        match state.phase() {
            Phase::AwaitingQuery => {
                state.receive_query(content)?;
                let query = state.search_request()?;
                outbox.push(replies::choose_category(query));
                Ok(())
            }
            Phase::AwaitingTopUpAmount => self.on_top_up_amount(state, content, outbox).await,
            phase => Err(ConversationError::StateMismatch {
                phase,
                action: "accept text",
            }
            .into()),
        }
    }

    #[tracing::instrument(skip(self, state, outbox), fields(user_id = %state.user_id()))]
    async fn on_top_up_amount(
        &self,
        state: &mut ConversationState,
        content: &str,
        outbox: &mut Vec<Outbound>,
    ) -> Result<()> {
        state.expect_top_up_amount()?;
        let amount: Money = content.parse()?;
        if !amount.is_positive() {
            return Err(ParseError::InvalidAmount(content.to_string()).into());
        }

        match self.store.credit(state.user_id(), amount).await? {
            CreditOutcome::Credited { balance } => {
                tracing::info!(%amount, %balance, "balance topped up");
                state.reset();
                outbox.push(replies::topped_up(amount, balance));
                Ok(())
            }
            CreditOutcome::LimitExceeded { balance } => {
                tracing::warn!(%amount, %balance, "top-up refused, balance limit");
                Err(FlowError::BalanceLimitExceeded { balance, amount })
            }
            CreditOutcome::NotFound => Err(FlowError::UserNotFound(state.user_id())),
        }
    }
}

// Callback handlers
impl<S, M> OrderFlow<S, M>
where
    S: BookshopStore,
    M: MessagingPort,
{
    async fn on_callback(
        &self,
        state: &mut ConversationState,
        message: Option<MessageRef>,
        action: CallbackAction,
        outbox: &mut Vec<Outbound>,
    ) -> Result<()> {
        match action {
            CallbackAction::Category(category) => self.on_category(state, category, outbox).await,
            CallbackAction::RequestQuantity(code) => {
                self.on_request_quantity(state, code, outbox).await
            }
            CallbackAction::Step(step, code) => self.on_step(state, step, code, outbox).await,
            CallbackAction::Confirm(code) => self.on_confirm(state, code, outbox).await,
            CallbackAction::Cancel(code) => {
                state.ensure_picker_for(&code, "cancel the quantity choice")?;
                state.reset();
                outbox.push(replies::flow_cancelled());
                Ok(())
            }
            CallbackAction::Pay => self.on_pay(state.user_id(), message, outbox).await,
            CallbackAction::Remove(code) => {
                self.on_remove(state.user_id(), code, message, outbox).await
            }
            CallbackAction::Replenish => {
                state.request_top_up()?;
                outbox.push(replies::ask_top_up_amount());
                Ok(())
            }
        }
    }

    async fn on_category(
        &self,
        state: &mut ConversationState,
        category: SearchCategory,
        outbox: &mut Vec<Outbound>,
    ) -> Result<()> {
        let query = state.search_request()?.to_string();
        let matches: Vec<Book> = match category {
            SearchCategory::Title => self.store.find_by_title(&query).await?.into_iter().collect(),
            SearchCategory::Author => self.store.find_by_author_prefix(&query).await?,
            SearchCategory::VendorCode => self
                .store
                .find_by_vendor_code(&VendorCode::new(query.as_str()))
                .await?
                .into_iter()
                .collect(),
        };
        tracing::info!(%category, query = %query, matches = matches.len(), "catalog searched");

        state.resolve_search(&matches)?;
        if matches.is_empty() {
            outbox.push(replies::not_found(&query));
        } else {
            outbox.extend(matches.iter().map(replies::book_card));
        }
        Ok(())
    }

    async fn on_request_quantity(
        &self,
        state: &mut ConversationState,
        vendor_code: VendorCode,
        outbox: &mut Vec<Outbound>,
    ) -> Result<()> {
        if !state.phase().accepts_quantity_request() {
            return Err(ConversationError::StateMismatch {
                phase: state.phase(),
                action: "choose a quantity",
            }
            .into());
        }

        let book = self.current_book(state, vendor_code).await?;
        let quantity = state.request_quantity(book.clone())?;
        outbox.push(replies::quantity_picker(&book, quantity)?);
        Ok(())
    }

    async fn on_step(
        &self,
        state: &mut ConversationState,
        step: QuantityStep,
        vendor_code: VendorCode,
        outbox: &mut Vec<Outbound>,
    ) -> Result<()> {
        state.ensure_picker_for(&vendor_code, "change the quantity")?;

        let book = self.current_book(state, vendor_code).await?;
        let changed = match state.step_quantity(step, book) {
            Ok(changed) => changed,
            Err(error @ ConversationError::OutOfStock { .. }) => {
                state.reset();
                return Err(error.into());
            }
            Err(error) => return Err(error.into()),
        };

        // At a bound the step changes nothing and the picker stays as shown.
        if changed {
            let (book, quantity) = state.pending_reservation()?;
            outbox.push(replies::quantity_update(book, quantity)?);
        }
        Ok(())
    }

    /// Reserves the pending quantity and moves it into the cart.
    #[tracing::instrument(skip(self, state, outbox), fields(user_id = %state.user_id()))]
    async fn on_confirm(
        &self,
        state: &mut ConversationState,
        vendor_code: VendorCode,
        outbox: &mut Vec<Outbound>,
    ) -> Result<()> {
        state.ensure_picker_for(&vendor_code, "confirm a quantity")?;
        let (_, quantity) = state.pending_reservation()?;
        let book = self.current_book(state, vendor_code).await?;

        // Claim the pending reservation first: once this is stored, a
        // repeated confirm finds an idle conversation.
        let pending = state.clone();
        state.reset();
        self.store.persist_conversation(state).await?;

        match self.reserve_into_cart(state.user_id(), &book, quantity).await {
            Ok(line) => {
                outbox.push(replies::added_to_cart(&line, quantity));
                Ok(())
            }
            Err(FlowError::InsufficientStock {
                vendor_code,
                requested,
                available,
            }) => {
                *state = pending;
                if state.clamp_to_available(available).is_err() {
                    state.reset();
                }
                Err(FlowError::InsufficientStock {
                    vendor_code,
                    requested,
                    available,
                })
            }
            Err(error @ FlowError::BookUnavailable(_)) => Err(error),
            Err(error) => {
                if let Err(e) = self.store.persist_conversation(&pending).await {
                    tracing::warn!(error = %e, "pending reservation not restored");
                }
                *state = pending;
                Err(error)
            }
        }
    }

    async fn reserve_into_cart(
        &self,
        user_id: UserId,
        book: &Book,
        quantity: u32,
    ) -> Result<CartItem> {
        let vendor_code = &book.vendor_code;
        match self.store.reserve(vendor_code, quantity).await? {
            ReserveOutcome::Reserved { remaining } => {
                metrics::counter!("reservations_total", "outcome" => "reserved").increment(1);
                tracing::info!(%vendor_code, quantity, remaining, "stock reserved");
            }
            ReserveOutcome::InsufficientStock { available } => {
                metrics::counter!("reservations_total", "outcome" => "insufficient_stock")
                    .increment(1);
                return Err(FlowError::InsufficientStock {
                    vendor_code: vendor_code.clone(),
                    requested: quantity,
                    available,
                });
            }
            ReserveOutcome::NotFound => {
                metrics::counter!("reservations_total", "outcome" => "not_found").increment(1);
                return Err(FlowError::BookUnavailable(vendor_code.clone()));
            }
        }

        // Price is fixed here, at reservation time.
        let item = CartItem::new(
            user_id,
            vendor_code.clone(),
            book.title.clone(),
            quantity,
            book.price,
        );
        match self.store.add_item(item).await {
            Ok(line) => Ok(line),
            Err(error) => {
                tracing::warn!(%vendor_code, %error, "cart add failed, releasing stock");
                self.compensate_release(vendor_code, quantity).await?;
                Err(error.into())
            }
        }
    }

    /// Charges the whole cart and empties it.
    #[tracing::instrument(skip(self, outbox))]
    async fn on_pay(
        &self,
        user_id: UserId,
        message: Option<MessageRef>,
        outbox: &mut Vec<Outbound>,
    ) -> Result<()> {
        if self.store.list_items(user_id).await?.is_empty() {
            return Err(FlowError::EmptyCart);
        }
        let total = self.store.total_price(user_id).await?;

        match self.store.debit(user_id, total).await? {
            DebitOutcome::Debited { balance } => {
                if let Err(error) = self.store.clear(user_id).await {
                    tracing::warn!(%error, "cart clear failed, refunding");
                    self.compensate_credit(user_id, total).await?;
                    return Err(error.into());
                }
                metrics::counter!("payments_total", "outcome" => "paid").increment(1);
                tracing::info!(%total, %balance, "cart paid");

                outbox.extend(message.map(Outbound::Delete));
                outbox.push(replies::paid(total, balance));
                Ok(())
            }
            DebitOutcome::Insufficient { balance } => {
                metrics::counter!("payments_total", "outcome" => "insufficient_balance")
                    .increment(1);
                Err(FlowError::InsufficientBalance { balance, total })
            }
            DebitOutcome::NotFound => Err(FlowError::UserNotFound(user_id)),
        }
    }

    /// Drops a cart line and returns its stock.
    #[tracing::instrument(skip(self, outbox))]
    async fn on_remove(
        &self,
        user_id: UserId,
        vendor_code: VendorCode,
        message: Option<MessageRef>,
        outbox: &mut Vec<Outbound>,
    ) -> Result<()> {
        let line = self
            .store
            .remove_item(user_id, &vendor_code)
            .await?
            .ok_or_else(|| FlowError::CartLineNotFound(vendor_code.clone()))?;

        match self.store.release(&vendor_code, line.quantity).await {
            Ok(ReleaseOutcome::Released { stock }) => {
                tracing::info!(quantity = line.quantity, stock, "cart line removed");
            }
            Ok(ReleaseOutcome::NotFound) => {
                tracing::warn!(
                    quantity = line.quantity,
                    "cart line removed for a book no longer in the catalog"
                );
            }
            Err(error) => {
                tracing::warn!(%error, "stock release failed, restoring cart line");
                self.compensate_restore_line(line).await?;
                return Err(error.into());
            }
        }

        outbox.extend(message.map(Outbound::Delete));
        outbox.push(replies::removed(&line));
        Ok(())
    }

    /// Re-reads a book. A book that vanished ends the flow.
    async fn current_book(
        &self,
        state: &mut ConversationState,
        vendor_code: VendorCode,
    ) -> Result<Book> {
        match self.store.find_by_vendor_code(&vendor_code).await? {
            Some(book) => Ok(book),
            None => {
                state.reset();
                Err(FlowError::BookUnavailable(vendor_code))
            }
        }
    }
}

// Compensations
impl<S, M> OrderFlow<S, M>
where
    S: BookshopStore,
    M: MessagingPort,
{
    async fn compensate_release(&self, vendor_code: &VendorCode, quantity: u32) -> Result<()> {
        metrics::counter!("compensations_total", "step" => "release_stock").increment(1);
        match self.store.release(vendor_code, quantity).await {
            Ok(ReleaseOutcome::Released { stock }) => {
                tracing::info!(%vendor_code, quantity, stock, "reservation released");
                Ok(())
            }
            Ok(ReleaseOutcome::NotFound) => {
                tracing::warn!(%vendor_code, quantity, "reserved book vanished before release");
                Ok(())
            }
            Err(e) => {
                tracing::error!(%vendor_code, quantity, error = %e, "stock release compensation failed");
                Err(FlowError::CompensationFailed {
                    step: "release_stock",
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn compensate_credit(&self, user_id: UserId, amount: Money) -> Result<()> {
        metrics::counter!("compensations_total", "step" => "refund_balance").increment(1);
        match self.store.credit(user_id, amount).await {
            Ok(CreditOutcome::Credited { balance }) => {
                tracing::info!(%user_id, %amount, %balance, "payment refunded");
                Ok(())
            }
            Ok(CreditOutcome::NotFound) => Err(FlowError::CompensationFailed {
                step: "refund_balance",
                reason: format!("user {user_id} not found"),
            }),
            Ok(CreditOutcome::LimitExceeded { balance }) => Err(FlowError::CompensationFailed {
                step: "refund_balance",
                reason: format!("refund of {amount} exceeds the balance limit at {balance}"),
            }),
            Err(e) => {
                tracing::error!(%user_id, %amount, error = %e, "refund compensation failed");
                Err(FlowError::CompensationFailed {
                    step: "refund_balance",
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn compensate_restore_line(&self, line: CartItem) -> Result<()> {
        metrics::counter!("compensations_total", "step" => "restore_cart_line").increment(1);
        let vendor_code = line.vendor_code.clone();
        match self.store.add_item(line).await {
            Ok(line) => {
                tracing::info!(%vendor_code, quantity = line.quantity, "cart line restored");
                Ok(())
            }
            Err(e) => {
                tracing::error!(%vendor_code, error = %e, "cart line restore compensation failed");
                Err(FlowError::CompensationFailed {
                    step: "restore_cart_line",
                    reason: e.to_string(),
                })
            }
        }
    }
}
