//! Reply texts and keyboards.
//!
//! Everything the user sees is rendered here from typed values. Nothing is
//! ever parsed back out of a rendered text.

use domain::{
    Book, CallbackAction, CartItem, ConversationError, ConversationState, Money, Phase,
    QuantityStep, SearchCategory, VendorCode,
};
use storage::StorageError;

use crate::error::{FlowError, Result};
use crate::messaging::{Button, Keyboard, Outbound};

pub fn greeting() -> Outbound {
    Outbound::reply(
        "Welcome to the bookshop!\n\
         /request - find a book\n\
         /my_orders - your cart\n\
         /balance - your balance",
    )
}

pub fn ask_query() -> Outbound {
    Outbound::reply("Enter a title, an author or a vendor code.")
}

pub fn choose_category(query: &str) -> Outbound {
    let keyboard = Keyboard::new().row(
        SearchCategory::ALL
            .into_iter()
            .map(|category| Button::new(category.label(), CallbackAction::Category(category))),
    );
    Outbound::reply_with(format!("Search \"{query}\" by:"), keyboard)
}

pub fn not_found(query: &str) -> Outbound {
    Outbound::reply(format!("Nothing found for \"{query}\"."))
}

/// Book card with a "buy" button naming the book.
pub fn book_card(book: &Book) -> Outbound {
    let text = format!(
        "{}\nAuthor: {}\nGenre: {}\nPrice: {}\nIn stock: {}\nVendor code: {}",
        book.title, book.author, book.genre, book.price, book.stock, book.vendor_code
    );
    Outbound::reply_with(
        text,
        Keyboard::single(
            "Buy",
            CallbackAction::RequestQuantity(book.vendor_code.clone()),
        ),
    )
}

/// `price * quantity`; a total that does not fit is bad catalog data.
fn total_of(vendor_code: &VendorCode, price: Money, quantity: u32) -> Result<Money> {
    price.checked_mul(quantity).ok_or_else(|| {
        StorageError::Overflow(format!("{quantity} x {price} for book {vendor_code}")).into()
    })
}

fn picker_text(book: &Book, quantity: u32) -> Result<String> {
    Ok(format!(
        "{}\nPrice: {}\nQuantity: {} (in stock: {})\nTotal: {}",
        book.title,
        book.price,
        quantity,
        book.stock,
        total_of(&book.vendor_code, book.price, quantity)?
    ))
}

fn picker_keyboard(vendor_code: &VendorCode) -> Keyboard {
    let steps = [
        QuantityStep::MinusFive,
        QuantityStep::MinusOne,
        QuantityStep::PlusOne,
        QuantityStep::PlusFive,
    ];
    Keyboard::new()
        .row(
            steps
                .into_iter()
                .map(|step| {
                    Button::new(step.label(), CallbackAction::Step(step, vendor_code.clone()))
                }),
        )
        .row([
            Button::new("Confirm", CallbackAction::Confirm(vendor_code.clone())),
            Button::new("Cancel", CallbackAction::Cancel(vendor_code.clone())),
        ])
}

/// Opens the quantity picker as a new message.
pub fn quantity_picker(book: &Book, quantity: u32) -> Result<Outbound> {
    Ok(Outbound::reply_with(
        picker_text(book, quantity)?,
        picker_keyboard(&book.vendor_code),
    ))
}

/// Re-renders the picker in place.
pub fn quantity_update(book: &Book, quantity: u32) -> Result<Outbound> {
    Ok(Outbound::edit_last(
        picker_text(book, quantity)?,
        Some(picker_keyboard(&book.vendor_code)),
    ))
}

pub fn added_to_cart(line: &CartItem, added: u32) -> Outbound {
    Outbound::edit_last(
        format!(
            "Added {added} x {} to your cart ({} in cart at {} each).",
            line.title, line.quantity, line.unit_price
        ),
        None,
    )
}

pub fn flow_cancelled() -> Outbound {
    Outbound::edit_last("Cancelled.", None)
}

pub fn command_cancelled() -> Outbound {
    Outbound::reply("Cancelled.")
}

pub fn empty_cart() -> Outbound {
    Outbound::reply("Your cart is empty. Use /request to find a book.")
}

pub fn cart_line(line: &CartItem) -> Result<Outbound> {
    let text = format!(
        "{}\nVendor code: {}\nQuantity: {}\nPrice: {} each, {} total",
        line.title,
        line.vendor_code,
        line.quantity,
        line.unit_price,
        total_of(&line.vendor_code, line.unit_price, line.quantity)?
    );
    Ok(Outbound::reply_with(
        text,
        Keyboard::single("Remove", CallbackAction::Remove(line.vendor_code.clone())),
    ))
}

pub fn cart_summary(balance: Money, total: Money) -> Outbound {
    Outbound::reply_with(
        format!("Balance: {balance}\nTotal: {total}"),
        Keyboard::single("Pay", CallbackAction::Pay),
    )
}

pub fn balance(balance: Money) -> Outbound {
    Outbound::reply_with(
        format!("Your balance: {balance}"),
        Keyboard::single("Replenish", CallbackAction::Replenish),
    )
}

pub fn ask_top_up_amount() -> Outbound {
    Outbound::reply("How much would you like to add? For example 150 or 12.50.")
}

pub fn topped_up(amount: Money, balance: Money) -> Outbound {
    Outbound::reply(format!("Added {amount}. Your balance: {balance}"))
}

pub fn paid(total: Money, balance: Money) -> Outbound {
    Outbound::reply(format!("Paid {total}. Your balance: {balance}"))
}

pub fn removed(line: &CartItem) -> Outbound {
    Outbound::reply(format!(
        "Removed {} x {} from your cart.",
        line.quantity, line.title
    ))
}

pub fn storage_failure() -> Outbound {
    Outbound::reply("Something went wrong on our side. Please try again later.")
}

/// What to tell the user when an event was refused.
///
/// `state` is the conversation after the refusal, so a picker that is
/// still open gets re-rendered with the adjusted quantity.
pub fn refusal(error: &FlowError, state: &ConversationState) -> Outbound {
    match error {
        FlowError::UserNotFound(_) => Outbound::reply("Please send /start first."),
        FlowError::BookUnavailable(code) => {
            Outbound::reply(format!("Book {code} is no longer available."))
        }
        FlowError::CartLineNotFound(code) => {
            Outbound::reply(format!("Book {code} is not in your cart."))
        }
        FlowError::EmptyCart => Outbound::reply("Your cart is empty, there is nothing to pay."),
        FlowError::InsufficientStock {
            vendor_code,
            available,
            ..
        } => match state.pending_reservation() {
            Ok((book, quantity)) => match picker_text(book, quantity) {
                Ok(picker) => Outbound::reply_with(
                    format!("Only {available} left in stock.\n{picker}"),
                    picker_keyboard(&book.vendor_code),
                ),
                Err(_) => Outbound::reply(format!("Only {available} left in stock.")),
            },
            Err(_) => Outbound::reply(format!("Book {vendor_code} is sold out.")),
        },
        FlowError::InsufficientBalance { balance, total } => Outbound::reply(format!(
            "Not enough money: the total is {total} but your balance is {balance}. \
             Use /balance to top up."
        )),
        FlowError::BalanceLimitExceeded { balance, .. } => Outbound::reply(format!(
            "That amount is too large. Your balance: {balance}. \
             Enter a smaller amount, or /cancel."
        )),
        FlowError::Conversation(ConversationError::EmptyQuery) => {
            Outbound::reply("Search text cannot be empty. Enter a title, an author or a vendor code.")
        }
        FlowError::Conversation(ConversationError::OutOfStock { vendor_code }) => {
            Outbound::reply(format!("Book {vendor_code} is out of stock."))
        }
        FlowError::Conversation(ConversationError::BookMismatch { .. }) => {
            Outbound::reply("That button belongs to an older search. Use /request to search again.")
        }
        FlowError::Conversation(ConversationError::StateMismatch { phase, .. }) => reprompt(*phase),
        FlowError::InvalidInput(_) if state.phase() == Phase::AwaitingTopUpAmount => {
            Outbound::reply("That is not a valid amount. Enter a positive number such as 150 or 12.50.")
        }
        FlowError::InvalidInput(_) => Outbound::reply("Sorry, I did not understand that."),
        FlowError::Storage(_) | FlowError::Messaging(_) | FlowError::CompensationFailed { .. } => {
            storage_failure()
        }
    }
}

/// Reminds the user what the current phase is waiting for.
pub fn reprompt(phase: Phase) -> Outbound {
    let text = match phase {
        Phase::Idle => "Use /request to find a book, /my_orders to see your cart.",
        Phase::AwaitingQuery => "Enter a title, an author or a vendor code.",
        Phase::AwaitingCategory => "Choose how to search using the buttons above.",
        Phase::BookSelected => "Press \"Buy\" under a book, or /cancel.",
        Phase::AwaitingQuantity => "Choose a quantity using the buttons above, or /cancel.",
        Phase::AwaitingTopUpAmount => "Enter the amount to add, or /cancel.",
    };
    Outbound::reply(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::UserId;

    fn book() -> Book {
        Book::new("V1", "Dune", "Frank Herbert", "Sci-Fi", Money::from_cents(1250), 4)
    }

    #[test]
    fn test_picker_renders_from_quantity() {
        let Outbound::Reply { text, keyboard } = quantity_picker(&book(), 3).unwrap() else {
            panic!("picker must be a new message");
        };
        assert!(text.contains("Quantity: 3 (in stock: 4)"));
        assert!(text.contains("Total: 37.50"));

        let actions: Vec<String> = keyboard
            .unwrap()
            .buttons()
            .map(|b| b.action.to_string())
            .collect();
        assert_eq!(
            actions,
            [
                "minus5:V1",
                "minus:V1",
                "plus:V1",
                "plus5:V1",
                "confirm:V1",
                "cancel:V1"
            ]
        );
    }

    #[test]
    fn test_picker_total_overflow_is_an_error() {
        let mut book = book();
        book.price = Money::from_cents(i64::MAX / 2 + 1);
        assert!(matches!(
            quantity_picker(&book, 2),
            Err(FlowError::Storage(StorageError::Overflow(_)))
        ));
        assert!(quantity_picker(&book, 1).is_ok());
    }

    #[test]
    fn test_category_keyboard() {
        let Outbound::Reply { keyboard, .. } = choose_category("Dune") else {
            panic!("expected a reply");
        };
        let actions: Vec<String> = keyboard
            .unwrap()
            .buttons()
            .map(|b| b.action.to_string())
            .collect();
        assert_eq!(actions, ["book_name", "book_author", "book_vendor"]);
    }

    #[test]
    fn test_insufficient_stock_reshows_picker() {
        let mut state = ConversationState::new(UserId::new(1));
        state.start_search(Some("Dune"));
        state.resolve_search(&[book()]).unwrap();
        state.request_quantity(book()).unwrap();
        state.clamp_to_available(2).unwrap();

        let error = FlowError::InsufficientStock {
            vendor_code: "V1".into(),
            requested: 3,
            available: 2,
        };
        let Outbound::Reply { text, keyboard } = refusal(&error, &state) else {
            panic!("expected a reply");
        };
        assert!(text.starts_with("Only 2 left"));
        assert!(keyboard.is_some());

        state.reset();
        assert_eq!(
            refusal(&error, &state),
            Outbound::reply("Book V1 is sold out.")
        );
    }
}
