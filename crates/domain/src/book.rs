//! Catalog records.

use serde::{Deserialize, Serialize};

use crate::value_objects::{Money, VendorCode};

/// A book in the shared catalog.
///
/// `stock` is the authoritative count only inside the store; any `Book`
/// held outside it is a snapshot taken at read time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub vendor_code: VendorCode,
    pub title: String,
    pub author: String,
    pub genre: String,
    pub price: Money,
    pub stock: u32,
}

impl Book {
    /// Creates a new book record.
    pub fn new(
        vendor_code: impl Into<VendorCode>,
        title: impl Into<String>,
        author: impl Into<String>,
        genre: impl Into<String>,
        price: Money,
        stock: u32,
    ) -> Self {
        Self {
            vendor_code: vendor_code.into(),
            title: title.into(),
            author: author.into(),
            genre: genre.into(),
            price,
            stock,
        }
    }

    /// Returns true if at least one copy can be reserved.
    pub fn is_in_stock(&self) -> bool {
        self.stock > 0
    }
}

/// Dimension a search query is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchCategory {
    /// Exact title match.
    Title,
    /// Case-sensitive author prefix match.
    Author,
    /// Exact vendor code match.
    VendorCode,
}

impl SearchCategory {
    pub const ALL: [SearchCategory; 3] = [
        SearchCategory::Title,
        SearchCategory::Author,
        SearchCategory::VendorCode,
    ];

    /// Human-readable name used on buttons and in replies.
    pub fn label(&self) -> &'static str {
        match self {
            SearchCategory::Title => "Title",
            SearchCategory::Author => "Author",
            SearchCategory::VendorCode => "Vendor code",
        }
    }
}

impl std::fmt::Display for SearchCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
