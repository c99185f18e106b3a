//! Listing Feed Types
//!
//! Snapshot items for the public live-listings feed, the statistics derived
//! from a snapshot, and the rotating display window over it.
//!
//! A snapshot is immutable once fetched and is replaced wholesale; `FeedStats`
//! is always recomputed from the current snapshot, never updated in place.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::record::{Record, id_string, optional_id_string};

/// Default number of listings shown at once.
pub const DEFAULT_WINDOW_SIZE: usize = 3;

/// Owner id used when a record carries none.
pub const PLACEHOLDER_OWNER_ID: &str = "unknown";

/// Display name used when a record carries no owner name.
pub const PLACEHOLDER_OWNER_NAME: &str = "Anonymous Owner";

/// Location used when a record carries none.
pub const PLACEHOLDER_LOCATION: &str = "Location not informed";

/// Category used when a record carries none.
pub const DEFAULT_CATEGORY: &str = "other";

const AVATAR_BASE_URL: &str = "https://ui-avatars.com/api/";

// =============================================================================
// Listing Status
// =============================================================================

/// Publication status of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    /// Open for proposals.
    Active,
    /// Negotiation in progress.
    Pending,
    /// Closed with a deal.
    Sold,
    /// Hidden by the owner.
    Inactive,
    /// Status missing or not recognized.
    #[default]
    Unknown,
}

impl ListingStatus {
    /// Parse a status, mapping unrecognized values to `Unknown`.
    #[must_use]
    pub fn from_str_lenient(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "active" | "available" | "open" => Self::Active,
            "pending" | "reserved" => Self::Pending,
            "sold" | "rented" | "closed" => Self::Sold,
            "inactive" | "paused" | "archived" => Self::Inactive,
            _ => Self::Unknown,
        }
    }

    /// Check if the listing is active.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

// =============================================================================
// Snapshot Item
// =============================================================================

/// One listing as displayed in the live feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListingSnapshotItem {
    /// Listing id.
    pub id: String,
    /// Owner user id.
    pub owner_id: String,
    /// Owner name as displayed.
    pub owner_display_name: String,
    /// Owner avatar URL (placeholder derived from the name when absent).
    pub owner_avatar_url: String,
    /// Free-form location.
    pub location: String,
    /// Lower budget bound.
    pub min_budget: Option<Decimal>,
    /// Upper budget bound.
    pub max_budget: Option<Decimal>,
    /// Number of bedrooms, when relevant.
    pub bedrooms: Option<u32>,
    /// Property category.
    pub category: String,
    /// Publication status.
    pub status: ListingStatus,
    /// When the listing was created.
    pub created_at: DateTime<Utc>,
}

impl ListingSnapshotItem {
    /// Decode a listings row, defaulting missing optional fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the row has no usable id or a field has the wrong type.
    pub fn from_record(record: Record) -> Result<Self, serde_json::Error> {
        let row: ListingRow = serde_json::from_value(record)?;

        let owner_display_name = non_blank(row.owner_name)
            .unwrap_or_else(|| PLACEHOLDER_OWNER_NAME.to_string());
        let owner_avatar_url =
            non_blank(row.owner_avatar_url).unwrap_or_else(|| placeholder_avatar(&owner_display_name));

        let (min_budget, max_budget) = match (row.min_budget, row.max_budget, row.price) {
            (None, None, Some(price)) => (Some(price), Some(price)),
            (min, max, _) => (min, max),
        };

        Ok(Self {
            id: row.id,
            owner_id: row
                .owner_id
                .unwrap_or_else(|| PLACEHOLDER_OWNER_ID.to_string()),
            owner_display_name,
            owner_avatar_url,
            location: non_blank(row.location).unwrap_or_else(|| PLACEHOLDER_LOCATION.to_string()),
            min_budget,
            max_budget,
            bedrooms: row.bedrooms,
            category: non_blank(row.category).unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
            status: row
                .status
                .as_deref()
                .map(ListingStatus::from_str_lenient)
                .unwrap_or_default(),
            created_at: row.created_at.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        })
    }

    /// Headline value: the higher budget bound, or whichever bound exists.
    #[must_use]
    pub fn value(&self) -> Decimal {
        match (self.min_budget, self.max_budget) {
            (Some(min), Some(max)) => min.max(max),
            (Some(bound), None) | (None, Some(bound)) => bound,
            (None, None) => Decimal::ZERO,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListingRow {
    #[serde(deserialize_with = "id_string")]
    id: String,
    #[serde(default, deserialize_with = "optional_id_string")]
    owner_id: Option<String>,
    #[serde(default)]
    owner_name: Option<String>,
    #[serde(default)]
    owner_avatar_url: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    price: Option<Decimal>,
    #[serde(default)]
    min_budget: Option<Decimal>,
    #[serde(default)]
    max_budget: Option<Decimal>,
    #[serde(default)]
    bedrooms: Option<u32>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Deterministic placeholder avatar URL for a display name.
#[must_use]
pub fn placeholder_avatar(name: &str) -> String {
    let mut encoded = String::with_capacity(name.len());
    for byte in name.trim().bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(char::from(byte));
            }
            b' ' => encoded.push('+'),
            other => encoded.push_str(&format!("%{other:02X}")),
        }
    }
    format!("{AVATAR_BASE_URL}?name={encoded}&background=0D8ABC&color=fff")
}

// =============================================================================
// Feed Statistics
// =============================================================================

/// Aggregate figures over the current snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeedStats {
    /// Number of listings.
    pub count: usize,
    /// Number of active listings.
    pub active_count: usize,
    /// Number of distinct owners.
    pub distinct_owner_count: usize,
    /// Sum of each listing's headline value.
    pub total_value: Decimal,
}

impl FeedStats {
    /// Derive statistics from a snapshot.
    #[must_use]
    pub fn from_snapshot(items: &[ListingSnapshotItem]) -> Self {
        let owners: HashSet<&str> = items.iter().map(|i| i.owner_id.as_str()).collect();

        Self {
            count: items.len(),
            active_count: items.iter().filter(|i| i.status.is_active()).count(),
            distinct_owner_count: owners.len(),
            total_value: items.iter().map(ListingSnapshotItem::value).sum(),
        }
    }
}

// =============================================================================
// Display Window
// =============================================================================

/// Rotating cursor selecting which listings are on screen.
///
/// Keeps `offset < len` for a non-empty snapshot and wraps around the end so a
/// snapshot of at least `size` items always fills the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayWindow {
    offset: usize,
    size: usize,
}

impl Default for DisplayWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

impl DisplayWindow {
    /// Create a window showing `size` items, starting at offset 0.
    #[must_use]
    pub const fn new(size: usize) -> Self {
        Self { offset: 0, size }
    }

    /// Current offset into the snapshot.
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Number of items shown at once.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Return to the first item.
    pub const fn reset(&mut self) {
        self.offset = 0;
    }

    /// Move one window forward over a snapshot of `len` items.
    ///
    /// Does nothing (and returns `false`) unless the snapshot is larger than
    /// the window.
    pub const fn advance(&mut self, len: usize) -> bool {
        if self.size == 0 || len <= self.size {
            return false;
        }
        self.offset = (self.offset + self.size) % len;
        true
    }

    /// Items currently on screen, wrapping past the end of the snapshot.
    #[must_use]
    pub fn select<T: Clone>(&self, snapshot: &[T]) -> Vec<T> {
        let len = snapshot.len();
        if len == 0 {
            return Vec::new();
        }

        let shown = self.size.min(len);
        (0..shown)
            .map(|i| snapshot[(self.offset + i) % len].clone())
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;
    use test_case::test_case;

    use super::*;

    fn item(id: &str, owner: &str, min: Option<i64>, max: Option<i64>) -> ListingSnapshotItem {
        ListingSnapshotItem {
            id: id.to_string(),
            owner_id: owner.to_string(),
            owner_display_name: owner.to_string(),
            owner_avatar_url: placeholder_avatar(owner),
            location: "Centro".to_string(),
            min_budget: min.map(Decimal::from),
            max_budget: max.map(Decimal::from),
            bedrooms: Some(2),
            category: "apartment".to_string(),
            status: ListingStatus::Active,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    #[test]
    fn total_value_uses_higher_bound() {
        let snapshot = vec![
            item("1", "a", Some(1_000_000), Some(2_000_000)),
            item("2", "b", Some(500_000), Some(500_000)),
        ];

        let stats = FeedStats::from_snapshot(&snapshot);
        assert_eq!(stats.total_value, Decimal::from(2_500_000));
    }

    #[test_case(Some(100), None, 100 ; "min only")]
    #[test_case(None, Some(250), 250 ; "max only")]
    #[test_case(Some(300), Some(200), 300 ; "inverted bounds")]
    #[test_case(None, None, 0 ; "no bounds")]
    fn value_falls_back_to_present_bound(min: Option<i64>, max: Option<i64>, expected: i64) {
        assert_eq!(item("1", "a", min, max).value(), Decimal::from(expected));
    }

    #[test]
    fn stats_count_active_and_distinct_owners() {
        let mut sold = item("3", "a", Some(10), None);
        sold.status = ListingStatus::Sold;
        let snapshot = vec![item("1", "a", Some(1), None), item("2", "b", Some(2), None), sold];

        let stats = FeedStats::from_snapshot(&snapshot);
        assert_eq!(stats.count, 3);
        assert_eq!(stats.active_count, 2);
        assert_eq!(stats.distinct_owner_count, 2);
        assert_eq!(stats.total_value, Decimal::from(13));
    }

    #[test]
    fn stats_of_empty_snapshot_are_zero() {
        assert_eq!(FeedStats::from_snapshot(&[]), FeedStats::default());
    }

    #[test_case(7, 3, &[0, 3, 6, 2, 5, 1, 4, 0] ; "seven items window three")]
    #[test_case(4, 3, &[0, 3, 2, 1, 0] ; "four items window three")]
    #[test_case(6, 3, &[0, 3, 0] ; "exact multiple")]
    fn offsets_cycle(len: usize, size: usize, expected: &[usize]) {
        let mut window = DisplayWindow::new(size);
        let mut offsets = vec![window.offset()];
        for _ in 1..expected.len() {
            assert!(window.advance(len));
            offsets.push(window.offset());
        }
        assert_eq!(offsets, expected);
    }

    #[test]
    fn window_wraps_to_stay_full() {
        let snapshot: Vec<u32> = (0..7).collect();
        let mut window = DisplayWindow::new(3);
        window.advance(7);
        window.advance(7);

        assert_eq!(window.offset(), 6);
        assert_eq!(window.select(&snapshot), vec![6, 0, 1]);
    }

    #[test]
    fn short_snapshot_does_not_rotate() {
        let snapshot = vec!["a", "b"];
        let mut window = DisplayWindow::new(3);

        assert!(!window.advance(snapshot.len()));
        assert_eq!(window.select(&snapshot), vec!["a", "b"]);
    }

    #[test]
    fn empty_snapshot_selects_nothing() {
        let window = DisplayWindow::new(3);
        assert!(window.select::<u8>(&[]).is_empty());
    }

    #[test]
    fn record_defaults_are_deterministic() {
        let record = json!({"id": 5, "price": 750000});

        let first = ListingSnapshotItem::from_record(record.clone()).unwrap();
        let second = ListingSnapshotItem::from_record(record).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.id, "5");
        assert_eq!(first.owner_id, PLACEHOLDER_OWNER_ID);
        assert_eq!(first.owner_display_name, PLACEHOLDER_OWNER_NAME);
        assert_eq!(first.owner_avatar_url, placeholder_avatar(PLACEHOLDER_OWNER_NAME));
        assert_eq!(first.location, PLACEHOLDER_LOCATION);
        assert_eq!(first.category, DEFAULT_CATEGORY);
        assert_eq!(first.status, ListingStatus::Unknown);
        assert_eq!(first.min_budget, Some(Decimal::from(750_000)));
        assert_eq!(first.max_budget, Some(Decimal::from(750_000)));
        assert_eq!(first.created_at, DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn record_range_wins_over_price() {
        let record = json!({
            "id": "l1",
            "owner_id": "u1",
            "owner_name": "Bia Souza",
            "location": "Pinheiros",
            "price": 1,
            "min_budget": 400000,
            "max_budget": "650000.50",
            "bedrooms": 3,
            "category": "house",
            "status": "ACTIVE",
            "created_at": "2025-02-10T08:30:00Z"
        });

        let item = ListingSnapshotItem::from_record(record).unwrap();
        assert_eq!(item.owner_display_name, "Bia Souza");
        assert_eq!(item.min_budget, Some(Decimal::from(400_000)));
        assert_eq!(item.max_budget, Some(Decimal::new(65_000_050, 2)));
        assert_eq!(item.status, ListingStatus::Active);
        assert_eq!(item.bedrooms, Some(3));
    }

    #[test]
    fn placeholder_avatar_encodes_name() {
        assert_eq!(
            placeholder_avatar("Zé Maria"),
            "https://ui-avatars.com/api/?name=Z%C3%A9+Maria&background=0D8ABC&color=fff"
        );
    }

    #[test_case("Active", ListingStatus::Active)]
    #[test_case("reserved", ListingStatus::Pending)]
    #[test_case("rented", ListingStatus::Sold)]
    #[test_case("archived", ListingStatus::Inactive)]
    #[test_case("draft", ListingStatus::Unknown)]
    fn status_parsing(raw: &str, expected: ListingStatus) {
        assert_eq!(ListingStatus::from_str_lenient(raw), expected);
    }
}
