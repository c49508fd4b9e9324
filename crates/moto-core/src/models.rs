use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Draft,
    Available,
    Reserved,
    Sold,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Draft => "draft",
            ListingStatus::Available => "available",
            ListingStatus::Reserved => "reserved",
            ListingStatus::Sold => "sold",
        }
    }

    /// Whether a listing in this status is shown publicly.
    pub fn is_public(&self) -> bool {
        !matches!(self, ListingStatus::Draft)
    }

    /// `draft → available` is the publish edge; the three public statuses
    /// move freely among themselves. Nothing returns to `draft`.
    pub fn can_transition_to(&self, to: ListingStatus) -> bool {
        match (self, to) {
            (ListingStatus::Draft, ListingStatus::Available) => true,
            (ListingStatus::Draft, _) | (_, ListingStatus::Draft) => false,
            (from, to) => *from != to,
        }
    }
}

impl fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ListingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(ListingStatus::Draft),
            "available" => Ok(ListingStatus::Available),
            "reserved" => Ok(ListingStatus::Reserved),
            "sold" => Ok(ListingStatus::Sold),
            _ => Err(format!("Unknown listing status: {}", s)),
        }
    }
}

/// An integer measurement tagged with the unit token it was read with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: u64,
    pub unit: String,
}

impl Quantity {
    pub fn new(value: u64, unit: impl Into<String>) -> Self {
        Self {
            value,
            unit: unit.into(),
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

/// Best-effort attributes read from a vendor page. Never persisted as is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawExtraction {
    /// Empty when no brand-bearing name was found.
    pub name: String,
    pub year: Option<i32>,
    pub mileage: Option<Quantity>,
    pub displacement: Option<Quantity>,
    pub frame_number: Option<String>,
    /// Absolute, deduplicated, first-seen order, noise filtered out.
    pub images: Vec<String>,
}

impl RawExtraction {
    /// Name followed by the model year, when one was found.
    pub fn title(&self) -> String {
        match self.year {
            Some(year) => format!("{} {}", self.name, year).trim().to_string(),
            None => self.name.trim().to_string(),
        }
    }

    /// True when no structured field was recognised at all.
    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
            && self.year.is_none()
            && self.mileage.is_none()
            && self.displacement.is_none()
            && self.frame_number.is_none()
            && self.images.is_empty()
    }
}

/// Structured attribute bag stored alongside a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mileage: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub displacement: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_number: Option<String>,
    /// Free text as typed by the operator ("через неделю" is valid).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arrival_date: Option<String>,
}

impl ListingAttributes {
    /// Copy the typed fields of an extraction. Returns `None` when there
    /// are none, so the listing carries no attribute bag at all.
    pub fn from_extraction(raw: &RawExtraction) -> Option<Self> {
        let attrs = Self {
            year: raw.year,
            mileage: raw.mileage.clone(),
            displacement: raw.displacement.clone(),
            frame_number: raw.frame_number.clone().filter(|f| !f.is_empty()),
            arrival_date: None,
        };
        (!attrs.is_empty()).then_some(attrs)
    }

    pub fn is_empty(&self) -> bool {
        self.year.is_none()
            && self.mileage.is_none()
            && self.displacement.is_none()
            && self.frame_number.is_none()
            && self.arrival_date.is_none()
    }
}

/// A stored photo of a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    pub id: Uuid,
    pub listing_id: Uuid,
    /// Durable storage URL.
    pub url: String,
    /// Zero-based display position.
    pub position: i32,
    pub created_at: DateTime<Utc>,
}

/// A catalog listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: Uuid,
    pub title: String,
    pub price: Decimal,
    pub currency: String,
    pub attributes: Option<ListingAttributes>,
    pub status: ListingStatus,
    pub source_url: String,
    pub photos: Vec<Photo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Listing {
    pub fn arrival_date(&self) -> Option<&str> {
        self.attributes
            .as_ref()
            .and_then(|a| a.arrival_date.as_deref())
    }
}

/// DTO for inserting a new listing. Photos are attached separately because
/// their storage keys depend on the id assigned here.
#[derive(Debug, Clone, PartialEq)]
pub struct NewListing {
    pub title: String,
    pub price: Decimal,
    pub currency: String,
    pub attributes: Option<ListingAttributes>,
    pub status: ListingStatus,
    pub source_url: String,
}

/// Partial update applied by the store as one atomic row update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingPatch {
    pub title: Option<String>,
    pub price: Option<Decimal>,
    pub currency: Option<String>,
    pub status: Option<ListingStatus>,
    /// Merged into the attribute bag; other attributes are kept.
    pub arrival_date: Option<String>,
    /// When set, the patch only applies while the listing is in this status;
    /// otherwise the store returns `AppError::Conflict`.
    pub expected_status: Option<ListingStatus>,
}

/// Listing query. Results are ordered available, reserved, sold, draft,
/// newest first within a status.
#[derive(Debug, Clone, Default)]
pub struct ListingFilter {
    pub id: Option<Uuid>,
    pub status: Option<ListingStatus>,
    pub title: Option<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub include_photos: bool,
}

impl ListingFilter {
    pub fn by_id(id: Uuid) -> Self {
        Self {
            id: Some(id),
            include_photos: true,
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: ListingStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_photos(mut self) -> Self {
        self.include_photos = true;
        self
    }

    /// Sort rank used for the catalog order.
    pub fn status_rank(status: ListingStatus) -> u8 {
        match status {
            ListingStatus::Available => 1,
            ListingStatus::Reserved => 2,
            ListingStatus::Sold => 3,
            ListingStatus::Draft => 4,
        }
    }
}

/// Identity of the person sending bot messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperatorId(pub i64);

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Conversation the bot replies into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An inbound text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub operator: OperatorId,
    pub chat: ChatId,
    pub text: String,
}

/// One item of an update stream. `message` is `None` for updates the bot
/// does not handle (edits, joins, stickers).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundUpdate {
    pub update_id: i64,
    pub message: Option<InboundMessage>,
}

/// Handle of a message the bot sent, used to edit it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentMessage {
    pub chat: ChatId,
    pub message_id: i64,
}
