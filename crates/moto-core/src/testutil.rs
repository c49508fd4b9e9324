//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AppError;
use crate::media::next_position;
use crate::models::{
    ChatId, InboundMessage, InboundUpdate, Listing, ListingFilter, ListingPatch, ListingStatus,
    NewListing, OperatorId, Photo, RawExtraction, SentMessage,
};
use crate::traits::{
    AttributeExtractor, Fetcher, ListingStore, Messenger, ObjectStorage, PageParser,
    StorageCapability, UpdateSource,
};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher with separate response queues for pages and images.
#[derive(Clone)]
pub struct MockFetcher {
    /// Each page fetch pops the first element; defaults to a stub page.
    pages: Arc<Mutex<Vec<Result<String, AppError>>>>,
    /// Each image fetch pops the first element; defaults to a few bytes.
    images: Arc<Mutex<Vec<Result<Vec<u8>, AppError>>>>,
    page_requests: Arc<Mutex<Vec<String>>>,
    image_requests: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    pub fn new(html: &str) -> Self {
        Self::with_responses(vec![Ok(html.to_string())])
    }

    pub fn with_error(error: AppError) -> Self {
        Self::with_responses(vec![Err(error)])
    }

    pub fn with_responses(responses: Vec<Result<String, AppError>>) -> Self {
        Self {
            pages: Arc::new(Mutex::new(responses)),
            images: Arc::new(Mutex::new(Vec::new())),
            page_requests: Arc::new(Mutex::new(Vec::new())),
            image_requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_bytes(responses: Vec<Result<Vec<u8>, AppError>>) -> Self {
        let fetcher = Self::with_responses(Vec::new());
        *fetcher.images.lock().unwrap() = responses;
        fetcher
    }

    pub fn page_requests(&self) -> Vec<String> {
        self.page_requests.lock().unwrap().clone()
    }

    pub fn image_requests(&self) -> Vec<String> {
        self.image_requests.lock().unwrap().clone()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        self.page_requests.lock().unwrap().push(url.to_string());
        let mut pages = self.pages.lock().unwrap();
        if pages.is_empty() {
            Ok("<html><body>default</body></html>".to_string())
        } else {
            pages.remove(0)
        }
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, AppError> {
        self.image_requests.lock().unwrap().push(url.to_string());
        let mut images = self.images.lock().unwrap();
        if images.is_empty() {
            Ok(vec![0xFF, 0xD8, 0xFF])
        } else {
            images.remove(0)
        }
    }
}

// ---------------------------------------------------------------------------
// MockParser
// ---------------------------------------------------------------------------

/// Mock parser returning a fixed extraction and recording its input.
#[derive(Clone)]
pub struct MockParser {
    result: Arc<Mutex<Option<Result<RawExtraction, AppError>>>>,
    fallback: RawExtraction,
    pub seen: Arc<Mutex<Vec<String>>>,
}

impl MockParser {
    pub fn new(raw: RawExtraction) -> Self {
        Self {
            result: Arc::new(Mutex::new(None)),
            fallback: raw,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The first parse fails with `error`; later ones return an empty extraction.
    pub fn with_error(error: AppError) -> Self {
        Self {
            result: Arc::new(Mutex::new(Some(Err(error)))),
            fallback: RawExtraction::default(),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl PageParser for MockParser {
    fn parse(&self, html: &str) -> Result<RawExtraction, AppError> {
        self.seen.lock().unwrap().push(html.to_string());
        match self.result.lock().unwrap().take() {
            Some(result) => result,
            None => Ok(self.fallback.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// Mock extractor that pops queued results, then repeats an empty extraction.
#[derive(Clone)]
pub struct MockExtractor {
    responses: Arc<Mutex<Vec<Result<RawExtraction, AppError>>>>,
    pub urls: Arc<Mutex<Vec<String>>>,
}

impl MockExtractor {
    pub fn new(raw: RawExtraction) -> Self {
        Self::with_responses(vec![Ok(raw)])
    }

    pub fn with_error(error: AppError) -> Self {
        Self::with_responses(vec![Err(error)])
    }

    pub fn with_responses(responses: Vec<Result<RawExtraction, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            urls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl AttributeExtractor for MockExtractor {
    async fn extract(&self, url: &str) -> Result<RawExtraction, AppError> {
        self.urls.lock().unwrap().push(url.to_string());
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(RawExtraction::default())
        } else {
            responses.remove(0)
        }
    }
}

// ---------------------------------------------------------------------------
// MockStorage
// ---------------------------------------------------------------------------

/// One object written to [`MockStorage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    /// Set for by-URL writes.
    pub source_url: Option<String>,
    /// Set for by-bytes writes.
    pub bytes: Option<Vec<u8>>,
}

/// Mock object storage. Durable URLs are `https://cdn.test/{key}`.
#[derive(Clone)]
pub struct MockStorage {
    capability: StorageCapability,
    stored: Arc<Mutex<Vec<StoredObject>>>,
    calls: Arc<Mutex<usize>>,
    fail_at: Option<usize>,
}

impl MockStorage {
    fn with_capability(capability: StorageCapability) -> Self {
        Self {
            capability,
            stored: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(Mutex::new(0)),
            fail_at: None,
        }
    }

    pub fn by_bytes() -> Self {
        Self::with_capability(StorageCapability::ByBytes)
    }

    pub fn by_url() -> Self {
        Self::with_capability(StorageCapability::ByUrl)
    }

    /// Fail the store call with this zero-based call number.
    pub fn failing_at(mut self, call: usize) -> Self {
        self.fail_at = Some(call);
        self
    }

    pub fn stored(&self) -> Vec<StoredObject> {
        self.stored.lock().unwrap().clone()
    }

    fn record(&self, object: StoredObject) -> Result<String, AppError> {
        let mut calls = self.calls.lock().unwrap();
        let call = *calls;
        *calls += 1;
        if self.fail_at == Some(call) {
            return Err(AppError::StorageError(format!(
                "mock failure writing {}",
                object.key
            )));
        }
        let url = format!("https://cdn.test/{}", object.key);
        self.stored.lock().unwrap().push(object);
        Ok(url)
    }
}

impl ObjectStorage for MockStorage {
    fn capability(&self) -> StorageCapability {
        self.capability
    }

    async fn store_by_url(&self, source_url: &str, key: &str) -> Result<String, AppError> {
        self.record(StoredObject {
            key: key.to_string(),
            source_url: Some(source_url.to_string()),
            bytes: None,
        })
    }

    async fn store_by_bytes(&self, bytes: Vec<u8>, key: &str) -> Result<String, AppError> {
        self.record(StoredObject {
            key: key.to_string(),
            source_url: None,
            bytes: Some(bytes),
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryListingStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryState {
    /// Insertion order.
    listings: Vec<Listing>,
    patches: usize,
    fail_next: Option<AppError>,
}

/// Complete in-memory [`ListingStore`]. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryListingStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryListingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a zero-priced draft directly, bypassing the trait.
    pub fn insert_draft(&self, title: &str) -> Uuid {
        let now = Utc::now();
        let listing = Listing {
            id: Uuid::new_v4(),
            title: title.to_string(),
            price: Decimal::ZERO,
            currency: "RUB".to_string(),
            attributes: None,
            status: ListingStatus::Draft,
            source_url: "https://jmmoto.ru/moto/test".to_string(),
            photos: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        let id = listing.id;
        self.state.lock().unwrap().listings.push(listing);
        id
    }

    /// Make the next store call of any kind fail with `error`.
    pub fn fail_next(&self, error: AppError) {
        self.state.lock().unwrap().fail_next = Some(error);
    }

    /// Number of successful patches applied so far.
    pub fn patch_count(&self) -> usize {
        self.state.lock().unwrap().patches
    }

    /// Snapshot of every listing with photos, in insertion order.
    pub fn listings(&self) -> Vec<Listing> {
        self.state.lock().unwrap().listings.clone()
    }

    pub fn listing(&self, id: Uuid) -> Option<Listing> {
        self.state
            .lock()
            .unwrap()
            .listings
            .iter()
            .find(|l| l.id == id)
            .cloned()
    }

    fn take_failure(state: &mut MemoryState) -> Result<(), AppError> {
        match state.fail_next.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl ListingStore for MemoryListingStore {
    async fn create(&self, listing: &NewListing) -> Result<Uuid, AppError> {
        let mut state = self.state.lock().unwrap();
        Self::take_failure(&mut state)?;
        let now = Utc::now();
        let id = Uuid::new_v4();
        state.listings.push(Listing {
            id,
            title: listing.title.clone(),
            price: listing.price,
            currency: listing.currency.clone(),
            attributes: listing.attributes.clone(),
            status: listing.status,
            source_url: listing.source_url.clone(),
            photos: Vec::new(),
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    async fn patch(&self, id: Uuid, patch: &ListingPatch) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        Self::take_failure(&mut state)?;
        let listing = state
            .listings
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| AppError::NotFound(format!("listing {id}")))?;

        if let Some(expected) = patch.expected_status
            && listing.status != expected
        {
            return Err(AppError::Conflict(format!(
                "listing {id} is {}, expected {expected}",
                listing.status
            )));
        }

        if let Some(title) = &patch.title {
            listing.title = title.clone();
        }
        if let Some(price) = patch.price {
            listing.price = price;
        }
        if let Some(currency) = &patch.currency {
            listing.currency = currency.clone();
        }
        if let Some(status) = patch.status {
            listing.status = status;
        }
        if let Some(date) = &patch.arrival_date {
            listing
                .attributes
                .get_or_insert_with(Default::default)
                .arrival_date = Some(date.clone());
        }
        listing.updated_at = Utc::now();
        state.patches += 1;
        Ok(())
    }

    async fn filter(&self, filter: &ListingFilter) -> Result<Vec<Listing>, AppError> {
        let mut state = self.state.lock().unwrap();
        Self::take_failure(&mut state)?;

        let title = filter.title.as_ref().map(|t| t.to_lowercase());
        let mut found: Vec<Listing> = state
            .listings
            .iter()
            .rev()
            .filter(|l| filter.id.is_none_or(|id| l.id == id))
            .filter(|l| filter.status.is_none_or(|s| l.status == s))
            .filter(|l| {
                title
                    .as_ref()
                    .is_none_or(|t| l.title.to_lowercase().contains(t))
            })
            .filter(|l| filter.min_price.is_none_or(|p| l.price >= p))
            .filter(|l| filter.max_price.is_none_or(|p| l.price <= p))
            .cloned()
            .collect();

        // Reverse insertion order plus a stable sort gives newest first per status.
        found.sort_by_key(|l| ListingFilter::status_rank(l.status));
        if !filter.include_photos {
            for listing in &mut found {
                listing.photos.clear();
            }
        }
        Ok(found)
    }

    async fn add_photos(&self, id: Uuid, urls: &[String]) -> Result<Vec<Photo>, AppError> {
        let mut state = self.state.lock().unwrap();
        Self::take_failure(&mut state)?;
        let listing = state
            .listings
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| AppError::NotFound(format!("listing {id}")))?;

        let start = next_position(&listing.photos);
        let now = Utc::now();
        let added: Vec<Photo> = urls
            .iter()
            .zip(start..)
            .map(|(url, position)| Photo {
                id: Uuid::new_v4(),
                listing_id: id,
                url: url.clone(),
                position,
                created_at: now,
            })
            .collect();
        listing.photos.extend(added.iter().cloned());
        Ok(added)
    }

    async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        Self::take_failure(&mut state)?;
        let before = state.listings.len();
        state.listings.retain(|l| l.id != id);
        if state.listings.len() == before {
            return Err(AppError::NotFound(format!("listing {id}")));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockMessenger
// ---------------------------------------------------------------------------

/// One outbound chat operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Sent { chat: ChatId, message_id: i64, text: String },
    Edited { chat: ChatId, message_id: i64, text: String },
}

impl Outbound {
    pub fn text(&self) -> &str {
        match self {
            Outbound::Sent { text, .. } | Outbound::Edited { text, .. } => text,
        }
    }
}

/// Mock messenger recording every send and edit in order.
#[derive(Clone, Default)]
pub struct MockMessenger {
    log: Arc<Mutex<Vec<Outbound>>>,
    next_id: Arc<Mutex<i64>>,
}

impl MockMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> Vec<Outbound> {
        self.log.lock().unwrap().clone()
    }

    /// Texts of every send and edit, in order.
    pub fn texts(&self) -> Vec<String> {
        self.log().iter().map(|o| o.text().to_string()).collect()
    }

    pub fn last_text(&self) -> Option<String> {
        self.texts().pop()
    }
}

impl Messenger for MockMessenger {
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<SentMessage, AppError> {
        let message_id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            *next
        };
        self.log.lock().unwrap().push(Outbound::Sent {
            chat,
            message_id,
            text: text.to_string(),
        });
        Ok(SentMessage { chat, message_id })
    }

    async fn edit_text(&self, message: &SentMessage, text: &str) -> Result<(), AppError> {
        self.log.lock().unwrap().push(Outbound::Edited {
            chat: message.chat,
            message_id: message.message_id,
            text: text.to_string(),
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockUpdateSource
// ---------------------------------------------------------------------------

/// Mock update source serving queued batches.
///
/// Once drained it returns empty batches, cancelling `drained` first if set
/// so a runner under test stops by itself.
#[derive(Clone, Default)]
pub struct MockUpdateSource {
    batches: Arc<Mutex<Vec<Result<Vec<InboundUpdate>, AppError>>>>,
    pub offsets: Arc<Mutex<Vec<i64>>>,
    drained: Option<CancellationToken>,
}

impl MockUpdateSource {
    pub fn new(batches: Vec<Result<Vec<InboundUpdate>, AppError>>) -> Self {
        Self {
            batches: Arc::new(Mutex::new(batches)),
            ..Default::default()
        }
    }

    pub fn cancel_when_drained(mut self, token: CancellationToken) -> Self {
        self.drained = Some(token);
        self
    }
}

impl UpdateSource for MockUpdateSource {
    async fn poll(&self, offset: i64) -> Result<Vec<InboundUpdate>, AppError> {
        self.offsets.lock().unwrap().push(offset);
        let next = {
            let mut batches = self.batches.lock().unwrap();
            (!batches.is_empty()).then(|| batches.remove(0))
        };
        match next {
            Some(batch) => batch,
            None => {
                if let Some(token) = &self.drained {
                    token.cancel();
                }
                tokio::task::yield_now().await;
                Ok(Vec::new())
            }
        }
    }
}

/// Text message update from `operator`, replying in the operator's own chat.
pub fn text_update(update_id: i64, operator: i64, text: &str) -> InboundUpdate {
    InboundUpdate {
        update_id,
        message: Some(InboundMessage {
            operator: OperatorId(operator),
            chat: ChatId(operator),
            text: text.to_string(),
        }),
    }
}
