use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{AppError, Stage};
use crate::listing::ListingService;
use crate::media::{MediaAcquirer, next_position};
use crate::models::{Listing, ListingAttributes, ListingStatus, NewListing, OperatorId};
use crate::traits::{AttributeExtractor, Fetcher, ListingStore, ObjectStorage};

/// Orchestrates listing creation: extract → draft → photos → attach → reload.
///
/// Generic over all collaborators via traits, so the pipeline runs in tests
/// without HTTP, storage or a database.
///
/// A failure after the draft insert leaves the draft behind without photos.
/// That state is accepted; the operator retries with the URL or deletes it.
#[derive(Clone)]
pub struct ListingAssembler<X, G, F, L>
where
    X: AttributeExtractor,
    G: ObjectStorage,
    F: Fetcher,
    L: ListingStore,
{
    extractor: X,
    media: MediaAcquirer<G, F>,
    listings: ListingService<L>,
    currency: String,
}

impl<X, G, F, L> ListingAssembler<X, G, F, L>
where
    X: AttributeExtractor,
    G: ObjectStorage,
    F: Fetcher,
    L: ListingStore,
{
    pub fn new(
        extractor: X,
        media: MediaAcquirer<G, F>,
        store: L,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            extractor,
            media,
            listings: ListingService::new(store),
            currency: currency.into(),
        }
    }

    pub fn listings(&self) -> &ListingService<L> {
        &self.listings
    }

    /// Build a draft listing from a vendor page.
    ///
    /// Every call creates a new draft, even for a URL seen before.
    pub async fn create_from_url(
        &self,
        operator: OperatorId,
        url: &str,
    ) -> Result<Listing, AppError> {
        tracing::info!(%operator, %url, "Assembling listing");

        let raw = self
            .extractor
            .extract(url)
            .await
            .map_err(|e| AppError::at(Stage::Extract, e))?;

        let draft = NewListing {
            title: raw.title(),
            price: Decimal::ZERO,
            currency: self.currency.clone(),
            attributes: ListingAttributes::from_extraction(&raw),
            status: ListingStatus::Draft,
            source_url: url.to_string(),
        };
        let id = self
            .listings
            .store()
            .create(&draft)
            .await
            .map_err(|e| AppError::at(Stage::CreateDraft, e))?;
        tracing::info!(listing_id = %id, title = %draft.title, "Draft created");

        let durable = self
            .media
            .acquire(id, &raw.images)
            .await
            .map_err(|e| AppError::at(Stage::AcquireMedia, e))?;

        if !durable.is_empty() {
            self.listings
                .store()
                .add_photos(id, &durable)
                .await
                .map_err(|e| AppError::at(Stage::AttachPhotos, e))?;
        }

        self.listings
            .get(id)
            .await
            .map_err(|e| AppError::at(Stage::Reload, e))
    }

    /// Add more photos to an existing listing after the ones it already has.
    pub async fn append_photos(
        &self,
        id: Uuid,
        source_urls: &[String],
    ) -> Result<Listing, AppError> {
        let current = self.listings.get(id).await?;
        let start = usize::try_from(next_position(&current.photos)).unwrap_or_default();

        let durable = self
            .media
            .acquire_from(id, start, source_urls)
            .await
            .map_err(|e| AppError::at(Stage::AcquireMedia, e))?;
        if !durable.is_empty() {
            self.listings
                .store()
                .add_photos(id, &durable)
                .await
                .map_err(|e| AppError::at(Stage::AttachPhotos, e))?;
        }

        self.listings.get(id).await
    }
}
