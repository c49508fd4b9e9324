//! Photo acquisition: copies vendor-hosted images into durable storage.
//!
//! Storage keys are deterministic (`listings/{id}/{index}`), so a listing
//! id must exist before its photos can be stored. A batch is
//! all-or-nothing: the first failing photo aborts it and nothing is
//! returned for the photos stored before it.

use uuid::Uuid;

use crate::error::AppError;
use crate::models::Photo;
use crate::traits::{Fetcher, ObjectStorage, StorageCapability};

/// Storage key of the photo at `index` of a listing.
pub fn photo_key(listing_id: Uuid, index: usize) -> String {
    format!("listings/{listing_id}/{index}")
}

/// Position the next appended photo receives: highest existing + 1, or 0.
pub fn next_position(photos: &[Photo]) -> i32 {
    photos
        .iter()
        .map(|p| p.position)
        .max()
        .map_or(0, |max| max + 1)
}

/// Fetches remote images and persists them through an [`ObjectStorage`].
#[derive(Clone)]
pub struct MediaAcquirer<G, F>
where
    G: ObjectStorage,
    F: Fetcher,
{
    storage: G,
    fetcher: F,
}

impl<G, F> MediaAcquirer<G, F>
where
    G: ObjectStorage,
    F: Fetcher,
{
    pub fn new(storage: G, fetcher: F) -> Self {
        Self { storage, fetcher }
    }

    /// Store `source_urls` for a fresh listing. Durable URLs come back in
    /// input order.
    pub async fn acquire(
        &self,
        listing_id: Uuid,
        source_urls: &[String],
    ) -> Result<Vec<String>, AppError> {
        self.acquire_from(listing_id, 0, source_urls).await
    }

    /// Like [`acquire`](Self::acquire), numbering keys from `start` so an
    /// appended batch does not overwrite photos already stored.
    pub async fn acquire_from(
        &self,
        listing_id: Uuid,
        start: usize,
        source_urls: &[String],
    ) -> Result<Vec<String>, AppError> {
        let mut durable = Vec::with_capacity(source_urls.len());

        for (offset, source_url) in source_urls.iter().enumerate() {
            let index = start + offset;
            let key = photo_key(listing_id, index);
            let stored = self
                .store_one(source_url, &key)
                .await
                .map_err(|e| AppError::MediaError {
                    index,
                    message: e.to_string(),
                })?;
            tracing::debug!(%listing_id, index, %key, "Photo stored");
            durable.push(stored);
        }

        tracing::info!(%listing_id, count = durable.len(), "Photos acquired");
        Ok(durable)
    }

    async fn store_one(&self, source_url: &str, key: &str) -> Result<String, AppError> {
        match self.storage.capability() {
            StorageCapability::ByUrl => self.storage.store_by_url(source_url, key).await,
            StorageCapability::ByBytes => {
                let bytes = self.fetcher.fetch_bytes(source_url).await?;
                self.storage.store_by_bytes(bytes, key).await
            }
        }
    }
}
