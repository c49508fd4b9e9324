use std::future::Future;

use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    ChatId, InboundUpdate, Listing, ListingFilter, ListingPatch, NewListing, Photo,
    RawExtraction, SentMessage,
};

/// Downloads vendor pages and images.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String, AppError>> + Send;

    fn fetch_bytes(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, AppError>> + Send;
}

/// Turns a vendor page into a [`RawExtraction`].
pub trait PageParser: Send + Sync + Clone {
    fn parse(&self, html: &str) -> Result<RawExtraction, AppError>;
}

/// Produces structured attributes for a listing page URL.
pub trait AttributeExtractor: Send + Sync + Clone {
    fn extract(&self, url: &str) -> impl Future<Output = Result<RawExtraction, AppError>> + Send;
}

/// How an [`ObjectStorage`] backend wants to receive images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageCapability {
    /// The backend downloads the source URL itself.
    ByUrl,
    /// The caller downloads the image and hands over the bytes.
    ByBytes,
}

/// Durable object storage for listing photos.
pub trait ObjectStorage: Send + Sync + Clone {
    fn capability(&self) -> StorageCapability;

    /// Store the image found at `source_url` under `key`. Returns the durable URL.
    fn store_by_url(
        &self,
        source_url: &str,
        key: &str,
    ) -> impl Future<Output = Result<String, AppError>> + Send;

    /// Store raw image bytes under `key`. Returns the durable URL.
    fn store_by_bytes(
        &self,
        bytes: Vec<u8>,
        key: &str,
    ) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Persists listings and their photos.
pub trait ListingStore: Send + Sync + Clone {
    /// Insert a listing without photos. Returns the assigned id.
    fn create(&self, listing: &NewListing) -> impl Future<Output = Result<Uuid, AppError>> + Send;

    /// Apply a partial update atomically. `NotFound` if the listing is gone,
    /// `Conflict` if `expected_status` does not match.
    fn patch(
        &self,
        id: Uuid,
        patch: &ListingPatch,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn filter(
        &self,
        filter: &ListingFilter,
    ) -> impl Future<Output = Result<Vec<Listing>, AppError>> + Send;

    /// Append photos after the current highest position (or from 0).
    fn add_photos(
        &self,
        id: Uuid,
        urls: &[String],
    ) -> impl Future<Output = Result<Vec<Photo>, AppError>> + Send;

    /// Delete a listing; its photos go with it.
    fn delete(&self, id: Uuid) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Outbound side of the operator chat.
pub trait Messenger: Send + Sync + Clone {
    fn send_text(
        &self,
        chat: ChatId,
        text: &str,
    ) -> impl Future<Output = Result<SentMessage, AppError>> + Send;

    fn edit_text(
        &self,
        message: &SentMessage,
        text: &str,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Inbound side of the operator chat.
pub trait UpdateSource: Send + Sync + Clone {
    /// Long-poll for updates with `update_id >= offset`.
    fn poll(&self, offset: i64) -> impl Future<Output = Result<Vec<InboundUpdate>, AppError>> + Send;
}
