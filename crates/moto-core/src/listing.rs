use rust_decimal::Decimal;
use uuid::Uuid;

use crate::conversation::InputError;
use crate::error::AppError;
use crate::models::{Listing, ListingFilter, ListingPatch, ListingStatus};
use crate::traits::ListingStore;

/// Status-aware operations on stored listings.
///
/// Every status write goes through here, carrying the status it expects
/// to replace so the store can refuse a stale transition.
#[derive(Clone)]
pub struct ListingService<L: ListingStore> {
    store: L,
}

impl<L: ListingStore> ListingService<L> {
    pub fn new(store: L) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &L {
        &self.store
    }

    /// Fetch one listing with its photos.
    pub async fn get(&self, id: Uuid) -> Result<Listing, AppError> {
        self.store
            .filter(&ListingFilter::by_id(id))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(format!("listing {id}")))
    }

    /// Catalog query; photos are always loaded.
    pub async fn list(&self, filter: ListingFilter) -> Result<Vec<Listing>, AppError> {
        self.store.filter(&filter.with_photos()).await
    }

    /// Record the asking price of a draft. The status is left alone.
    pub async fn set_price(&self, id: Uuid, price: Decimal) -> Result<Listing, AppError> {
        if price <= Decimal::ZERO {
            return Err(InputError::NotPositive.into());
        }
        let patch = ListingPatch {
            price: Some(price),
            expected_status: Some(ListingStatus::Draft),
            ..Default::default()
        };
        self.store.patch(id, &patch).await?;
        tracing::info!(listing_id = %id, %price, "Price recorded");
        self.get(id).await
    }

    /// Store the arrival date and make the draft public in one write.
    pub async fn publish(&self, id: Uuid, arrival_date: &str) -> Result<Listing, AppError> {
        let patch = ListingPatch {
            arrival_date: Some(arrival_date.to_string()),
            status: Some(ListingStatus::Available),
            expected_status: Some(ListingStatus::Draft),
            ..Default::default()
        };
        self.store.patch(id, &patch).await?;
        tracing::info!(listing_id = %id, "Listing published");
        self.get(id).await
    }

    /// Administrative status change among the public statuses.
    pub async fn change_status(&self, id: Uuid, to: ListingStatus) -> Result<Listing, AppError> {
        let current = self.get(id).await?;
        if !current.status.is_public() || !current.status.can_transition_to(to) {
            return Err(AppError::InvalidTransition {
                from: current.status,
                to,
            });
        }
        let patch = ListingPatch {
            status: Some(to),
            expected_status: Some(current.status),
            ..Default::default()
        };
        self.store.patch(id, &patch).await?;
        tracing::info!(listing_id = %id, from = %current.status, %to, "Listing status changed");
        self.get(id).await
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        self.store.delete(id).await?;
        tracing::info!(listing_id = %id, "Listing deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;

    #[tokio::test]
    async fn set_price_keeps_draft_status() {
        let store = MemoryListingStore::new();
        let id = store.insert_draft("Honda CB500X 2021");
        let service = ListingService::new(store);

        let listing = service.set_price(id, Decimal::from(450_000)).await.unwrap();

        assert_eq!(listing.price, Decimal::from(450_000));
        assert_eq!(listing.status, ListingStatus::Draft);
    }

    #[tokio::test]
    async fn set_price_rejects_non_positive() {
        let store = MemoryListingStore::new();
        let id = store.insert_draft("Honda CB500X 2021");
        let service = ListingService::new(store);

        let err = service.set_price(id, Decimal::ZERO).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(InputError::NotPositive)));

        let err = service.set_price(id, Decimal::new(-5, 0)).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert!(!err.is_retryable());
        assert_eq!(
            service.get(id).await.unwrap().price,
            Decimal::ZERO,
            "rejected price must not be written"
        );
    }

    #[tokio::test]
    async fn publish_writes_date_and_status_together() {
        let store = MemoryListingStore::new();
        let id = store.insert_draft("Honda CB500X 2021");
        let service = ListingService::new(store.clone());

        let listing = service.publish(id, "через неделю").await.unwrap();

        assert_eq!(listing.status, ListingStatus::Available);
        assert_eq!(listing.arrival_date(), Some("через неделю"));
        assert_eq!(store.patch_count(), 1);
    }

    #[tokio::test]
    async fn publish_twice_conflicts() {
        let store = MemoryListingStore::new();
        let id = store.insert_draft("Honda CB500X 2021");
        let service = ListingService::new(store);

        service.publish(id, "завтра").await.unwrap();
        let err = service.publish(id, "послезавтра").await.unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(service.get(id).await.unwrap().arrival_date(), Some("завтра"));
    }

    #[tokio::test]
    async fn change_status_follows_transition_rules() {
        let store = MemoryListingStore::new();
        let id = store.insert_draft("Ducati Monster 2019");
        let service = ListingService::new(store);

        let err = service
            .change_status(id, ListingStatus::Sold)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));

        service.publish(id, "в наличии").await.unwrap();
        let listing = service
            .change_status(id, ListingStatus::Reserved)
            .await
            .unwrap();
        assert_eq!(listing.status, ListingStatus::Reserved);

        let err = service
            .change_status(id, ListingStatus::Draft)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn get_missing_listing_is_not_found() {
        let service = ListingService::new(MemoryListingStore::new());
        let err = service.get(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
