use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Pool, Postgres, QueryBuilder};
use uuid::Uuid;

use moto_core::error::AppError;
use moto_core::models::{
    Listing, ListingAttributes, ListingFilter, ListingPatch, ListingStatus, NewListing, Photo,
};
use moto_core::traits::ListingStore;

/// SQLSTATE `query_canceled`, raised when `statement_timeout` fires.
const QUERY_CANCELED: &str = "57014";

const LISTING_COLUMNS: &str =
    "id, title, price, currency, attributes, status, source_url, created_at, updated_at";

/// PostgreSQL-backed listing store.
///
/// Every patch is a single `UPDATE`, so status compare-and-set and the
/// attribute merge happen atomically. Photo positions are allocated under a
/// row lock on the parent listing. A statement cancelled by the server's
/// `statement_timeout` surfaces as [`AppError::Timeout`].
#[derive(Clone)]
pub struct ListingRepository {
    pool: Pool<Postgres>,
    statement_timeout: Duration,
}

impl ListingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            statement_timeout: Duration::ZERO,
        }
    }

    /// Record the `statement_timeout` the pool's sessions run with.
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    fn db_error(&self, action: &str, e: sqlx::Error) -> AppError {
        let cancelled = e
            .as_database_error()
            .and_then(|db| db.code())
            .is_some_and(|code| code == QUERY_CANCELED);
        if cancelled {
            tracing::warn!(
                action,
                timeout_secs = self.statement_timeout.as_secs(),
                "Statement timed out"
            );
            return AppError::Timeout(self.statement_timeout.as_secs());
        }
        AppError::DatabaseError(format!("{action}: {e}"))
    }

    async fn load_photos(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<Photo>>, AppError> {
        let rows = sqlx::query_as::<_, PhotoRow>(
            r#"
            SELECT id, listing_id, url, position, created_at
            FROM listing_photos
            WHERE listing_id = ANY($1)
            ORDER BY listing_id, position
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| self.db_error("Failed to load photos", e))?;

        let mut photos: HashMap<Uuid, Vec<Photo>> = HashMap::new();
        for row in rows {
            photos.entry(row.listing_id).or_default().push(row.into());
        }
        Ok(photos)
    }
}

// -- Internal row types for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct ListingRow {
    id: Uuid,
    title: String,
    price: Decimal,
    currency: String,
    attributes: Option<serde_json::Value>,
    status: String,
    source_url: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ListingRow> for Listing {
    type Error = AppError;

    fn try_from(row: ListingRow) -> Result<Self, AppError> {
        let status = row
            .status
            .parse::<ListingStatus>()
            .map_err(AppError::DatabaseError)?;
        let attributes = row
            .attributes
            .map(serde_json::from_value::<ListingAttributes>)
            .transpose()?;

        Ok(Listing {
            id: row.id,
            title: row.title,
            price: row.price,
            currency: row.currency,
            attributes,
            status,
            source_url: row.source_url,
            photos: Vec::new(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PhotoRow {
    id: Uuid,
    listing_id: Uuid,
    url: String,
    position: i32,
    created_at: DateTime<Utc>,
}

impl From<PhotoRow> for Photo {
    fn from(row: PhotoRow) -> Self {
        Photo {
            id: row.id,
            listing_id: row.listing_id,
            url: row.url,
            position: row.position,
            created_at: row.created_at,
        }
    }
}

impl ListingStore for ListingRepository {
    async fn create(&self, listing: &NewListing) -> Result<Uuid, AppError> {
        let attributes = listing
            .attributes
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO listings (title, price, currency, attributes, status, source_url)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(&listing.title)
        .bind(listing.price)
        .bind(&listing.currency)
        .bind(attributes)
        .bind(listing.status.as_str())
        .bind(&listing.source_url)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| self.db_error("Failed to create listing", e))?;

        tracing::debug!(listing_id = %id, status = %listing.status, "Listing inserted");
        Ok(id)
    }

    async fn patch(&self, id: Uuid, patch: &ListingPatch) -> Result<(), AppError> {
        let updated = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE listings
            SET title = COALESCE($2, title),
                price = COALESCE($3, price),
                currency = COALESCE($4, currency),
                status = COALESCE($5, status),
                attributes = CASE
                    WHEN $6::text IS NULL THEN attributes
                    ELSE COALESCE(attributes, '{}'::jsonb)
                         || jsonb_build_object('arrival_date', $6::text)
                END,
                updated_at = NOW()
            WHERE id = $1
              AND ($7::text IS NULL OR status = $7::text)
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(patch.title.as_deref())
        .bind(patch.price)
        .bind(patch.currency.as_deref())
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.arrival_date.as_deref())
        .bind(patch.expected_status.map(|s| s.as_str()))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| self.db_error("Failed to update listing", e))?;

        if updated.is_some() {
            return Ok(());
        }

        // Nothing matched: either the row is gone or its status moved on.
        let current = sqlx::query_scalar::<_, String>("SELECT status FROM listings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.db_error("Failed to load listing", e))?;

        match (current, patch.expected_status) {
            (None, _) => Err(AppError::NotFound(format!("listing {id}"))),
            (Some(status), Some(expected)) => Err(AppError::Conflict(format!(
                "listing {id} is {status}, expected {expected}"
            ))),
            (Some(_), None) => Err(AppError::DatabaseError(format!(
                "Update of listing {id} matched no row"
            ))),
        }
    }

    async fn filter(&self, filter: &ListingFilter) -> Result<Vec<Listing>, AppError> {
        let mut query =
            QueryBuilder::<Postgres>::new(format!("SELECT {LISTING_COLUMNS} FROM listings WHERE TRUE"));

        if let Some(id) = filter.id {
            query.push(" AND id = ").push_bind(id);
        }
        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(title) = &filter.title {
            query
                .push(" AND strpos(lower(title), lower(")
                .push_bind(title.as_str())
                .push(")) > 0");
        }
        if let Some(min) = filter.min_price {
            query.push(" AND price >= ").push_bind(min);
        }
        if let Some(max) = filter.max_price {
            query.push(" AND price <= ").push_bind(max);
        }
        query.push(
            " ORDER BY CASE status \
               WHEN 'available' THEN 1 \
               WHEN 'reserved' THEN 2 \
               WHEN 'sold' THEN 3 \
               ELSE 4 END, \
             created_at DESC",
        );

        let rows = query
            .build_query_as::<ListingRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.db_error("Failed to query listings", e))?;

        let mut listings = rows
            .into_iter()
            .map(Listing::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        if filter.include_photos && !listings.is_empty() {
            let ids: Vec<Uuid> = listings.iter().map(|l| l.id).collect();
            let mut photos = self.load_photos(&ids).await?;
            for listing in &mut listings {
                listing.photos = photos.remove(&listing.id).unwrap_or_default();
            }
        }
        Ok(listings)
    }

    async fn add_photos(&self, id: Uuid, urls: &[String]) -> Result<Vec<Photo>, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| self.db_error("Failed to begin transaction", e))?;

        // Serialises concurrent appends to the same listing.
        let locked = sqlx::query_scalar::<_, Uuid>("SELECT id FROM listings WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| self.db_error("Failed to lock listing", e))?;
        if locked.is_none() {
            return Err(AppError::NotFound(format!("listing {id}")));
        }

        let start = sqlx::query_scalar::<_, i32>(
            "SELECT COALESCE(MAX(position), -1) + 1 FROM listing_photos WHERE listing_id = $1",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| self.db_error("Failed to read photo positions", e))?;

        let mut added = Vec::with_capacity(urls.len());
        for (url, position) in urls.iter().zip(start..) {
            let row = sqlx::query_as::<_, PhotoRow>(
                r#"
                INSERT INTO listing_photos (listing_id, url, position)
                VALUES ($1, $2, $3)
                RETURNING id, listing_id, url, position, created_at
                "#,
            )
            .bind(id)
            .bind(url)
            .bind(position)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| self.db_error("Failed to insert photo", e))?;
            added.push(Photo::from(row));
        }

        tx.commit()
            .await
            .map_err(|e| self.db_error("Failed to commit photos", e))?;

        tracing::debug!(listing_id = %id, count = added.len(), first_position = start, "Photos attached");
        Ok(added)
    }

    async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM listings WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| self.db_error("Failed to delete listing", e))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("listing {id}")));
        }
        Ok(())
    }
}
