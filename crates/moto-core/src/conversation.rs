//! Per-operator conversation that completes a draft listing.
//!
//! ```text
//! Idle --begin--> AwaitingPrice --valid price--> AwaitingArrivalDate --valid date--> Idle
//!                     ^   |                           ^   |
//!                     +---+ invalid                   +---+ invalid
//! ```
//!
//! The pending record lives in memory only and is lost on restart; drafts
//! left behind need manual follow-up.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::error::AppError;
use crate::listing::ListingService;
use crate::models::{Listing, OperatorId};
use crate::traits::ListingStore;

/// Which field the operator is being asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingField {
    Price,
    ArrivalDate,
}

impl fmt::Display for PendingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingField::Price => write!(f, "price"),
            PendingField::ArrivalDate => write!(f, "arrival date"),
        }
    }
}

/// The draft an operator is completing and the field asked for next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pending {
    pub listing_id: Uuid,
    pub field: PendingField,
}

/// Concurrency-safe map of operator → pending field.
///
/// Every method is a single critical section, so check-and-store and
/// check-and-delete are atomic. The lock is never held across an await.
#[derive(Debug, Clone, Default)]
pub struct PendingStore {
    inner: Arc<Mutex<HashMap<OperatorId, Pending>>>,
}

impl PendingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<OperatorId, Pending>> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned conversation map");
            poisoned.into_inner()
        })
    }

    pub fn get(&self, operator: OperatorId) -> Option<Pending> {
        self.lock().get(&operator).copied()
    }

    /// Store `pending` unless the operator already has a record, which is
    /// returned instead.
    pub fn insert_if_absent(&self, operator: OperatorId, pending: Pending) -> Result<(), Pending> {
        let mut map = self.lock();
        match map.get(&operator) {
            Some(existing) => Err(*existing),
            None => {
                map.insert(operator, pending);
                Ok(())
            }
        }
    }

    /// Replace the operator's record with `next` (or remove it) only if it
    /// still equals `expected`. Returns whether the swap happened.
    pub fn replace_if(
        &self,
        operator: OperatorId,
        expected: &Pending,
        next: Option<Pending>,
    ) -> bool {
        let mut map = self.lock();
        if map.get(&operator) != Some(expected) {
            return false;
        }
        match next {
            Some(next) => map.insert(operator, next),
            None => map.remove(&operator),
        };
        true
    }

    pub fn remove(&self, operator: OperatorId) -> Option<Pending> {
        self.lock().remove(&operator)
    }
}

/// Reply that cannot be accepted for the pending field. The display text
/// is shown to the operator, who is asked again.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("Неверный формат цены. Введите число, например: 500000")]
    NotANumber,

    #[error("Цена должна быть больше нуля. Введите корректную сумму")]
    NotPositive,

    #[error("Дата прибытия не может быть пустой. Например: \"15 февраля\" или \"через неделю\"")]
    ArrivalDateEmpty,

    #[error("Дата прибытия слишком длинная (максимум {max} символов)")]
    ArrivalDateTooLong { max: usize },
}

/// Parse a price reply: a positive decimal, `,` accepted as the separator.
pub fn parse_price(text: &str) -> Result<Decimal, InputError> {
    let normalized = text.trim().replace(',', ".");
    let price = Decimal::from_str(&normalized).map_err(|_| InputError::NotANumber)?;
    if price <= Decimal::ZERO {
        return Err(InputError::NotPositive);
    }
    Ok(price.normalize())
}

/// Check an arrival-date reply. The text is kept verbatim, not parsed.
pub fn validate_arrival_date(text: &str, max_len: usize) -> Result<&str, InputError> {
    if text.trim().is_empty() {
        return Err(InputError::ArrivalDateEmpty);
    }
    if text.chars().count() > max_len {
        return Err(InputError::ArrivalDateTooLong { max: max_len });
    }
    Ok(text)
}

/// Result of feeding one reply to the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Turn {
    /// Operator has nothing pending; the reply belongs to someone else.
    NotConsumed,
    /// Reply rejected; the same field is still pending.
    Rejected {
        field: PendingField,
        error: InputError,
    },
    /// Price stored; the arrival date is asked for next.
    PriceRecorded(Listing),
    /// Arrival date stored and the listing is now available.
    Published(Listing),
}

/// Drives each operator's draft through price and arrival date.
#[derive(Clone)]
pub struct ConversationMachine<L: ListingStore> {
    listings: ListingService<L>,
    pending: PendingStore,
    max_arrival_len: usize,
}

impl<L: ListingStore> ConversationMachine<L> {
    pub fn new(store: L, max_arrival_len: usize) -> Self {
        Self {
            listings: ListingService::new(store),
            pending: PendingStore::new(),
            max_arrival_len,
        }
    }

    /// Start asking `operator` for the price of a fresh draft.
    ///
    /// Refused with `Conflict` while the operator is still completing
    /// another draft; that draft must be finished or abandoned first.
    pub fn begin(&self, operator: OperatorId, listing_id: Uuid) -> Result<(), AppError> {
        let pending = Pending {
            listing_id,
            field: PendingField::Price,
        };
        self.pending
            .insert_if_absent(operator, pending)
            .map_err(|existing| {
                AppError::Conflict(format!(
                    "operator {operator} is still entering the {} of listing {}",
                    existing.field, existing.listing_id
                ))
            })?;
        tracing::info!(%operator, %listing_id, "Awaiting price");
        Ok(())
    }

    pub fn state(&self, operator: OperatorId) -> Option<Pending> {
        self.pending.get(operator)
    }

    /// Drop whatever the operator was being asked for. The draft stays.
    pub fn abandon(&self, operator: OperatorId) -> Option<Pending> {
        let dropped = self.pending.remove(operator);
        if let Some(p) = &dropped {
            tracing::info!(%operator, listing_id = %p.listing_id, field = %p.field, "Conversation abandoned");
        }
        dropped
    }

    /// Feed one operator reply.
    ///
    /// Persistence failures abort the conversation: the pending record is
    /// cleared and the error returned.
    pub async fn handle_reply(&self, operator: OperatorId, text: &str) -> Result<Turn, AppError> {
        let Some(pending) = self.pending.get(operator) else {
            return Ok(Turn::NotConsumed);
        };

        match pending.field {
            PendingField::Price => {
                let price = match parse_price(text) {
                    Ok(price) => price,
                    Err(error) => {
                        tracing::debug!(%operator, %error, "Price reply rejected");
                        return Ok(Turn::Rejected {
                            field: pending.field,
                            error,
                        });
                    }
                };

                let listing = self
                    .commit(operator, &pending, self.listings.set_price(pending.listing_id, price))
                    .await?;
                let next = Pending {
                    listing_id: pending.listing_id,
                    field: PendingField::ArrivalDate,
                };
                if !self.pending.replace_if(operator, &pending, Some(next)) {
                    tracing::warn!(%operator, "Pending field changed while recording price");
                }
                Ok(Turn::PriceRecorded(listing))
            }
            PendingField::ArrivalDate => {
                let arrival_date = match validate_arrival_date(text, self.max_arrival_len) {
                    Ok(date) => date,
                    Err(error) => {
                        tracing::debug!(%operator, %error, "Arrival date reply rejected");
                        return Ok(Turn::Rejected {
                            field: pending.field,
                            error,
                        });
                    }
                };

                let listing = self
                    .commit(
                        operator,
                        &pending,
                        self.listings.publish(pending.listing_id, arrival_date),
                    )
                    .await?;
                self.pending.replace_if(operator, &pending, None);
                Ok(Turn::Published(listing))
            }
        }
    }

    async fn commit(
        &self,
        operator: OperatorId,
        pending: &Pending,
        write: impl Future<Output = Result<Listing, AppError>>,
    ) -> Result<Listing, AppError> {
        match write.await {
            Ok(listing) => Ok(listing),
            Err(e) => {
                tracing::error!(%operator, listing_id = %pending.listing_id, error = %e, "Failed to record {}", pending.field);
                self.pending.replace_if(operator, pending, None);
                Err(e)
            }
        }
    }
}
