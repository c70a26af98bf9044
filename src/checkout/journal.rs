//! Reservation journal: makes the decrement-before-order window observable.
//!
//! If a checkout dies after decrementing stock but before the order (or the
//! compensating increments) lands, the open journal entry is the evidence a
//! background reconciler needs to either complete the order or release the
//! stock. This core only records the window; reconciliation itself is an
//! external collaborator.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::ProductId;
use crate::store::{Result, StoreError};

/// Where a checkout attempt's stock movement stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationState {
    /// Stock is (or is about to be) decremented with no order persisted.
    Open,
    /// The order landed; the decrement is accounted for.
    Completed { order_number: String },
    /// The decrement was reversed.
    Released,
}

/// One checkout attempt's stock movements.
#[derive(Debug, Clone)]
pub struct ReservationEntry {
    pub attempt_id: Uuid,
    pub user_id: String,
    pub lines: Vec<(ProductId, u32)>,
    pub state: ReservationState,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Interface for recording checkout stock movements.
#[async_trait]
pub trait ReservationJournal: Send + Sync {
    /// Record an attempt before its first decrement.
    async fn open(&self, attempt_id: Uuid, user_id: &str, lines: Vec<(ProductId, u32)>)
        -> Result<()>;

    /// The attempt's order persisted; the movement is settled.
    async fn mark_completed(&self, attempt_id: Uuid, order_number: &str) -> Result<()>;

    /// The attempt's decrements were reversed.
    async fn mark_released(&self, attempt_id: Uuid) -> Result<()>;

    /// Entries still open: decremented stock with no matching order.
    async fn open_entries(&self) -> Result<Vec<ReservationEntry>>;
}

/// In-memory journal.
#[derive(Default)]
pub struct MemoryReservationJournal {
    entries: RwLock<HashMap<Uuid, ReservationEntry>>,
}

impl MemoryReservationJournal {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReservationJournal for MemoryReservationJournal {
    async fn open(
        &self,
        attempt_id: Uuid,
        user_id: &str,
        lines: Vec<(ProductId, u32)>,
    ) -> Result<()> {
        self.entries.write().await.insert(
            attempt_id,
            ReservationEntry {
                attempt_id,
                user_id: user_id.to_string(),
                lines,
                state: ReservationState::Open,
                opened_at: Utc::now(),
                closed_at: None,
            },
        );
        Ok(())
    }

    async fn mark_completed(&self, attempt_id: Uuid, order_number: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(&attempt_id)
            .ok_or_else(|| StoreError::Unavailable(format!("unknown attempt {attempt_id}")))?;
        entry.state = ReservationState::Completed {
            order_number: order_number.to_string(),
        };
        entry.closed_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_released(&self, attempt_id: Uuid) -> Result<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(&attempt_id)
            .ok_or_else(|| StoreError::Unavailable(format!("unknown attempt {attempt_id}")))?;
        entry.state = ReservationState::Released;
        entry.closed_at = Some(Utc::now());
        Ok(())
    }

    async fn open_entries(&self) -> Result<Vec<ReservationEntry>> {
        Ok(self
            .entries
            .read()
            .await
            .values()
            .filter(|e| e.state == ReservationState::Open)
            .cloned()
            .collect())
    }
}
