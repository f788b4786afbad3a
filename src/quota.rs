//! Per-user daily generation quota.
//!
//! The quota day is the UTC calendar date, so a user generating at 23:59 and
//! 00:01 UTC lands on two different days. Check and decrement are separate
//! calls; two concurrent requests from one user can both pass `check` before
//! either decrements and push usage past the limit.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::{debug, error};

use crate::models::QuotaStatus;
use crate::store::QuotaStore;

pub const DAILY_LIMIT: u32 = 3;

#[derive(Clone)]
pub struct QuotaLedger {
    store: Arc<dyn QuotaStore>,
    limit: u32,
}

impl QuotaLedger {
    pub fn new(store: Arc<dyn QuotaStore>) -> Self {
        Self { store, limit: DAILY_LIMIT }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    pub async fn check(&self, user_id: &str) -> QuotaStatus {
        self.check_on(user_id, Self::today()).await
    }

    /// Fails open: a store error admits the user with a full allowance.
    pub async fn check_on(&self, user_id: &str, day: NaiveDate) -> QuotaStatus {
        match self.store.used(user_id, day).await {
            Ok(used) => {
                let remaining = self.limit.saturating_sub(used);
                debug!(user_id, %day, used, remaining, "Quota checked");
                QuotaStatus { allowed: remaining > 0, remaining }
            }
            Err(e) => {
                error!(user_id, error = %e, "Quota check error, failing open");
                QuotaStatus { allowed: true, remaining: self.limit }
            }
        }
    }

    /// Charges one generation. Not idempotent: call once per successful
    /// generation.
    pub async fn decrement(&self, user_id: &str) {
        self.decrement_on(user_id, Self::today()).await
    }

    pub async fn decrement_on(&self, user_id: &str, day: NaiveDate) {
        match self.store.increment(user_id, day).await {
            Ok(used) => debug!(user_id, %day, used, "Quota charged"),
            Err(e) => error!(user_id, error = %e, "Quota decrement error"),
        }
    }
}
