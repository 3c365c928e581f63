use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::aggregate::{
    listing_summary, orders_for_user, ready_for_collection, ListingSummaryEntry, UsernameQuery,
};
use crate::booking::{Booking, BookingDraft, BookingStore};
use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::fetcher::SheetFetcher;
use crate::records::{Dataset, OrderRecord, SlotRecord};
use crate::slots::{partition_slots, SlotPartition, SlotSelection};
use crate::tokenizer::{self, RawRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Sheet {
    Orders,
    Meetup,
}

impl Sheet {
    pub fn dataset_name(&self) -> &'static str {
        match self {
            Sheet::Orders => "orders data",
            Sheet::Meetup => "meetup data",
        }
    }

    /// Orders need a header plus at least one data row; the slot sheet only
    /// needs to be non-empty.
    fn min_rows(&self) -> usize {
        match self {
            Sheet::Orders => 2,
            Sheet::Meetup => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPhase {
    NotLoaded,
    Loading,
    Loaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    Cached,
    /// Another load for the same sheet is still running; nothing was started.
    InFlight,
}

#[derive(Debug)]
pub struct OrdersSnapshot {
    pub dataset: Dataset<OrderRecord>,
    pub summary: Vec<ListingSummaryEntry>,
}

impl OrdersSnapshot {
    fn build(rows: Vec<RawRow>) -> Self {
        let dataset = Dataset::from_rows(rows);
        let summary = listing_summary(dataset.records());
        Self { dataset, summary }
    }
}

#[derive(Debug)]
pub struct SlotsSnapshot {
    pub dataset: Dataset<SlotRecord>,
    pub partition: SlotPartition,
}

impl SlotsSnapshot {
    fn build(rows: Vec<RawRow>) -> Self {
        let dataset = Dataset::from_rows(rows);
        let partition = partition_slots(dataset.records());
        Self { dataset, partition }
    }
}

struct SheetSlot<T> {
    phase: LoadPhase,
    snapshot: Option<Arc<T>>,
    retry_attempts: u32,
}

impl<T> SheetSlot<T> {
    fn new() -> Self {
        Self {
            phase: LoadPhase::NotLoaded,
            snapshot: None,
            retry_attempts: 0,
        }
    }

    fn invalidate(&mut self) {
        if self.phase == LoadPhase::Loaded {
            self.phase = LoadPhase::NotLoaded;
            self.snapshot = None;
        }
    }

    fn next_retry(&mut self, ceiling: u32) -> Option<u32> {
        if self.retry_attempts >= ceiling {
            return None;
        }
        self.retry_attempts += 1;
        Some(self.retry_attempts)
    }
}

/// Per-session data owned by the desk: one slot per sheet, each replaced
/// wholesale when a load completes.
pub struct SessionState {
    orders: Mutex<SheetSlot<OrdersSnapshot>>,
    meetup: Mutex<SheetSlot<SlotsSnapshot>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            orders: Mutex::new(SheetSlot::new()),
            meetup: Mutex::new(SheetSlot::new()),
        }
    }

    pub fn phase(&self, sheet: Sheet) -> LoadPhase {
        match sheet {
            Sheet::Orders => self.orders.lock().phase,
            Sheet::Meetup => self.meetup.lock().phase,
        }
    }

    pub fn invalidate(&self, sheet: Sheet) {
        match sheet {
            Sheet::Orders => self.orders.lock().invalidate(),
            Sheet::Meetup => self.meetup.lock().invalidate(),
        }
    }

    fn next_retry(&self, sheet: Sheet, ceiling: u32) -> Option<u32> {
        match sheet {
            Sheet::Orders => self.orders.lock().next_retry(ceiling),
            Sheet::Meetup => self.meetup.lock().next_retry(ceiling),
        }
    }

    fn reset_retries(&self, sheet: Sheet) {
        match sheet {
            Sheet::Orders => self.orders.lock().retry_attempts = 0,
            Sheet::Meetup => self.meetup.lock().retry_attempts = 0,
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Puts a sheet back to `NotLoaded` if its load is dropped before finishing.
struct LoadingGuard<'a, T> {
    slot: &'a Mutex<SheetSlot<T>>,
    armed: bool,
}

impl<T> LoadingGuard<'_, T> {
    fn complete(mut self, snapshot: T) {
        let mut slot = self.slot.lock();
        slot.snapshot = Some(Arc::new(snapshot));
        slot.phase = LoadPhase::Loaded;
        slot.retry_attempts = 0;
        self.armed = false;
    }
}

impl<T> Drop for LoadingGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            self.slot.lock().phase = LoadPhase::NotLoaded;
        }
    }
}

pub struct OrderDesk {
    config: AppConfig,
    fetcher: SheetFetcher,
    state: SessionState,
}

impl OrderDesk {
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let fetcher = SheetFetcher::new(&config)?;
        Ok(Self::with_fetcher(config, fetcher))
    }

    pub fn with_fetcher(config: AppConfig, fetcher: SheetFetcher) -> Self {
        Self {
            config,
            fetcher,
            state: SessionState::new(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn phase(&self, sheet: Sheet) -> LoadPhase {
        self.state.phase(sheet)
    }

    /// Single load attempt. A sheet that is loaded or already loading is left alone.
    pub async fn load(&self, sheet: Sheet) -> AppResult<LoadOutcome> {
        match sheet {
            Sheet::Orders => {
                load_into(&self.state.orders, self.fetch_rows(sheet), OrdersSnapshot::build).await
            }
            Sheet::Meetup => {
                load_into(&self.state.meetup, self.fetch_rows(sheet), SlotsSnapshot::build).await
            }
        }
    }

    pub async fn load_orders(&self) -> AppResult<LoadOutcome> {
        self.load(Sheet::Orders).await
    }

    pub async fn load_slots(&self) -> AppResult<LoadOutcome> {
        self.load(Sheet::Meetup).await
    }

    /// Loads a sheet, retrying load failures with a linearly growing delay
    /// until the configured ceiling is reached.
    pub async fn load_with_retry(&self, sheet: Sheet) -> AppResult<LoadOutcome> {
        loop {
            match self.load(sheet).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) if err.is_load_failure() => {
                    let ceiling = self.config.retry_count;
                    let Some(attempt) = self.state.next_retry(sheet, ceiling) else {
                        warn!(
                            target: "session",
                            dataset = sheet.dataset_name(),
                            error = %err,
                            "giving up after {ceiling} retries"
                        );
                        return Err(err);
                    };
                    warn!(
                        target: "session",
                        dataset = sheet.dataset_name(),
                        error = %err,
                        "{}",
                        err.user_message()
                    );
                    sleep(self.config.retry_delay() * attempt).await;
                    info!(
                        target: "session",
                        dataset = sheet.dataset_name(),
                        attempt,
                        "retrying {} load (attempt {attempt}/{ceiling})",
                        sheet.dataset_name()
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub fn invalidate(&self, sheet: Sheet) {
        self.state.invalidate(sheet);
    }

    /// Drops the cached sheet and loads it again with a fresh retry budget.
    pub async fn refresh(&self, sheet: Sheet) -> AppResult<LoadOutcome> {
        info!(target: "session", dataset = sheet.dataset_name(), "refreshing");
        self.state.invalidate(sheet);
        self.state.reset_retries(sheet);
        self.load_with_retry(sheet).await
    }

    pub fn orders_snapshot(&self) -> Option<Arc<OrdersSnapshot>> {
        self.state.orders.lock().snapshot.clone()
    }

    pub fn slots_snapshot(&self) -> Option<Arc<SlotsSnapshot>> {
        self.state.meetup.lock().snapshot.clone()
    }

    /// When the orders sheet was last fetched successfully.
    pub fn last_synced(&self) -> Option<DateTime<Utc>> {
        self.orders_snapshot()
            .map(|snapshot| snapshot.dataset.loaded_at())
    }

    pub async fn listing_summary(&self) -> AppResult<Vec<ListingSummaryEntry>> {
        let snapshot = self.ensure_orders().await?;
        Ok(snapshot.summary.clone())
    }

    pub async fn orders_for(&self, username: &str) -> AppResult<Vec<OrderRecord>> {
        let query = UsernameQuery::parse(username)?;
        let snapshot = self.ensure_orders().await?;
        Ok(orders_for_user(snapshot.dataset.records(), &query)
            .into_iter()
            .cloned()
            .collect())
    }

    pub async fn slots(&self) -> AppResult<SlotPartition> {
        self.load_with_retry(Sheet::Meetup).await?;
        let snapshot = self.slots_snapshot().ok_or_else(|| AppError::NotLoaded {
            dataset: Sheet::Meetup.dataset_name().to_string(),
        })?;
        Ok(snapshot.partition.clone())
    }

    /// Listings the user may collect at the selected slot.
    pub async fn ready_for_collection(
        &self,
        selection: &SlotSelection,
        username: &str,
    ) -> AppResult<Vec<String>> {
        let query = UsernameQuery::parse(username)?;
        let snapshot = self.ensure_orders().await?;
        let listings: Vec<String> = ready_for_collection(snapshot.dataset.records(), &query)
            .into_iter()
            .map(|record| record.listing.clone())
            .collect();
        info!(
            target: "session",
            username = query.as_str(),
            date = %selection.date,
            ready = listings.len(),
            "resolved ready-for-collection listings"
        );
        Ok(listings)
    }

    /// Confirms a booking for listings that are ready for collection.
    pub async fn confirm_booking(
        &self,
        store: &BookingStore,
        selection: &SlotSelection,
        username: &str,
        listings: &[String],
    ) -> AppResult<Booking> {
        let ready = self.ready_for_collection(selection, username).await?;
        if let Some(unknown) = listings.iter().find(|listing| !ready.contains(listing)) {
            return Err(AppError::Validation(format!(
                "{unknown} is not ready for collection"
            )));
        }
        store.confirm(BookingDraft {
            username: username.trim().to_string(),
            listings: listings.to_vec(),
            selection: selection.clone(),
        })
    }

    async fn ensure_orders(&self) -> AppResult<Arc<OrdersSnapshot>> {
        self.load_with_retry(Sheet::Orders).await?;
        self.orders_snapshot().ok_or_else(|| AppError::NotLoaded {
            dataset: Sheet::Orders.dataset_name().to_string(),
        })
    }

    async fn fetch_rows(&self, sheet: Sheet) -> AppResult<Vec<RawRow>> {
        let dataset = sheet.dataset_name();
        let url = match sheet {
            Sheet::Orders => &self.config.orders_sheet_url,
            Sheet::Meetup => &self.config.meetup_sheet_url,
        };
        let text = self.fetcher.fetch(url, dataset).await?;
        if text.trim().is_empty() {
            return Err(AppError::EmptyPayload {
                dataset: dataset.to_string(),
            });
        }

        let rows = tokenizer::parse(&text);
        if rows.len() < sheet.min_rows() {
            return Err(AppError::InsufficientData {
                dataset: dataset.to_string(),
                rows: rows.len(),
            });
        }
        Ok(rows)
    }
}

async fn load_into<T, Fut, B>(
    slot: &Mutex<SheetSlot<T>>,
    fetch: Fut,
    build: B,
) -> AppResult<LoadOutcome>
where
    Fut: std::future::Future<Output = AppResult<Vec<RawRow>>>,
    B: FnOnce(Vec<RawRow>) -> T,
{
    {
        let mut guard = slot.lock();
        match guard.phase {
            LoadPhase::Loaded => return Ok(LoadOutcome::Cached),
            LoadPhase::Loading => return Ok(LoadOutcome::InFlight),
            LoadPhase::NotLoaded => guard.phase = LoadPhase::Loading,
        }
    }

    let loading = LoadingGuard { slot, armed: true };
    let rows = fetch.await?;
    loading.complete(build(rows));
    Ok(LoadOutcome::Loaded)
}
