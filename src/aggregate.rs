use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::errors::{AppError, AppResult};
use crate::records::OrderRecord;

/// Rows after the header that the listing summary skips, clamped for tiny sheets.
const SUMMARY_HEADER_OFFSET: usize = 4;
const READY_FOR_COLLECTION: &str = "ready for collection";
const DEFAULT_SUMMARY_STATUS: &str = "ordered";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListingSummaryEntry {
    pub listing: String,
    pub status: String,
}

/// A lowercased `@handle` used for exact username matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsernameQuery(String);

impl UsernameQuery {
    pub fn parse(raw: &str) -> AppResult<Self> {
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(AppError::Validation("Please enter a username".into()));
        }
        if !normalized.starts_with('@') {
            return Err(AppError::Validation("Username must start with @".into()));
        }
        if normalized.len() < 2 {
            return Err(AppError::Validation(
                "Please enter a valid username starting with @".into(),
            ));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn matches(&self, username: &str) -> bool {
        username.trim().to_lowercase() == self.0
    }
}

/// Most frequent status per listing, sorted by listing name.
///
/// Ties go to whichever status was seen first for that listing.
pub fn listing_summary(records: &[OrderRecord]) -> Vec<ListingSummaryEntry> {
    let start = records
        .len()
        .saturating_sub(1)
        .min(SUMMARY_HEADER_OFFSET)
        .max(1);

    let mut counts: BTreeMap<&str, Vec<(&str, usize)>> = BTreeMap::new();
    for record in records.iter().skip(start) {
        let listing = record.listing.as_str();
        if listing.is_empty() || listing == "Unknown" {
            continue;
        }
        let status = if record.status.is_empty() {
            DEFAULT_SUMMARY_STATUS
        } else {
            record.status.as_str()
        };

        let statuses = counts.entry(listing).or_default();
        match statuses.iter_mut().find(|(seen, _)| *seen == status) {
            Some((_, count)) => *count += 1,
            None => statuses.push((status, 1)),
        }
    }

    let mut summary: Vec<ListingSummaryEntry> = counts
        .into_iter()
        .map(|(listing, statuses)| {
            let mut dominant = "";
            let mut highest = 0;
            for (status, count) in statuses {
                if count > highest {
                    highest = count;
                    dominant = status;
                }
            }
            ListingSummaryEntry {
                listing: listing.to_string(),
                status: dominant.to_string(),
            }
        })
        .collect();

    summary.sort_by(|a, b| compare_listing(&a.listing, &b.listing));
    summary
}

fn compare_listing(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

/// Every order whose username equals the query, in sheet order.
pub fn orders_for_user<'a>(
    records: &'a [OrderRecord],
    query: &UsernameQuery,
) -> Vec<&'a OrderRecord> {
    records
        .iter()
        .filter(|record| !record.username.is_empty() && query.matches(&record.username))
        .collect()
}

/// Listings the user can pick up: status must be exactly "ready for collection"
/// (case-insensitive), deduplicated by listing in first-seen order.
pub fn ready_for_collection<'a>(
    records: &'a [OrderRecord],
    query: &UsernameQuery,
) -> Vec<&'a OrderRecord> {
    let mut seen = HashSet::new();
    orders_for_user(records, query)
        .into_iter()
        .filter(|record| {
            !record.listing.trim().is_empty()
                && record.status.trim().to_lowercase() == READY_FOR_COLLECTION
        })
        .filter(|record| seen.insert(record.listing.as_str()))
        .collect()
}
