use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(test)]
use std::sync::Arc;

use crate::errors::{AppError, AppResult};
use crate::slots::SlotSelection;

const ALL_BOOKINGS_FILE: &str = "all_bookings.json";
const LAST_BOOKING_FILE: &str = "last_booking.json";
const ID_PREFIX: &str = "BK";
const ID_SUFFIX_LEN: usize = 6;
const ID_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub status: String,
    pub username: String,
    /// Listing names joined with ", ".
    pub listings: String,
    pub date: String,
    pub time: String,
    pub location: String,
    #[serde(rename = "type")]
    pub slot_type: String,
}

#[derive(Debug, Clone)]
pub struct BookingDraft {
    pub username: String,
    pub listings: Vec<String>,
    pub selection: SlotSelection,
}

impl BookingDraft {
    fn validate(&self) -> AppResult<()> {
        let username = self.username.trim();
        if !username.starts_with('@') || username.len() < 2 {
            return Err(AppError::Validation(
                "Please enter a valid username starting with @".into(),
            ));
        }
        if self.listings.is_empty() {
            return Err(AppError::Validation(
                "Please select at least one item to collect".into(),
            ));
        }
        Ok(())
    }
}

/// Local booking log: every confirmed booking in `all_bookings.json`, plus the
/// most recent one mirrored to `last_booking.json`.
pub struct BookingStore {
    all_path: PathBuf,
    last_path: PathBuf,
    write_lock: Mutex<()>,
    #[cfg(test)]
    fault_injector: Option<Arc<TestFaultInjector>>,
}

impl BookingStore {
    pub fn open<P: AsRef<Path>>(data_dir: P) -> AppResult<Self> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir)?;
        Ok(Self {
            all_path: data_dir.join(ALL_BOOKINGS_FILE),
            last_path: data_dir.join(LAST_BOOKING_FILE),
            write_lock: Mutex::new(()),
            #[cfg(test)]
            fault_injector: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.all_path
    }

    /// Validates the draft, assigns an id and appends it to the log.
    ///
    /// Nothing on disk changes unless the whole write succeeds.
    pub fn confirm(&self, draft: BookingDraft) -> AppResult<Booking> {
        draft.validate()?;

        let booking = Booking {
            id: generate_booking_id(),
            timestamp: Utc::now(),
            status: "confirmed".into(),
            username: draft.username.trim().to_string(),
            listings: draft.listings.join(", "),
            date: draft.selection.date,
            time: draft.selection.time,
            location: draft.selection.location,
            slot_type: draft.selection.slot_type,
        };

        let _guard = self.write_lock.lock();
        let mut bookings = self.all()?;
        bookings.push(booking.clone());
        self.persist(&bookings, &booking).map_err(|err| {
            warn!(target: "booking", error = ?err, id = %booking.id, "failed to save booking");
            AppError::Storage(err.to_string())
        })?;

        info!(
            target: "booking",
            id = %booking.id,
            username = %booking.username,
            total = bookings.len(),
            "booking confirmed"
        );
        Ok(booking)
    }

    pub fn all(&self) -> AppResult<Vec<Booking>> {
        match fs::read_to_string(&self.all_path) {
            Ok(contents) if contents.trim().is_empty() => Ok(Vec::new()),
            Ok(contents) => serde_json::from_str(&contents).map_err(|err| {
                AppError::Storage(format!(
                    "booking log {} is unreadable: {err}",
                    self.all_path.display()
                ))
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(AppError::Io(err)),
        }
    }

    pub fn last(&self) -> AppResult<Option<Booking>> {
        match fs::read_to_string(&self.last_path) {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(AppError::Io(err)),
        }
    }

    pub fn count(&self) -> AppResult<usize> {
        Ok(self.all()?.len())
    }

    /// Removes every stored booking. Returns how many were dropped.
    pub fn clear(&self) -> AppResult<usize> {
        let _guard = self.write_lock.lock();
        let dropped = match self.all() {
            Ok(bookings) => bookings.len(),
            Err(err) => {
                warn!(
                    target: "booking",
                    error = %err,
                    path = %self.all_path.display(),
                    "booking log unreadable; clearing it anyway"
                );
                0
            }
        };
        for path in [&self.all_path, &self.last_path] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(AppError::Io(err)),
            }
        }
        info!(target: "booking", dropped, "cleared local bookings");
        Ok(dropped)
    }

    pub fn export_json<W: Write>(&self, mut writer: W) -> AppResult<usize> {
        let bookings = self.all()?;
        serde_json::to_writer_pretty(&mut writer, &bookings)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(bookings.len())
    }

    pub fn export_csv<W: Write>(&self, writer: W) -> AppResult<usize> {
        let bookings = self.all()?;
        let mut csv_writer = csv::Writer::from_writer(writer);
        for booking in &bookings {
            csv_writer.serialize(booking)?;
        }
        csv_writer.flush()?;
        Ok(bookings.len())
    }

    /// Stages both files before renaming either. If the mirror cannot be
    /// renamed into place, the previous log is put back.
    fn persist(&self, bookings: &[Booking], latest: &Booking) -> AppResult<()> {
        let previous_log = match fs::read(&self.all_path) {
            Ok(bytes) => Some(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => return Err(AppError::Io(err)),
        };

        let all_tmp = stage(&self.all_path, &serde_json::to_vec_pretty(bookings)?, || {
            self.take_injected_fault()
        })?;
        let last_tmp = match stage(&self.last_path, &serde_json::to_vec_pretty(latest)?, || None) {
            Ok(path) => path,
            Err(err) => {
                let _ = fs::remove_file(&all_tmp);
                return Err(err);
            }
        };

        if let Err(err) = fs::rename(&all_tmp, &self.all_path) {
            let _ = fs::remove_file(&all_tmp);
            let _ = fs::remove_file(&last_tmp);
            return Err(AppError::Io(err));
        }
        if let Err(err) = fs::rename(&last_tmp, &self.last_path) {
            let _ = fs::remove_file(&last_tmp);
            if let Err(restore_err) = restore(&self.all_path, previous_log.as_deref()) {
                warn!(
                    target: "booking",
                    error = ?restore_err,
                    "failed to restore booking log after mirror write failed"
                );
            }
            return Err(AppError::Io(err));
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn take_injected_fault(&self) -> Option<io::Error> {
        None
    }

    #[cfg(test)]
    fn take_injected_fault(&self) -> Option<io::Error> {
        self.fault_injector
            .as_ref()
            .filter(|hooks| hooks.take_disk_full())
            .map(|_| io::Error::new(io::ErrorKind::WriteZero, "simulated disk full"))
    }
}

/// Writes `contents` to a sibling temp file and returns its path.
fn stage(
    path: &Path,
    contents: &[u8],
    fault: impl FnOnce() -> Option<io::Error>,
) -> AppResult<PathBuf> {
    let tmp_path = path.with_extension("json.tmp");
    let result = (|| -> io::Result<()> {
        let mut file = fs::File::create(&tmp_path)?;
        if let Some(err) = fault() {
            return Err(err);
        }
        file.write_all(contents)?;
        file.sync_all()
    })();

    if let Err(err) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(AppError::Io(err));
    }
    Ok(tmp_path)
}

fn restore(path: &Path, previous: Option<&[u8]>) -> AppResult<()> {
    match previous {
        Some(bytes) => {
            let tmp_path = stage(path, bytes, || None)?;
            fs::rename(&tmp_path, path)?;
        }
        None => match fs::remove_file(path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(AppError::Io(err)),
        },
    }
    Ok(())
}

fn generate_booking_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("{ID_PREFIX}{}{suffix}", Utc::now().timestamp_millis())
}

#[cfg(test)]
#[derive(Default)]
pub struct TestFaultInjector {
    disk_full: AtomicBool,
}

#[cfg(test)]
impl TestFaultInjector {
    pub fn fail_next_disk_full(&self) {
        self.disk_full.store(true, Ordering::SeqCst);
    }

    fn take_disk_full(&self) -> bool {
        self.disk_full.swap(false, Ordering::SeqCst)
    }
}

#[cfg(test)]
impl BookingStore {
    pub fn enable_test_hooks(&mut self) -> Arc<TestFaultInjector> {
        let hooks = Arc::new(TestFaultInjector::default());
        self.fault_injector = Some(hooks.clone());
        hooks
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use tempfile::tempdir;

    use super::*;

    fn draft(username: &str, listings: &[&str]) -> BookingDraft {
        BookingDraft {
            username: username.into(),
            listings: listings.iter().map(|l| l.to_string()).collect(),
            selection: SlotSelection::from_query(
                "date=12%2F5%2F2025&location=Bishan%20MRT&time=7pm&type=meetup",
            )
            .unwrap(),
        }
    }

    #[test]
    fn confirms_accumulate_with_unique_ids() {
        let dir = tempdir().unwrap();
        let store = BookingStore::open(dir.path()).unwrap();

        let mut ids = HashSet::new();
        let mut latest = None;
        for _ in 0..5 {
            let booking = store.confirm(draft("@amy", &["Plush", "Badge"])).unwrap();
            assert!(booking.id.starts_with("BK"));
            assert_eq!(booking.status, "confirmed");
            assert_eq!(booking.listings, "Plush, Badge");
            ids.insert(booking.id.clone());
            latest = Some(booking);
        }

        assert_eq!(store.count().unwrap(), 5);
        assert_eq!(ids.len(), 5);
        assert_eq!(store.last().unwrap(), latest);
    }

    #[test]
    fn booking_serializes_type_field() {
        let dir = tempdir().unwrap();
        let store = BookingStore::open(dir.path()).unwrap();
        store.confirm(draft("@amy", &["Plush"])).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"type\": \"meetup\""));
        assert!(raw.contains("\"location\": \"Bishan MRT\""));
    }

    #[test]
    fn rejects_invalid_drafts() {
        let dir = tempdir().unwrap();
        let store = BookingStore::open(dir.path()).unwrap();

        let err = store.confirm(draft("amy", &["Plush"])).unwrap_err();
        assert_eq!(
            err.user_message(),
            "Please enter a valid username starting with @"
        );
        let err = store.confirm(draft("@amy", &[])).unwrap_err();
        assert_eq!(
            err.user_message(),
            "Please select at least one item to collect"
        );
        assert_eq!(store.count().unwrap(), 0);
        assert!(store.last().unwrap().is_none());
    }

    #[test]
    fn failed_write_leaves_log_untouched() {
        let dir = tempdir().unwrap();
        let mut store = BookingStore::open(dir.path()).unwrap();
        let hooks = store.enable_test_hooks();
        let first = store.confirm(draft("@amy", &["Plush"])).unwrap();

        hooks.fail_next_disk_full();
        let err = store.confirm(draft("@bob", &["Badge"])).unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
        assert_eq!(err.user_message(), "Failed to save booking. Please try again.");

        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.last().unwrap(), Some(first));
        assert!(!dir.path().join("all_bookings.json.tmp").exists());
    }

    #[test]
    fn failed_mirror_write_rolls_back_the_log() {
        let dir = tempdir().unwrap();
        let store = BookingStore::open(dir.path()).unwrap();
        fs::create_dir(dir.path().join(LAST_BOOKING_FILE)).unwrap();

        let err = store.confirm(draft("@amy", &["Plush"])).unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
        assert_eq!(store.count().unwrap(), 0);
        assert!(!store.path().exists());
    }

    #[test]
    fn failed_mirror_write_keeps_earlier_bookings() {
        let dir = tempdir().unwrap();
        let store = BookingStore::open(dir.path()).unwrap();
        let first = store.confirm(draft("@amy", &["Plush"])).unwrap();
        let log_before = fs::read_to_string(store.path()).unwrap();

        let mirror = dir.path().join(LAST_BOOKING_FILE);
        fs::remove_file(&mirror).unwrap();
        fs::create_dir(&mirror).unwrap();

        assert!(store.confirm(draft("@bob", &["Badge"])).is_err());
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.all().unwrap(), vec![first]);
        assert_eq!(fs::read_to_string(store.path()).unwrap(), log_before);
        assert!(!dir.path().join("all_bookings.json.tmp").exists());
        assert!(!dir.path().join("last_booking.json.tmp").exists());
    }

    #[test]
    fn clear_removes_an_unreadable_log() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(ALL_BOOKINGS_FILE), "{not json").unwrap();
        let store = BookingStore::open(dir.path()).unwrap();
        assert!(store.all().is_err());

        assert_eq!(store.clear().unwrap(), 0);
        assert!(!store.path().exists());
        store.confirm(draft("@amy", &["Plush"])).unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn exports_and_clears() {
        let dir = tempdir().unwrap();
        let store = BookingStore::open(dir.path()).unwrap();
        store.confirm(draft("@amy", &["Plush"])).unwrap();
        store.confirm(draft("@bob", &["Badge", "Poster"])).unwrap();

        let mut csv_out = Vec::new();
        assert_eq!(store.export_csv(&mut csv_out).unwrap(), 2);
        let csv_text = String::from_utf8(csv_out).unwrap();
        let mut lines = csv_text.lines();
        assert_eq!(
            lines.next(),
            Some("id,timestamp,status,username,listings,date,time,location,type")
        );
        assert!(csv_text.contains("\"Badge, Poster\""));

        let mut json_out = Vec::new();
        store.export_json(&mut json_out).unwrap();
        let parsed: Vec<Booking> = serde_json::from_slice(&json_out).unwrap();
        assert_eq!(parsed.len(), 2);

        assert_eq!(store.clear().unwrap(), 2);
        assert_eq!(store.count().unwrap(), 0);
        assert!(store.last().unwrap().is_none());
        assert_eq!(store.clear().unwrap(), 0);
    }

    #[test]
    fn corrupt_log_is_reported_not_overwritten() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(ALL_BOOKINGS_FILE), "{not json").unwrap();
        let store = BookingStore::open(dir.path()).unwrap();

        assert!(store.confirm(draft("@amy", &["Plush"])).is_err());
        let raw = fs::read_to_string(store.path()).unwrap();
        assert_eq!(raw, "{not json");
    }
}
