use std::path::PathBuf;
use std::time::Duration;
use std::{env, io};

use serde::Serialize;
use tracing::debug;

pub const DEFAULT_ORDERS_SHEET_URL: &str = "https://docs.google.com/spreadsheets/d/e/2PACX-1vTPaO7eZrkPjvuzf22ynIj125_o0mEY3SplClk3NTuTIHRxddmignA-nCqvdC4ApNptedM3OSAlKY9c/pub?gid=27369847&single=true&output=csv";
pub const DEFAULT_MEETUP_SHEET_URL: &str = "https://docs.google.com/spreadsheets/d/e/2PACX-1vQNOxQuuN40JVvEnEwZ7ERRaUzYwOm751xtw_aB3ZrIIoM_iWquXWPGJNloTNOoKjxoLUBcDGVmSboa/pub?gid=583970895&single=true&output=csv";

pub const DEFAULT_RELAY_ROUTES: &[&str] = &[
    "https://api.allorigins.win/raw?url=",
    "https://corsproxy.io/?",
    "https://api.codetabs.com/v1/proxy?quest=",
];

const DEFAULT_FETCH_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_RETRY_COUNT: u32 = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub orders_sheet_url: String,
    pub meetup_sheet_url: String,
    pub relay_routes: Vec<String>,
    pub fetch_timeout_ms: u64,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
    pub booking_data_dir: PathBuf,
    pub booking_page: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub orders_sheet_url: String,
    pub meetup_sheet_url: String,
    pub relay_routes: Vec<String>,
    pub fetch_timeout_ms: u64,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
    pub booking_data_dir: String,
    pub booking_page: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            orders_sheet_url: parse_string("ORDERS_SHEET_URL", DEFAULT_ORDERS_SHEET_URL),
            meetup_sheet_url: parse_string("MEETUP_SHEET_URL", DEFAULT_MEETUP_SHEET_URL),
            relay_routes: parse_list("RELAY_ROUTES", DEFAULT_RELAY_ROUTES),
            fetch_timeout_ms: parse_u64("FETCH_TIMEOUT_MS", DEFAULT_FETCH_TIMEOUT_MS).max(1),
            retry_count: parse_u32("LOAD_RETRY_COUNT", DEFAULT_RETRY_COUNT),
            retry_delay_ms: parse_u64("LOAD_RETRY_DELAY_MS", DEFAULT_RETRY_DELAY_MS),
            booking_data_dir: PathBuf::from(parse_string("BOOKING_DATA_DIR", "data")),
            booking_page: parse_string("BOOKING_PAGE", "booking.html"),
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            orders_sheet_url: self.orders_sheet_url.clone(),
            meetup_sheet_url: self.meetup_sheet_url.clone(),
            relay_routes: self.relay_routes.clone(),
            fetch_timeout_ms: self.fetch_timeout_ms,
            retry_count: self.retry_count,
            retry_delay_ms: self.retry_delay_ms,
            booking_data_dir: self.booking_data_dir.to_string_lossy().to_string(),
            booking_page: self.booking_page.clone(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            orders_sheet_url: DEFAULT_ORDERS_SHEET_URL.to_string(),
            meetup_sheet_url: DEFAULT_MEETUP_SHEET_URL.to_string(),
            relay_routes: DEFAULT_RELAY_ROUTES.iter().map(|r| r.to_string()).collect(),
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            booking_data_dir: PathBuf::from("data"),
            booking_page: "booking.html".to_string(),
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_string(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_list(key: &str, default: &[&str]) -> Vec<String> {
    let parsed: Vec<String> = env::var(key)
        .ok()
        .map(|v| {
            v.split(',')
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect()
        })
        .unwrap_or_default();
    if parsed.is_empty() {
        default.iter().map(|item| item.to_string()).collect()
    } else {
        parsed
    }
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_overrides_and_falls_back_on_garbage() {
        env::set_var("RELAY_ROUTES", "https://relay-a.test/?u=, ,https://relay-b.test/?q=");
        env::set_var("FETCH_TIMEOUT_MS", "2500");
        env::set_var("LOAD_RETRY_COUNT", "not-a-number");
        env::set_var("BOOKING_PAGE", "  ");

        let config = AppConfig::from_env();
        let public = config.public_profile();

        assert_eq!(
            public.relay_routes,
            vec!["https://relay-a.test/?u=", "https://relay-b.test/?q="]
        );
        assert_eq!(config.fetch_timeout(), Duration::from_millis(2500));
        assert_eq!(public.retry_count, DEFAULT_RETRY_COUNT);
        assert_eq!(public.booking_page, "booking.html");
    }

    #[test]
    fn default_relays_keep_priority_order() {
        let config = AppConfig::default();
        assert_eq!(config.relay_routes.len(), 3);
        assert!(config.relay_routes[0].contains("allorigins"));
        assert!(config.relay_routes[2].contains("codetabs"));
    }
}
