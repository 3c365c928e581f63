pub mod aggregate;
pub mod booking;
pub mod classify;
pub mod cli;
pub mod config;
pub mod errors;
pub mod fetcher;
pub mod records;
pub mod session;
pub mod slots;
pub mod tokenizer;

use once_cell::sync::OnceCell;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use crate::booking::{Booking, BookingDraft, BookingStore};
pub use crate::config::AppConfig;
pub use crate::errors::{AppError, AppResult};
pub use crate::fetcher::{HttpTransport, SheetFetcher, Transport};
pub use crate::session::{LoadOutcome, LoadPhase, OrderDesk, Sheet};
pub use crate::slots::{SlotPartition, SlotSelection};

/// Characters `encodeURIComponent` leaves alone, besides ASCII alphanumerics.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

pub(crate) fn encode_uri_component(value: &str) -> String {
    utf8_percent_encode(value, URI_COMPONENT).to_string()
}

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,order_desk=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    });
}
