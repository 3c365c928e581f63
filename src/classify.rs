use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCategory {
    Collected,
    Ordered,
    AtKadd,
    OtwToSg,
    Ready,
    Unpaid,
    Paid,
    AtCadd,
    AtJadd,
}

/// First matching entry wins, so `collected` must stay ahead of `paid`.
const STATUS_RULES: &[(&[&str], StatusCategory)] = &[
    (&["collected"], StatusCategory::Collected),
    (&["ordered"], StatusCategory::Ordered),
    (&["at kadd"], StatusCategory::AtKadd),
    (&["otw", "to sg"], StatusCategory::OtwToSg),
    (&["ready", "collection"], StatusCategory::Ready),
    (&["unpaid"], StatusCategory::Unpaid),
    (&["paid"], StatusCategory::Paid),
    (&["at cadd"], StatusCategory::AtCadd),
    (&["at jadd"], StatusCategory::AtJadd),
];

impl StatusCategory {
    pub fn classify(value: &str) -> Self {
        let normalized = value.trim().to_lowercase();
        STATUS_RULES
            .iter()
            .find(|(needles, _)| needles.iter().any(|needle| normalized.contains(needle)))
            .map(|(_, category)| *category)
            .unwrap_or(StatusCategory::Ordered)
    }

    pub fn as_tag(&self) -> &'static str {
        match self {
            StatusCategory::Collected => "status-collected",
            StatusCategory::Ordered => "status-ordered",
            StatusCategory::AtKadd => "status-atkadd",
            StatusCategory::OtwToSg => "status-otwtosg",
            StatusCategory::Ready => "status-ready",
            StatusCategory::Unpaid => "status-unpaid",
            StatusCategory::Paid => "status-paid",
            StatusCategory::AtCadd => "status-atcadd",
            StatusCategory::AtJadd => "status-atjadd",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentCategory {
    Empty,
    Collected,
    Unpaid,
    Paid,
    Pending,
}

impl PaymentCategory {
    pub fn classify(value: &str) -> Self {
        let normalized = value.trim().to_lowercase();
        if normalized.is_empty() || normalized == "-" {
            PaymentCategory::Empty
        } else if normalized.contains("collected") {
            PaymentCategory::Collected
        } else if normalized.contains("unpaid") {
            PaymentCategory::Unpaid
        } else if normalized.contains("paid") {
            PaymentCategory::Paid
        } else {
            PaymentCategory::Pending
        }
    }

    pub fn as_tag(&self) -> &'static str {
        match self {
            PaymentCategory::Empty => "payment-empty",
            PaymentCategory::Collected => "payment-collected",
            PaymentCategory::Unpaid => "payment-unpaid",
            PaymentCategory::Paid => "payment-paid",
            PaymentCategory::Pending => "payment-pending",
        }
    }
}

pub fn format_payment_cell(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        "-".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn display_status(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        "Ordered".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Renders a deadline cell as `DD/MM/YYYY`.
///
/// Day-first `D/M/YYYY` and `D-M-YYYY` are tried before any general format.
/// Anything unparseable is returned unchanged.
pub fn format_deadline(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed == "-" || trimmed.eq_ignore_ascii_case("blank") {
        return "-".to_string();
    }

    let parsed = if is_day_first(trimmed) {
        parse_day_first(trimmed)
    } else {
        parse_general(trimmed)
    };

    match parsed {
        Some(date) => date.format("%d/%m/%Y").to_string(),
        None => {
            debug!(target: "classify", value = trimmed, "deadline left as-is");
            trimmed.to_string()
        }
    }
}

fn is_day_first(value: &str) -> bool {
    let parts: Vec<&str> = value.split(['/', '-']).collect();
    if parts.len() != 3 {
        return false;
    }
    let all_digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
    parts.iter().all(|part| all_digits(part))
        && (1..=2).contains(&parts[0].len())
        && (1..=2).contains(&parts[1].len())
        && parts[2].len() == 4
}

fn parse_day_first(value: &str) -> Option<NaiveDate> {
    let mut parts = value.split(['/', '-']);
    let day = parts.next()?.parse::<u32>().ok()?;
    let month = parts.next()?.parse::<u32>().ok()?;
    let year = parts.next()?.parse::<i32>().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d %B %Y",
    "%d %b %Y",
    "%B %d %Y",
    "%b %d %Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%a %b %d %Y",
];

const DATE_TIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"];

fn parse_general(value: &str) -> Option<NaiveDate> {
    if let Ok(stamp) = DateTime::parse_from_rfc3339(value) {
        return Some(stamp.date_naive());
    }
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
        .or_else(|| {
            DATE_TIME_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
                .map(|stamp| stamp.date())
        })
}
