use serde::Serialize;

use crate::encode_uri_component;
use crate::errors::{AppError, AppResult};
use crate::records::SlotRecord;

const MIN_SLOT_CELLS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    Meetup,
    SelfCollect,
}

impl SlotKind {
    pub fn classify(raw_type: &str) -> Option<Self> {
        let normalized = raw_type.trim().to_lowercase();
        if normalized.contains("meetup") {
            Some(SlotKind::Meetup)
        } else if ["self collect", "self-collect", "self"]
            .iter()
            .any(|needle| normalized.contains(needle))
        {
            Some(SlotKind::SelfCollect)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Slot {
    pub date: String,
    pub location: String,
    pub time: String,
    /// Lowercased, trimmed type cell.
    pub slot_type: String,
    pub slots: String,
    pub kind: SlotKind,
}

impl Slot {
    /// Link handed to the booking flow, e.g. `booking.html?date=..&location=..`.
    pub fn booking_reference(&self, page: &str) -> String {
        let mut reference = format!(
            "{page}?date={}&location={}&time={}&type={}",
            encode_uri_component(&self.date),
            encode_uri_component(&self.location),
            encode_uri_component(&self.time),
            encode_uri_component(&self.slot_type),
        );
        if !self.slots.is_empty() {
            reference.push_str("&slots=");
            reference.push_str(&encode_uri_component(&self.slots));
        }
        reference
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SlotPartition {
    pub meetup: Vec<Slot>,
    pub self_collect: Vec<Slot>,
}

impl SlotPartition {
    pub fn is_empty(&self) -> bool {
        self.meetup.is_empty() && self.self_collect.is_empty()
    }
}

/// Splits slot rows into meetup and self-collect lists. Rows of any other type
/// land in neither.
pub fn partition_slots(records: &[SlotRecord]) -> SlotPartition {
    let mut partition = SlotPartition::default();
    for record in records {
        if record.populated < MIN_SLOT_CELLS
            || record.date.is_empty()
            || record.location.is_empty()
            || record.time.is_empty()
        {
            continue;
        }
        let Some(kind) = SlotKind::classify(&record.slot_type) else {
            continue;
        };
        let slot = Slot {
            date: record.date.clone(),
            location: record.location.clone(),
            time: record.time.clone(),
            slot_type: record.slot_type.trim().to_lowercase(),
            slots: record.slots.clone(),
            kind,
        };
        match kind {
            SlotKind::Meetup => partition.meetup.push(slot),
            SlotKind::SelfCollect => partition.self_collect.push(slot),
        }
    }
    partition
}

/// The slot a booking is being made for, as carried by a booking reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotSelection {
    pub date: String,
    pub location: String,
    pub time: String,
    pub slot_type: String,
    pub slots: Option<String>,
}

impl SlotSelection {
    /// Accepts either a bare query string or a full booking reference.
    pub fn from_query(reference: &str) -> AppResult<Self> {
        let query = reference
            .split_once('?')
            .map(|(_, query)| query)
            .unwrap_or(reference);

        let mut selection = Self {
            date: String::new(),
            location: String::new(),
            time: String::new(),
            slot_type: String::new(),
            slots: None,
        };
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let value = value.into_owned();
            match key.as_ref() {
                "date" => selection.date = value,
                "location" => selection.location = value,
                "time" => selection.time = value,
                "type" => selection.slot_type = value,
                "slots" => selection.slots = Some(value).filter(|v| !v.is_empty()),
                _ => {}
            }
        }

        if selection.date.is_empty() {
            return Err(AppError::Validation(
                "Invalid booking link. Please go back and select a slot.".into(),
            ));
        }
        Ok(selection)
    }

    pub fn type_label(&self) -> String {
        let lowered = self.slot_type.to_lowercase();
        if lowered.contains("meetup") {
            "Meetup".to_string()
        } else if lowered.contains("self") || lowered.contains("collect") {
            "Self Collect".to_string()
        } else {
            self.slot_type.clone()
        }
    }

    /// `YYYY-MM-DD` becomes `DD/MM/YYYY`; anything else is shown as given.
    pub fn date_label(&self) -> String {
        let parts: Vec<&str> = self.date.split('-').collect();
        match parts.as_slice() {
            [year, month, day] => format!("{day}/{month}/{year}"),
            _ => self.date.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Dataset, SlotRecord};
    use crate::tokenizer::parse;

    const SLOT_SHEET: &str = "date,location,time,type,slots\n\
        12/5/2025,Bishan MRT,7pm,Meetup,3\n\
        13/5/2025,Home,2pm - 6pm,Self Collect,\n\
        14/5/2025,Home,10am,self-collect,1\n\
        15/5/2025,Somewhere,1pm,Delivery,2\n\
        16/5/2025,,1pm,Meetup,2\n\
        17/5/2025,Tampines";

    #[test]
    fn partitions_by_type_and_drops_incomplete_rows() {
        let dataset = Dataset::<SlotRecord>::from_rows(parse(SLOT_SHEET));
        let partition = partition_slots(dataset.records());
        assert_eq!(partition.meetup.len(), 1);
        assert_eq!(partition.self_collect.len(), 2);
        assert_eq!(partition.meetup[0].location, "Bishan MRT");
        assert_eq!(partition.self_collect[0].slot_type, "self collect");
        assert!(!partition.is_empty());
    }

    #[test]
    fn booking_reference_round_trips_through_selection() {
        let dataset = Dataset::<SlotRecord>::from_rows(parse(SLOT_SHEET));
        let partition = partition_slots(dataset.records());

        let meetup = partition.meetup[0].booking_reference("booking.html");
        assert_eq!(
            meetup,
            "booking.html?date=12%2F5%2F2025&location=Bishan%20MRT&time=7pm&type=meetup&slots=3"
        );
        let selection = SlotSelection::from_query(&meetup).unwrap();
        assert_eq!(selection.location, "Bishan MRT");
        assert_eq!(selection.slots.as_deref(), Some("3"));
        assert_eq!(selection.type_label(), "Meetup");

        let collect = partition.self_collect[0].booking_reference("booking.html");
        assert!(!collect.contains("slots="));
        let selection = SlotSelection::from_query(&collect).unwrap();
        assert_eq!(selection.time, "2pm - 6pm");
        assert_eq!(selection.slots, None);
        assert_eq!(selection.type_label(), "Self Collect");
    }

    #[test]
    fn selection_requires_a_date() {
        let err = SlotSelection::from_query("booking.html?location=Home").unwrap_err();
        assert!(err.user_message().contains("Invalid booking link"));
    }

    #[test]
    fn date_label_flips_iso_dates() {
        let selection = SlotSelection::from_query("date=2025-05-12&type=meetup").unwrap();
        assert_eq!(selection.date_label(), "12/05/2025");
        let selection = SlotSelection::from_query("date=12%2F5%2F2025").unwrap();
        assert_eq!(selection.date_label(), "12/5/2025");
    }
}
