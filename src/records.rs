use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::tokenizer::RawRow;

/// Column offsets of the published orders sheet.
pub mod order_columns {
    pub const LISTING: usize = 1;
    pub const USERNAME: usize = 2;
    pub const ORDER: usize = 3;
    pub const FIRST_PAYMENT: usize = 4;
    pub const SECOND_PAYMENT: usize = 5;
    pub const FINAL_PAYMENT: usize = 6;
    pub const STATUS: usize = 7;
    pub const DEADLINE: usize = 8;
}

/// Column offsets of the meetup / self-collect slot sheet.
pub mod slot_columns {
    pub const DATE: usize = 0;
    pub const LOCATION: usize = 1;
    pub const TIME: usize = 2;
    pub const TYPE: usize = 3;
    pub const SLOTS: usize = 4;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderRecord {
    pub listing: String,
    pub username: String,
    pub order: String,
    pub first_payment: String,
    pub second_payment: String,
    pub final_payment: String,
    pub status: String,
    pub deadline: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotRecord {
    pub date: String,
    pub location: String,
    pub time: String,
    pub slot_type: String,
    pub slots: String,
    /// Number of cells the sheet actually carried for this row.
    pub populated: usize,
}

/// Typed view over one tokenized sheet row.
pub trait SheetRecord: Sized {
    fn from_row(row: &[String]) -> Self;
}

impl SheetRecord for OrderRecord {
    fn from_row(row: &[String]) -> Self {
        use order_columns::*;
        Self {
            listing: cell(row, LISTING),
            username: cell(row, USERNAME),
            order: cell(row, ORDER),
            first_payment: cell(row, FIRST_PAYMENT),
            second_payment: cell(row, SECOND_PAYMENT),
            final_payment: cell(row, FINAL_PAYMENT),
            status: cell(row, STATUS),
            deadline: cell(row, DEADLINE),
        }
    }
}

impl SheetRecord for SlotRecord {
    fn from_row(row: &[String]) -> Self {
        use slot_columns::*;
        Self {
            date: cell(row, DATE),
            location: cell(row, LOCATION),
            time: cell(row, TIME),
            slot_type: cell(row, TYPE),
            slots: cell(row, SLOTS),
            populated: row.len(),
        }
    }
}

fn cell(row: &[String], index: usize) -> String {
    row.get(index).cloned().unwrap_or_default()
}

/// A fully parsed sheet. Row 0 is the header and never becomes a record.
#[derive(Debug, Clone)]
pub struct Dataset<R> {
    rows: Vec<RawRow>,
    records: Vec<R>,
    loaded_at: DateTime<Utc>,
}

impl<R: SheetRecord> Dataset<R> {
    pub fn from_rows(rows: Vec<RawRow>) -> Self {
        let records = rows.iter().skip(1).map(|row| R::from_row(row)).collect();
        Self {
            rows,
            records,
            loaded_at: Utc::now(),
        }
    }
}

impl<R> Dataset<R> {
    pub fn rows(&self) -> &[RawRow] {
        &self.rows
    }

    pub fn records(&self) -> &[R] {
        &self.records
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::parse;

    #[test]
    fn maps_order_columns_by_position() {
        let rows = parse(
            "ts,listing,user,order,fp,sp,nm,status,deadline\n\
             1,Plush A,@amy,2x,paid,,unpaid,Ordered,1/2/2025",
        );
        let dataset = Dataset::<OrderRecord>::from_rows(rows);
        assert_eq!(dataset.row_count(), 2);
        let record = &dataset.records()[0];
        assert_eq!(record.listing, "Plush A");
        assert_eq!(record.username, "@amy");
        assert_eq!(record.second_payment, "");
        assert_eq!(record.final_payment, "unpaid");
        assert_eq!(record.deadline, "1/2/2025");
    }

    #[test]
    fn short_rows_fill_missing_cells() {
        let record = SlotRecord::from_row(&["12/5/2025".to_string(), "Bishan".to_string()]);
        assert_eq!(record.location, "Bishan");
        assert_eq!(record.time, "");
        assert_eq!(record.populated, 2);
    }
}
