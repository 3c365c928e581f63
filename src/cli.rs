use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::warn;

use crate::booking::BookingStore;
use crate::classify::{
    display_status, format_deadline, format_payment_cell, PaymentCategory, StatusCategory,
};
use crate::config::AppConfig;
use crate::errors::AppError;
use crate::records::OrderRecord;
use crate::session::OrderDesk;
use crate::slots::{Slot, SlotSelection};

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(about = "Look up pre-order status and book collection slots from published sheets.")]
pub struct Args {
    /// Output format.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Dominant status for every listing.
    Summary,
    /// Every order placed by a user.
    Orders {
        /// Username, including the leading `@`.
        username: String,
    },
    /// Meetup and self-collect slots with their booking links.
    Slots,
    /// Listings a user can collect at a slot.
    Ready {
        username: String,
        /// Booking link or its query string.
        #[arg(long)]
        slot: String,
    },
    /// Confirm a collection booking.
    Book {
        username: String,
        #[arg(long)]
        slot: String,
        /// Listing to collect (repeatable).
        #[arg(long = "listing", required = true)]
        listings: Vec<String>,
    },
    /// Manage bookings stored on this machine.
    Bookings {
        #[command(subcommand)]
        action: BookingsAction,
    },
    /// Print the active configuration.
    Config,
}

#[derive(Subcommand)]
enum BookingsAction {
    List,
    ExportJson { path: PathBuf },
    ExportCsv { path: PathBuf },
    Clear,
}

#[derive(Debug, Serialize)]
struct OrderRow<'a> {
    listing: &'a str,
    order: &'a str,
    first_payment: String,
    first_payment_tag: &'static str,
    second_payment: String,
    second_payment_tag: &'static str,
    final_payment: String,
    final_payment_tag: &'static str,
    status: String,
    status_tag: &'static str,
    deadline: String,
}

impl<'a> OrderRow<'a> {
    fn from_record(record: &'a OrderRecord) -> Self {
        Self {
            listing: &record.listing,
            order: &record.order,
            first_payment: format_payment_cell(&record.first_payment),
            first_payment_tag: PaymentCategory::classify(&record.first_payment).as_tag(),
            second_payment: format_payment_cell(&record.second_payment),
            second_payment_tag: PaymentCategory::classify(&record.second_payment).as_tag(),
            final_payment: format_payment_cell(&record.final_payment),
            final_payment_tag: PaymentCategory::classify(&record.final_payment).as_tag(),
            status: display_status(&record.status),
            status_tag: StatusCategory::classify(&record.status).as_tag(),
            deadline: format_deadline(&record.deadline),
        }
    }
}

#[derive(Debug, Serialize)]
struct SlotRow<'a> {
    #[serde(flatten)]
    slot: &'a Slot,
    booking_reference: String,
}

pub async fn run() -> Result<()> {
    let args = Args::parse();
    run_with_args(args, AppConfig::from_env()).await
}

pub async fn run_with_args(args: Args, config: AppConfig) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let format = args.format;

    match args.command {
        Command::Config => {
            serde_json::to_writer_pretty(&mut out, &config.public_profile())?;
            writeln!(out)?;
        }
        Command::Bookings { action } => {
            let store = BookingStore::open(&config.booking_data_dir).map_err(user_facing)?;
            run_bookings(&store, action, format, &mut out)?;
        }
        command => {
            let desk = OrderDesk::new(config).map_err(user_facing)?;
            run_sheet_command(&desk, command, format, &mut out).await?;
        }
    }
    Ok(())
}

async fn run_sheet_command<W: Write>(
    desk: &OrderDesk,
    command: Command,
    format: OutputFormat,
    out: &mut W,
) -> Result<()> {
    match command {
        Command::Summary => {
            let summary = desk.listing_summary().await.map_err(user_facing)?;
            match format {
                OutputFormat::Json => emit_json(out, &summary)?,
                OutputFormat::Text => {
                    if summary.is_empty() {
                        writeln!(out, "No listings found.")?;
                    }
                    for entry in &summary {
                        writeln!(
                            out,
                            "{:<40} {:<24} [{}]",
                            entry.listing,
                            entry.status,
                            StatusCategory::classify(&entry.status).as_tag()
                        )?;
                    }
                    if let Some(synced) = desk.last_synced() {
                        writeln!(out, "\nLast updated {}", synced.format("%d/%m/%Y %H:%M:%S"))?;
                    }
                }
            }
        }
        Command::Orders { username } => {
            let orders = desk.orders_for(&username).await.map_err(user_facing)?;
            let rows: Vec<OrderRow<'_>> = orders.iter().map(OrderRow::from_record).collect();
            match format {
                OutputFormat::Json => emit_json(out, &rows)?,
                OutputFormat::Text => {
                    if rows.is_empty() {
                        writeln!(out, "No orders found for {}", username.trim())?;
                    }
                    for row in &rows {
                        writeln!(out, "{} x{}", row.listing, row.order)?;
                        writeln!(
                            out,
                            "  payments: {} [{}] / {} [{}] / {} [{}]",
                            row.first_payment,
                            row.first_payment_tag,
                            row.second_payment,
                            row.second_payment_tag,
                            row.final_payment,
                            row.final_payment_tag
                        )?;
                        writeln!(
                            out,
                            "  status:   {} [{}]  deadline: {}",
                            row.status, row.status_tag, row.deadline
                        )?;
                    }
                }
            }
        }
        Command::Slots => {
            let partition = desk.slots().await.map_err(user_facing)?;
            let page = desk.config().booking_page.clone();
            let meetup = slot_rows(&partition.meetup, &page);
            let self_collect = slot_rows(&partition.self_collect, &page);
            match format {
                OutputFormat::Json => emit_json(
                    out,
                    &serde_json::json!({ "meetup": meetup, "self_collect": self_collect }),
                )?,
                OutputFormat::Text => {
                    write_slot_table(out, "Meetup", &meetup)?;
                    write_slot_table(out, "Self Collect", &self_collect)?;
                }
            }
        }
        Command::Ready { username, slot } => {
            let selection = SlotSelection::from_query(&slot).map_err(user_facing)?;
            let listings = desk
                .ready_for_collection(&selection, &username)
                .await
                .map_err(user_facing)?;
            match format {
                OutputFormat::Json => emit_json(out, &listings)?,
                OutputFormat::Text => {
                    writeln!(
                        out,
                        "{} · {} · {} · {}",
                        selection.type_label(),
                        selection.date_label(),
                        selection.time,
                        selection.location
                    )?;
                    if listings.is_empty() {
                        writeln!(out, "No items ready for collection.")?;
                    }
                    for listing in &listings {
                        writeln!(out, "  - {listing}")?;
                    }
                }
            }
        }
        Command::Book {
            username,
            slot,
            listings,
        } => {
            let selection = SlotSelection::from_query(&slot).map_err(user_facing)?;
            let store =
                BookingStore::open(&desk.config().booking_data_dir).map_err(user_facing)?;
            let booking = desk
                .confirm_booking(&store, &selection, &username, &listings)
                .await
                .map_err(user_facing)?;
            match format {
                OutputFormat::Json => emit_json(out, &booking)?,
                OutputFormat::Text => {
                    writeln!(out, "Booking confirmed: {}", booking.id)?;
                    writeln!(out, "  {} on {}", selection.type_label(), selection.date_label())?;
                    writeln!(out, "  {} at {}", booking.time, booking.location)?;
                    writeln!(out, "  items: {}", booking.listings)?;
                }
            }
        }
        Command::Config | Command::Bookings { .. } => {}
    }
    Ok(())
}

fn run_bookings<W: Write>(
    store: &BookingStore,
    action: BookingsAction,
    format: OutputFormat,
    out: &mut W,
) -> Result<()> {
    match action {
        BookingsAction::List => {
            let bookings = store.all().map_err(user_facing)?;
            match format {
                OutputFormat::Json => emit_json(out, &bookings)?,
                OutputFormat::Text => {
                    writeln!(out, "Total bookings: {}", bookings.len())?;
                    for booking in &bookings {
                        writeln!(
                            out,
                            "{}  {}  {} {} @ {}  {}",
                            booking.id,
                            booking.username,
                            booking.date,
                            booking.time,
                            booking.location,
                            booking.listings
                        )?;
                    }
                }
            }
        }
        BookingsAction::ExportJson { path } => {
            let file = File::create(&path)
                .with_context(|| format!("create export file {}", path.display()))?;
            let count = store.export_json(BufWriter::new(file)).map_err(user_facing)?;
            writeln!(out, "Exported {count} bookings to {}", path.display())?;
        }
        BookingsAction::ExportCsv { path } => {
            let file = File::create(&path)
                .with_context(|| format!("create export file {}", path.display()))?;
            let count = store.export_csv(BufWriter::new(file)).map_err(user_facing)?;
            writeln!(out, "Exported {count} bookings to {}", path.display())?;
        }
        BookingsAction::Clear => {
            let dropped = store.clear().map_err(user_facing)?;
            writeln!(out, "Cleared {dropped} local bookings")?;
        }
    }
    Ok(())
}

fn slot_rows<'a>(slots: &'a [Slot], page: &str) -> Vec<SlotRow<'a>> {
    slots
        .iter()
        .map(|slot| SlotRow {
            slot,
            booking_reference: slot.booking_reference(page),
        })
        .collect()
}

fn write_slot_table<W: Write>(out: &mut W, title: &str, rows: &[SlotRow<'_>]) -> Result<()> {
    writeln!(out, "{title}")?;
    if rows.is_empty() {
        writeln!(out, "  No available slots")?;
    }
    for row in rows {
        let slots = if row.slot.slots.is_empty() {
            "-"
        } else {
            row.slot.slots.as_str()
        };
        writeln!(
            out,
            "  {:<12} {:<24} {:<14} {:>5}  {}",
            row.slot.date, row.slot.location, row.slot.time, slots, row.booking_reference
        )?;
    }
    writeln!(out)?;
    Ok(())
}

fn emit_json<W: Write, T: Serialize + ?Sized>(out: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

fn user_facing(err: AppError) -> anyhow::Error {
    warn!(target: "cli", error = %err, "command failed");
    anyhow::anyhow!(err.user_message())
}
