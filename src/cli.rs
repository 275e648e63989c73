//! Command-line front-end over the reservation [`Engine`].

use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use crate::engine::{today, Engine, EngineError, Snapshot};
use crate::model::*;

/// Reservation engine for short-term rental properties.
#[derive(Debug, Parser)]
#[command(name = "novodom", version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage properties.
    #[command(subcommand)]
    Property(PropertyCommand),
    /// Request a reservation; it starts out pending.
    Book(BookArgs),
    /// Host acceptance: pending to confirmed.
    Accept { id: Id },
    /// Host decline: pending to cancelled.
    Decline { id: Id },
    /// Cancel a pending or confirmed reservation.
    Cancel { id: Id },
    /// Mark a confirmed stay as completed once its check-out day has come.
    Complete {
        id: Id,
        /// Day to evaluate against (defaults to today).
        #[arg(long, value_parser = parse_day)]
        on: Option<Day>,
    },
    /// Move a pending or confirmed reservation to new dates.
    Reschedule {
        id: Id,
        #[arg(value_parser = parse_day)]
        check_in: Day,
        #[arg(value_parser = parse_day)]
        check_out: Day,
    },
    /// Show one reservation.
    Show { id: Id },
    /// List a property's reservations.
    Reservations {
        property: Id,
        #[arg(long)]
        status: Option<ReservationStatus>,
    },
    /// Check whether a date range is free.
    Check {
        property: Id,
        #[arg(value_parser = parse_day)]
        check_in: Day,
        #[arg(value_parser = parse_day)]
        check_out: Day,
        /// Ignore this reservation (when editing its dates).
        #[arg(long)]
        exclude: Option<Id>,
    },
    /// Occupancy of a single day.
    Occupancy {
        property: Id,
        #[arg(value_parser = parse_day)]
        day: Day,
    },
    /// Every reservation covering a day.
    Day {
        property: Id,
        #[arg(value_parser = parse_day)]
        day: Day,
    },
    /// Month calendar for a property.
    Calendar {
        property: Id,
        year: i32,
        #[arg(value_parser = clap::value_parser!(u32).range(1..=12))]
        month: u32,
    },
    /// Price a stay.
    Quote {
        property: Id,
        #[arg(value_parser = parse_day)]
        check_in: Day,
        #[arg(value_parser = parse_day)]
        check_out: Day,
    },
    /// Write all properties and reservations as JSON.
    Export {
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Load properties and reservations from a JSON snapshot.
    Import { file: PathBuf },
    /// Report overlapping active reservations in a JSON snapshot.
    Audit { file: PathBuf },
    /// Run the maintenance daemon (stay sweeper, WAL compactor, metrics).
    ///
    /// The daemon holds the data directory lock, so other commands against
    /// the same directory are refused until it stops.
    Run,
}

#[derive(Debug, Subcommand)]
pub enum PropertyCommand {
    Add(PropertyArgs),
    Update {
        id: Id,
        #[command(flatten)]
        args: PropertyArgs,
    },
    List,
    Remove { id: Id },
}

#[derive(Debug, Args)]
pub struct PropertyArgs {
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long, default_value_t = 2)]
    pub max_guests: u32,
    /// Price per night in whole currency units.
    #[arg(long, default_value_t = 0)]
    pub price: u64,
}

#[derive(Debug, Args)]
pub struct BookArgs {
    pub property: Id,
    #[arg(value_parser = parse_day)]
    pub check_in: Day,
    #[arg(value_parser = parse_day)]
    pub check_out: Day,
    #[arg(long, default_value_t = 1)]
    pub guests: u32,
    #[arg(long)]
    pub guest_name: Option<String>,
}

/// Parse an ISO `YYYY-MM-DD` calendar day.
pub fn parse_day(s: &str) -> Result<Day, String> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| format!("invalid date '{s}': {e}"))
}

/// Execute every command except `run`, returning the text to print.
pub async fn execute(
    engine: &Engine,
    command: Command,
) -> Result<String, Box<dyn std::error::Error>> {
    let mut out = String::new();
    match command {
        Command::Property(cmd) => property(engine, cmd, &mut out).await?,
        Command::Book(args) => {
            let id = Id::generate();
            engine
                .request_reservation(
                    id.clone(),
                    args.property,
                    args.check_in,
                    args.check_out,
                    args.guests,
                    args.guest_name,
                )
                .await?;
            writeln!(out, "{id} pending")?;
        }
        Command::Accept { id } => {
            engine.accept_reservation(id.clone()).await?;
            writeln!(out, "{id} confirmed")?;
        }
        Command::Decline { id } => {
            engine.decline_reservation(id.clone()).await?;
            writeln!(out, "{id} cancelled")?;
        }
        Command::Cancel { id } => {
            engine.cancel_reservation(id.clone()).await?;
            writeln!(out, "{id} cancelled")?;
        }
        Command::Complete { id, on } => {
            engine.complete_reservation(id.clone(), on.unwrap_or_else(today)).await?;
            writeln!(out, "{id} completed")?;
        }
        Command::Reschedule {
            id,
            check_in,
            check_out,
        } => {
            engine.reschedule_reservation(id.clone(), check_in, check_out).await?;
            writeln!(out, "{id} moved to {}", Stay::new(check_in, check_out))?;
        }
        Command::Show { id } => {
            let r = engine.get_reservation(&id).await?;
            write_reservation(&mut out, &r)?;
        }
        Command::Reservations { property, status } => {
            for r in engine.get_reservations(&property, status).await? {
                write_reservation(&mut out, &r)?;
            }
        }
        Command::Check {
            property,
            check_in,
            check_out,
            exclude,
        } => {
            if engine
                .is_range_available(&property, check_in, check_out, exclude.as_ref())
                .await?
            {
                writeln!(out, "available")?;
            } else {
                writeln!(out, "unavailable, conflicts with:")?;
                for r in engine
                    .conflicting(&property, check_in, check_out, exclude.as_ref())
                    .await?
                {
                    write_reservation(&mut out, &r)?;
                }
                write_ranges(&mut out, &engine.unavailable_ranges(&property).await?)?;
            }
        }
        Command::Occupancy { property, day } => {
            let occupancy = engine.occupancy_for_day(&property, day).await?;
            writeln!(out, "{day} {}", occupancy_label(occupancy))?;
        }
        Command::Day { property, day } => {
            let bookings = engine.bookings_for_day(&property, day).await?;
            if bookings.is_empty() {
                writeln!(out, "{day} free")?;
            }
            for r in &bookings {
                write_reservation(&mut out, r)?;
            }
        }
        Command::Calendar {
            property,
            year,
            month,
        } => {
            for cell in engine.month_calendar(&property, year, month).await? {
                write_cell(&mut out, &cell)?;
            }
        }
        Command::Quote {
            property,
            check_in,
            check_out,
        } => {
            let q = engine.quote(&property, check_in, check_out).await?;
            writeln!(out, "{} nights x {} = {}", q.nights, q.nightly_price, q.subtotal)?;
            writeln!(out, "cleaning fee {}", q.cleaning_fee)?;
            writeln!(out, "service fee {}", q.service_fee)?;
            writeln!(out, "total {}", q.total)?;
        }
        Command::Export { out: path } => {
            let json = engine.snapshot().await.to_json()?;
            match path {
                Some(path) => {
                    std::fs::write(&path, json)?;
                    writeln!(out, "exported to {}", path.display())?;
                }
                None => writeln!(out, "{json}")?,
            }
        }
        Command::Import { file } => {
            let snapshot = Snapshot::from_json(&std::fs::read_to_string(&file)?)?;
            let n = engine.import_snapshot(&snapshot).await?;
            writeln!(
                out,
                "imported {} properties, {n} reservations",
                snapshot.property_count()
            )?;
        }
        Command::Audit { file } => {
            let snapshot = Snapshot::from_json(&std::fs::read_to_string(&file)?)?;
            let anomalies = snapshot.anomalies();
            if anomalies.is_empty() {
                writeln!(out, "no overlapping reservations")?;
            }
            for (a, b) in anomalies {
                writeln!(out, "overlap: {a} {b}")?;
            }
        }
        Command::Run => {
            return Err(EngineError::LimitExceeded("run is handled by the binary").into());
        }
    }
    Ok(out)
}

async fn property(
    engine: &Engine,
    cmd: PropertyCommand,
    out: &mut String,
) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        PropertyCommand::Add(args) => {
            let id = Id::generate();
            engine
                .create_property(id.clone(), args.name, args.max_guests, args.price)
                .await?;
            writeln!(out, "{id}")?;
        }
        PropertyCommand::Update { id, args } => {
            engine
                .update_property(id.clone(), args.name, args.max_guests, args.price)
                .await?;
            writeln!(out, "{id} updated")?;
        }
        PropertyCommand::List => {
            for p in engine.list_properties().await {
                writeln!(
                    out,
                    "{} {} guests<={} price={}",
                    p.id,
                    p.name.as_deref().unwrap_or("-"),
                    p.max_guests,
                    p.nightly_price
                )?;
            }
        }
        PropertyCommand::Remove { id } => {
            engine.delete_property(id.clone()).await?;
            writeln!(out, "{id} removed")?;
        }
    }
    Ok(())
}

fn occupancy_label(occupancy: Occupancy) -> &'static str {
    match occupancy {
        Occupancy::Available => "available",
        Occupancy::Occupied => "occupied",
    }
}

fn write_reservation(out: &mut String, r: &Reservation) -> std::fmt::Result {
    writeln!(
        out,
        "{} {} {} guests={}{}",
        r.id,
        r.stay(),
        r.status,
        r.guest_count,
        r.guest_name
            .as_deref()
            .map(|n| format!(" name={n}"))
            .unwrap_or_default()
    )
}

fn write_ranges(out: &mut String, ranges: &[Stay]) -> std::fmt::Result {
    write!(out, "unavailable:")?;
    for stay in ranges {
        write!(out, " {stay}")?;
    }
    writeln!(out)
}

/// A cell shows the first booking of the day; extra overlapping ones are counted.
fn write_cell(out: &mut String, cell: &DayCell) -> std::fmt::Result {
    write!(out, "{} {}", cell.day, occupancy_label(cell.occupancy))?;
    if let Some(first) = cell.reservations.first() {
        write!(out, " {} {}", first.id, first.status)?;
        if cell.reservations.len() > 1 {
            write!(out, " (+{})", cell.reservations.len() - 1)?;
        }
    }
    writeln!(out)
}
