//! `booking` CLI: publish time slots, book meetings, and query availability
//! against a JSON snapshot file.
//!
//! ## Usage
//!
//! ```sh
//! # Register users
//! booking user create --email ada@example.com --name Ada
//!
//! # Publish an hour of availability
//! booking slot create --user <ID> --start 2026-01-15T10:00:00Z --minutes 60
//!
//! # Who is free, and when can everyone meet?
//! booking availability --user <ID> --user <ID> \
//!     --from 2026-01-15T00:00:00Z --to 2026-01-16T00:00:00Z
//!
//! # Book the slot for a meeting
//! booking meeting schedule --organizer <ID> --slot <ID> --title Sync --participant <ID>
//!
//! # Use another snapshot file, with debug logs on stderr
//! booking --store team.json -vv slot list --user <ID> --from ... --to ...
//! ```
//!
//! Every command prints its result as pretty JSON on stdout. Failures go to
//! stderr as `error (<kind>): <reason>` with exit code 2 (invalid input),
//! 3 (not found), 4 (conflict), or 1 (anything else).

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use booking_engine::{
    AvailabilityService, BookingError, BookingService, ErrorKind, MeetingId, MemoryStore,
    ScheduleRequest, SlotEdit, SlotId, SlotService, SlotStatus, StoreConfig, StoreSnapshot,
    UserId, UserService,
};
use chrono::{DateTime, Duration, Utc};
use clap::{ArgAction, Parser, Subcommand};
use fd_lock::RwLock;
use serde::Serialize;
use serde_json::json;
use tempfile::NamedTempFile;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "booking",
    version,
    about = "Time-slot publishing, availability, and meeting booking"
)]
struct Cli {
    /// JSON snapshot holding users, slots, and meetings (created on first write)
    #[arg(
        long,
        env = "BOOKING_STORE",
        default_value = "booking-store.json",
        global = true
    )]
    store: PathBuf,

    /// Give up waiting for a slot lock after this many milliseconds
    #[arg(long, env = "BOOKING_LOCK_TIMEOUT_MS", global = true)]
    lock_timeout_ms: Option<u64>,

    /// Log more to stderr (-v info, -vv debug, -vvv trace); overrides RUST_LOG
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register and look up users
    #[command(subcommand)]
    User(UserCommand),
    /// Publish, edit, and list time slots
    #[command(subcommand)]
    Slot(SlotCommand),
    /// Book and look up meetings
    #[command(subcommand)]
    Meeting(MeetingCommand),
    /// Free/busy per user and the time free for all of them
    Availability {
        /// User to include (repeatable)
        #[arg(long = "user", required = true)]
        users: Vec<UserId>,
        /// Window start (RFC 3339)
        #[arg(long)]
        from: DateTime<Utc>,
        /// Window end, exclusive (RFC 3339)
        #[arg(long)]
        to: DateTime<Utc>,
    },
}

#[derive(Subcommand)]
enum UserCommand {
    /// Register a user
    Create {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
    },
    /// Show a user
    Get { id: UserId },
}

#[derive(Subcommand)]
enum SlotCommand {
    /// Publish a slot [start, start + minutes)
    Create {
        #[arg(long)]
        user: UserId,
        /// RFC 3339 instant
        #[arg(long)]
        start: DateTime<Utc>,
        #[arg(long, allow_negative_numbers = true)]
        minutes: i64,
        /// AVAILABLE (default) or BUSY
        #[arg(long)]
        status: Option<SlotStatus>,
    },
    /// Show a slot
    Get { id: SlotId },
    /// Move, resize, or change the status of a slot
    Update {
        id: SlotId,
        /// New start; without --minutes the current end is kept
        #[arg(long)]
        start: Option<DateTime<Utc>>,
        /// New length, measured from the (possibly new) start
        #[arg(long, allow_negative_numbers = true)]
        minutes: Option<i64>,
        #[arg(long)]
        status: Option<SlotStatus>,
    },
    /// Delete a slot that is not linked to a meeting
    Delete { id: SlotId },
    /// List a user's slots intersecting [from, to)
    List {
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        from: DateTime<Utc>,
        #[arg(long)]
        to: DateTime<Utc>,
        #[arg(long)]
        status: Option<SlotStatus>,
    },
}

#[derive(Subcommand)]
enum MeetingCommand {
    /// Book the organizer's AVAILABLE slot for a new meeting
    Schedule {
        #[arg(long)]
        organizer: UserId,
        #[arg(long)]
        slot: SlotId,
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: Option<String>,
        /// Participant to invite (repeatable)
        #[arg(long = "participant")]
        participants: Vec<UserId>,
    },
    /// Show a meeting
    Get { id: MeetingId },
}

impl Commands {
    /// Whether a successful run changes the store and must be saved.
    fn mutates(&self) -> bool {
        match self {
            Commands::User(cmd) => matches!(cmd, UserCommand::Create { .. }),
            Commands::Slot(cmd) => matches!(
                cmd,
                SlotCommand::Create { .. } | SlotCommand::Update { .. } | SlotCommand::Delete { .. }
            ),
            Commands::Meeting(cmd) => matches!(cmd, MeetingCommand::Schedule { .. }),
            Commands::Availability { .. } => false,
        }
    }
}

/// Every service over one store loaded from the snapshot file.
struct Services {
    store: Arc<MemoryStore>,
    users: UserService<MemoryStore>,
    slots: SlotService<MemoryStore>,
    availability: AvailabilityService<MemoryStore>,
    booking: BookingService<MemoryStore>,
}

impl Services {
    fn new(store: MemoryStore) -> Self {
        let store = Arc::new(store);
        Self {
            users: UserService::new(Arc::clone(&store)),
            slots: SlotService::new(Arc::clone(&store)),
            availability: AvailabilityService::new(Arc::clone(&store)),
            booking: BookingService::new(Arc::clone(&store)),
            store,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report(&err),
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let mut config = StoreConfig::default();
    if let Some(ms) = cli.lock_timeout_ms {
        config = config.with_lock_timeout(StdDuration::from_millis(ms));
    }

    // Held from load to save, so concurrent invocations serialize on the file.
    let mut lock = RwLock::new(open_lock_file(&cli.store)?);
    if cli.command.mutates() {
        let _guard = lock.write().context("Failed to lock store for writing")?;
        run_locked(&cli.store, config, cli.command, true)
    } else {
        let _guard = lock.read().context("Failed to lock store for reading")?;
        run_locked(&cli.store, config, cli.command, false)
    }
}

fn run_locked(path: &Path, config: StoreConfig, command: Commands, mutates: bool) -> Result<()> {
    let snapshot = load_snapshot(path)?;
    let store = MemoryStore::from_snapshot(snapshot, config)
        .with_context(|| format!("Invalid store: {}", path.display()))?;
    let services = Services::new(store);

    let output = execute(&services, command)?;

    if mutates {
        let snapshot = services
            .store
            .snapshot()
            .context("Failed to read back the store")?;
        save_snapshot(path, &snapshot)?;
    }
    print_json(&output)
}

/// `<store>.lock` next to the snapshot. The snapshot itself is replaced on
/// every save, so it cannot carry the lock.
fn open_lock_file(store: &Path) -> Result<File> {
    let mut name = store.as_os_str().to_owned();
    name.push(".lock");
    let path = PathBuf::from(name);
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .with_context(|| format!("Failed to open lock file: {}", path.display()))
}

fn minutes_to_duration(value: i64) -> Result<Duration> {
    Duration::try_minutes(value)
        .ok_or_else(|| BookingError::InvalidInput(format!("{value} minutes is out of range")).into())
}

fn execute(s: &Services, command: Commands) -> Result<serde_json::Value> {
    let value = match command {
        Commands::User(UserCommand::Create { email, name }) => {
            serde_json::to_value(s.users.create(&email, &name)?)?
        }
        Commands::User(UserCommand::Get { id }) => serde_json::to_value(s.users.get(id)?)?,

        Commands::Slot(SlotCommand::Create {
            user,
            start,
            minutes,
            status,
        }) => {
            let duration = minutes_to_duration(minutes)?;
            serde_json::to_value(s.slots.create(user, start, duration, status)?)?
        }
        Commands::Slot(SlotCommand::Get { id }) => serde_json::to_value(s.slots.get(id)?)?,
        Commands::Slot(SlotCommand::Update {
            id,
            start,
            minutes,
            status,
        }) => {
            let edit = SlotEdit {
                start,
                duration: minutes.map(minutes_to_duration).transpose()?,
                status,
            };
            serde_json::to_value(s.slots.update(id, &edit)?)?
        }
        Commands::Slot(SlotCommand::Delete { id }) => {
            s.slots.delete(id)?;
            json!({ "deleted": id })
        }
        Commands::Slot(SlotCommand::List {
            user,
            from,
            to,
            status,
        }) => serde_json::to_value(s.slots.list(user, from, to, status)?)?,

        Commands::Meeting(MeetingCommand::Schedule {
            organizer,
            slot,
            title,
            description,
            participants,
        }) => {
            let request = ScheduleRequest {
                organizer_id: organizer,
                slot_id: slot,
                title,
                description,
                participant_ids: participants,
            };
            serde_json::to_value(s.booking.schedule(request)?)?
        }
        Commands::Meeting(MeetingCommand::Get { id }) => serde_json::to_value(s.booking.get(id)?)?,

        Commands::Availability { users, from, to } => {
            serde_json::to_value(s.availability.availability(&users, from, to)?)?
        }
    };
    Ok(value)
}

/// Read the snapshot at `path`; a missing file is an empty store.
fn load_snapshot(path: &Path) -> Result<StoreSnapshot> {
    if !path.exists() {
        debug!(path = %path.display(), "no snapshot yet, starting empty");
        return Ok(StoreSnapshot::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read store: {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse store: {}", path.display()))
}

/// Replace the snapshot atomically: write a sibling temp file, then rename it
/// over `path`.
fn save_snapshot(path: &Path, snapshot: &StoreSnapshot) -> Result<()> {
    let raw = serde_json::to_string_pretty(snapshot).context("Failed to serialize store")?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    tmp.write_all(raw.as_bytes()).context("Failed to write store")?;
    tmp.as_file().sync_all().context("Failed to flush store")?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to write store: {}", path.display()))?;

    debug!(path = %path.display(), slots = snapshot.slots.len(), "snapshot saved");
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let pretty = serde_json::to_string_pretty(value)?;
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{pretty}").context("Failed to write to stdout")?;
    Ok(())
}

/// Print `err` to stderr and pick the exit code for it.
fn report(err: &anyhow::Error) -> ExitCode {
    let Some(booking) = err.downcast_ref::<BookingError>() else {
        eprintln!("error: {err:#}");
        return ExitCode::FAILURE;
    };

    let kind = booking.kind();
    let reason = match booking {
        BookingError::InvalidInput(msg) | BookingError::NotFound(msg) | BookingError::Conflict(msg) => {
            msg.clone()
        }
        BookingError::Storage(inner) => inner.to_string(),
    };
    eprintln!("error ({kind}): {reason}");
    ExitCode::from(exit_code(kind))
}

fn exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::InvalidInput => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::Conflict => 4,
        ErrorKind::Internal => 1,
    }
}
