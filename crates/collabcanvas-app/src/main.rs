//! Headless CollabCanvas client.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, TryFromFloatSecsError};

use clap::Parser;
use collabcanvas_app::{ImportError, Session, SessionConfig, ShortcutRegistry, DEFAULT_COLOR};
use collabcanvas_core::transport::DEFAULT_BUS_CHANNEL;
use collabcanvas_core::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore, StorageError, UndoSemantics};
use collabcanvas_render::{CompositorConfig, ExportError};
use kurbo::Point;
use thiserror::Error;

#[derive(Debug, Error)]
enum AppError {
    #[error("Import failed: {0}")]
    Import(#[from] ImportError),
    #[error("Export failed: {0}")]
    Export(#[from] ExportError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid duration {secs}: {source}")]
    Duration {
        secs: f64,
        source: TryFromFloatSecsError,
    },
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> AppError + '_ {
    move |source| AppError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Parser, Debug)]
#[command(name = "collabcanvas")]
#[command(version, about = "Join a CollabCanvas room from the command line", long_about = None)]
struct Args {
    /// Room to join
    #[arg(long, default_value = "main")]
    room: String,

    /// Display name (generated when omitted)
    #[arg(long)]
    name: Option<String>,

    /// Colour for cursor and new operations
    #[arg(long, default_value = DEFAULT_COLOR)]
    color: String,

    /// Page origin of the relay, e.g. http://localhost:8080
    #[arg(long, value_name = "URL")]
    origin: Option<String>,

    /// Same-device broadcast channel
    #[arg(long, default_value = DEFAULT_BUS_CHANNEL)]
    channel: String,

    /// Do not look for other processes on this device
    #[arg(long)]
    no_bus: bool,

    /// Seconds to stay in the room
    #[arg(long, default_value_t = 5.0)]
    duration: f64,

    /// History JSON to load after joining
    #[arg(long, value_name = "FILE")]
    import: Option<PathBuf>,

    /// Image to place at the top-left corner after joining
    #[arg(long, value_name = "FILE")]
    image: Option<PathBuf>,

    /// Directory to write collabcanvas-<room>.json and .png into on exit
    #[arg(long, value_name = "DIR")]
    export: Option<PathBuf>,

    /// Directory for room snapshots
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Keep the snapshot in memory only
    #[arg(long)]
    no_persist: bool,

    /// Surface width in pixels
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Surface height in pixels
    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Resolve remote undo and redo by operation id
    #[arg(long)]
    undo_by_id: bool,

    /// Milliseconds between latency probes
    #[arg(long, default_value_t = 1500)]
    ping_interval: u64,

    /// Print keyboard shortcuts and exit
    #[arg(long)]
    shortcuts: bool,
}

fn snapshot_store(args: &Args) -> Result<Box<dyn SnapshotStore>, AppError> {
    if args.no_persist {
        return Ok(Box::new(MemorySnapshotStore::new()));
    }
    let store = match &args.data_dir {
        Some(dir) => FileSnapshotStore::new(dir)?,
        None => FileSnapshotStore::default_location()?,
    };
    log::info!("Snapshots stored in {}", store.base_path().display());
    Ok(Box::new(store))
}

/// How long to stay in the room. Negative values mean leave at once.
fn stay_duration(secs: f64) -> Result<Duration, AppError> {
    Duration::try_from_secs_f64(secs.max(0.0)).map_err(|source| AppError::Duration { secs, source })
}

fn export(session: &Session, dir: &Path) -> Result<(), AppError> {
    fs::create_dir_all(dir).map_err(io_error(dir))?;

    let json_path = dir.join(format!("collabcanvas-{}.json", session.room_id()));
    fs::write(&json_path, session.export_json()?).map_err(io_error(&json_path))?;

    let png_path = dir.join(format!("collabcanvas-{}.png", session.room_id()));
    fs::write(&png_path, session.export_png()?).map_err(io_error(&png_path))?;

    log::info!("Exported {} and {}", json_path.display(), png_path.display());
    Ok(())
}

fn run(args: Args) -> Result<(), AppError> {
    if args.shortcuts {
        ShortcutRegistry::print_all();
        return Ok(());
    }

    let mut config = SessionConfig::default()
        .with_room(args.room.clone())
        .with_user_color(args.color.clone())
        .with_surface(CompositorConfig::default().with_size(args.width, args.height))
        .with_bus_channel(args.channel.clone())
        .with_ping_interval(Duration::from_millis(args.ping_interval));
    if let Some(name) = &args.name {
        config = config.with_user_name(name.clone());
    }
    if let Some(origin) = &args.origin {
        config = config.with_origin(origin.clone());
    }
    if args.no_bus {
        config = config.without_device_bus();
    }
    if args.undo_by_id {
        config = config.with_undo_semantics(UndoSemantics::ById);
    }

    let stay = stay_duration(args.duration)?;
    let mut session = Session::start(config, snapshot_store(&args)?);
    println!(
        "CollabCanvas — {} as {} via {}",
        session.room_id(),
        session.user().name,
        session.transport_name()
    );

    if let Some(path) = &args.import {
        let json = fs::read_to_string(path).map_err(io_error(path))?;
        session.import_json(&json)?;
    }
    if let Some(path) = &args.image {
        let bytes = fs::read(path).map_err(io_error(path))?;
        session.place_image(Point::ZERO, &bytes)?;
    }

    session.run_for(stay);

    for entry in session.roster() {
        println!("  {} {}", entry.color, entry.label);
    }
    println!("{} operations • {}", session.history().len(), session.metrics_line());

    if let Some(dir) = &args.export {
        export(&session, dir)?;
    }
    session.close();
    Ok(())
}

fn main() {
    env_logger::init();
    log::info!("Starting CollabCanvas");

    if let Err(e) = run(Args::parse()) {
        log::error!("{}", e);
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
