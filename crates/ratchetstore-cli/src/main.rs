use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ratchetstore_session::{
    LocalKeyRecord, RecipientDevice, RecipientId, RecordKey, RecordKind, RemoteKeyRecord, Session,
    SessionRecordV1, SessionRecordV2, SessionStore, StoreConfig, DEFAULT_DEVICE_ID,
};
use ratchetstore_crypto::MasterSecret;
use tracing::info;

mod unlock;

#[derive(Parser)]
#[command(name = "ratchetstore", about = "Inspect and manage encrypted session records")]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Sessions directory, overrides config
    #[arg(long)]
    sessions_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show which session generation is usable for a recipient device
    Status {
        recipient: u64,
        #[arg(long, default_value_t = DEFAULT_DEVICE_ID)]
        device: u32,
    },
    /// Delete the legacy session and its key records
    ClearV1 { recipient: u64 },
    /// Delete every session record of a recipient
    Abort { recipient: u64 },
    /// List a recipient's records and whether they can be opened
    List { recipient: u64 },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ratchetstore=info".into()),
        )
        .init();

    let args = Args::parse();

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        StoreConfig::load_from_file(config_path)
            .with_context(|| format!("failed to load config: {}", config_path.display()))?
    } else {
        StoreConfig::default()
    };

    // CLI overrides
    if let Some(dir) = args.sessions_dir {
        config.sessions_dir = dir;
    }

    let store = SessionStore::open(&config)
        .with_context(|| format!("failed to open {}", config.sessions_dir.display()))?;
    let master = unlock::unlock(&config.sessions_dir)?;

    match args.command {
        Command::Status { recipient, device } => {
            status(&store, &master, RecipientDevice::new(recipient, device))
        }
        Command::ClearV1 { recipient } => {
            let recipient = RecipientId(recipient);
            Session::new(&store, &master)
                .clear_v1_session_for(&recipient)
                .with_context(|| format!("failed to clear V1 session for {}", recipient))?;
            info!(%recipient, "cleared");
            Ok(())
        }
        Command::Abort { recipient } => {
            let recipient = RecipientId(recipient);
            Session::new(&store, &master)
                .abort_session_for(&recipient)
                .with_context(|| format!("failed to abort sessions for {}", recipient))?;
            info!(%recipient, "aborted");
            Ok(())
        }
        Command::List { recipient } => list(&store, &master, RecipientId(recipient)),
    }
}

fn status(store: &SessionStore, master: &MasterSecret, device: RecipientDevice) -> Result<()> {
    let session = Session::new(store, master);
    let recipient = device.recipient_id;

    println!("device:          {}", device);
    println!("status:          {}", session.status(&device));
    println!("session version: {}", session.session_version(&recipient));
    println!(
        "remote identity: {}",
        if session.has_remote_identity_key(&recipient) {
            "known"
        } else {
            "unknown"
        }
    );
    Ok(())
}

fn list(store: &SessionStore, master: &MasterSecret, recipient: RecipientId) -> Result<()> {
    let mut keys = store
        .keys_for(recipient)
        .with_context(|| format!("failed to list records for {}", recipient))?;
    keys.sort_by_key(RecordKey::file_name);

    if keys.is_empty() {
        println!("no records for {}", recipient);
        return Ok(());
    }

    for key in keys {
        let health = match key.kind {
            RecordKind::Local => LocalKeyRecord::try_load(store, master, &recipient).map(|_| ()),
            RecordKind::Remote => RemoteKeyRecord::try_load(store, master, &recipient).map(|_| ()),
            RecordKind::SessionV1 => SessionRecordV1::try_load(store, master, &recipient).map(|_| ()),
            RecordKind::SessionV2 { device_id } => {
                let device = RecipientDevice::new(recipient, device_id);
                SessionRecordV2::try_load(store, master, &device).map(|_| ())
            }
        };
        match health {
            Ok(()) => println!("{:<24} ok", key.file_name()),
            Err(e) => println!("{:<24} unreadable: {}", key.file_name(), e),
        }
    }
    Ok(())
}
