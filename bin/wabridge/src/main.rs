mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "wabridge")]
#[command(about = "WhatsApp Web automation bridge", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Override the data directory (default ~/.wabridge)
    #[arg(long, global = true)]
    data_dir: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a session: restore silently or wait for a QR scan
    Start {
        /// Run the browser with a visible window
        #[arg(long)]
        headed: bool,
        /// Seconds to wait for the QR scan before giving up
        #[arg(long, default_value = "300")]
        wait: u64,
    },

    /// Show the persisted session record
    Status,

    /// Print the current login QR code as a data URL
    Qr,

    /// Read messages (from a chat, a contact, unread, or the most recent chat)
    Messages {
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(long)]
        unread: bool,
        #[arg(long)]
        chat: Option<String>,
        #[arg(long)]
        contact: Option<String>,
    },

    /// Read the single latest message
    Latest,

    /// Send a message to a chat by exact name
    Send {
        chat: String,
        message: String,
    },

    /// List chats in sidebar order
    Chats,

    /// List individual (non-group) chats
    Contacts,

    /// Summarize unread counts without opening any chat
    Unread,

    /// Run environment diagnostics
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    let paths = match cli.data_dir {
        Some(base) => wabridge_core::Paths::with_base(base),
        None => wabridge_core::Paths::new(),
    };
    paths.ensure_dirs()?;

    match cli.command {
        Commands::Start { headed, wait } => commands::start(&paths, headed, wait).await,
        Commands::Status => commands::status(&paths),
        Commands::Qr => commands::qr(&paths).await,
        Commands::Messages {
            limit,
            unread,
            chat,
            contact,
        } => commands::messages(&paths, limit, unread, chat, contact).await,
        Commands::Latest => commands::latest(&paths).await,
        Commands::Send { chat, message } => commands::send(&paths, &chat, &message).await,
        Commands::Chats => commands::chats(&paths).await,
        Commands::Contacts => commands::contacts(&paths).await,
        Commands::Unread => commands::unread(&paths).await,
        Commands::Doctor => commands::doctor(&paths),
    }
}
