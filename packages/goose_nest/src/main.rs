use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::prelude::*;

mod cli;
mod config;

use crate::config::NestConfig;

#[derive(Parser)]
#[command(name = "nest")]
#[command(about = "Chat with buyers and sellers on the Goose Nest marketplace")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom data directory (defaults to ~/.goosenest)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List conversations, most recent first
    Groups(GroupsArgs),

    /// Interactive chat, optionally opening a conversation right away
    Chat(ChatArgs),

    /// Print new-message alerts and new conversations as they happen
    Listen,

    /// Confirm (or revoke) use of the central trading system
    Confirm(ConfirmArgs),

    /// Start a conversation with a seller about a listing
    Contact(ContactArgs),
}

#[derive(Parser)]
struct GroupsArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Parser)]
struct ChatArgs {
    /// Conversation ID to open
    group: Option<String>,
}

#[derive(Parser)]
struct ConfirmArgs {
    /// Conversation ID
    group: String,

    /// Withdraw a previous confirmation
    #[arg(long)]
    revoke: bool,
}

#[derive(Parser)]
struct ContactArgs {
    /// Listing (product) ID
    #[arg(long)]
    product: String,

    /// Seller email
    #[arg(long)]
    seller: String,

    /// Conversation name, usually the listing title
    #[arg(long)]
    name: String,

    /// Cover image URL
    #[arg(long, default_value = "")]
    cover: String,
}

fn init_tracing(debug: bool) {
    let default_directive = if debug {
        "nest=debug,goose_chat=debug,info"
    } else {
        "nest=info,goose_chat=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    // stdout belongs to the chat transcript.
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config = NestConfig::new(cli.data_dir.clone())?;

    match cli.command {
        Commands::Groups(args) => cli::groups_command(&config, args.json).await,
        Commands::Chat(args) => cli::chat::chat_command(&config, args.group).await,
        Commands::Listen => cli::listen_command(&config).await,
        Commands::Confirm(args) => cli::confirm_command(&config, &args.group, args.revoke).await,
        Commands::Contact(args) => {
            cli::contact_command(&config, &args.product, &args.seller, &args.name, &args.cover)
                .await
        }
    }
}
