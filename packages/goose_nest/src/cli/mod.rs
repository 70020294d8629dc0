pub mod chat;
pub mod render;

use anyhow::{Context, Result};
use goose_chat::{
    ContactOutcome, HttpBackend, SyncError, SyncSettings, SyncUpdate, Synchronizer, WsConnector,
};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::{ClientConfig, NestConfig};
use render::GroupSummary;

pub type LiveSync = Synchronizer<HttpBackend, WsConnector>;

/// Build a synchronizer for the configured member. Nothing is opened yet.
pub fn connect(client: &ClientConfig) -> Result<(LiveSync, mpsc::UnboundedReceiver<SyncUpdate>)> {
    let backend = HttpBackend::new(&client.base_url, client.token.clone(), client.timeout)
        .context("Invalid api.base_url")?;
    let settings = SyncSettings {
        email: client.email.clone(),
        ws_base_url: client.ws_base_url.clone(),
        rules: client.rules.clone(),
    };
    Synchronizer::new(backend, WsConnector, settings).context("Invalid api.ws_base_url")
}

fn describe(err: &SyncError) -> String {
    if err.is_unavailable() {
        "backend unreachable".to_string()
    } else {
        err.to_string()
    }
}

/// Print the conversation list, most recent first.
pub async fn groups_command(config: &NestConfig, json: bool) -> Result<()> {
    let client = config.client_config()?;
    let (mut sync, _updates) = connect(&client)?;
    sync.load_conversations()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load conversations: {}", describe(&e)))?;

    let book = sync.book();
    if json {
        let rows: Vec<GroupSummary> = book
            .groups()
            .iter()
            .map(|g| GroupSummary::new(book, g))
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else if book.groups().is_empty() {
        println!("No conversations.");
    } else {
        println!("{}", render::group_header());
        println!("{}", "-".repeat(100));
        for group in book.groups() {
            println!("{}", render::group_row(book, group));
        }
        println!(
            "\n{} conversation(s), {} unread",
            book.groups().len(),
            book.unread_count()
        );
    }
    Ok(())
}

/// Stay connected to the process-wide channels and print what happens.
pub async fn listen_command(config: &NestConfig) -> Result<()> {
    let client = config.client_config()?;
    let (mut sync, mut updates) = connect(&client)?;
    sync.start();
    if let Err(e) = sync.load_conversations().await {
        eprintln!("[nest: could not load conversations: {}]", describe(&e));
    }
    eprintln!("[nest: listening as {}, ctrl-c to stop]", client.email);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            event = sync.next_event() => match event {
                Some(event) => sync.handle_event(event).await,
                None => break,
            },
            Some(update) = updates.recv() => match update {
                SyncUpdate::Alert(alert) => println!("{}", render::alert_line(&alert)),
                SyncUpdate::GroupAdded { group_id } => {
                    if let Some(group) = sync.book().get(&group_id) {
                        println!("[new conversation] {}", render::group_row(sync.book(), group));
                    }
                }
                SyncUpdate::ChannelState { kind, state } => {
                    eprintln!("[nest: {} channel {}]", kind, state);
                }
                other => debug!(?other, "update"),
            },
        }
    }

    sync.shutdown();
    Ok(())
}

/// Confirm (or revoke) use of the central trading system for a conversation.
pub async fn confirm_command(config: &NestConfig, group_id: &str, revoke: bool) -> Result<()> {
    let client = config.client_config()?;
    let (mut sync, _updates) = connect(&client)?;
    let receipt = sync
        .confirm_trade(group_id, !revoke)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to update confirmation: {}", describe(&e)))?;
    info!(group_id, "confirmation updated");
    println!(
        "{} ({} {})",
        receipt.message,
        receipt.confirmed_by,
        if receipt.status { "confirmed" } else { "revoked" }
    );
    Ok(())
}

/// Open a conversation with a seller about a listing.
pub async fn contact_command(
    config: &NestConfig,
    product_id: &str,
    seller: &str,
    name: &str,
    cover_image: &str,
) -> Result<()> {
    let client = config.client_config()?;
    let (mut sync, _updates) = connect(&client)?;
    let outcome = sync
        .contact_seller(product_id, seller, name, cover_image)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to contact seller: {}", describe(&e)))?;
    match outcome {
        ContactOutcome::Created(id) => println!("Started conversation {id}"),
        ContactOutcome::Existing(id) => println!("Already talking about this listing: {id}"),
    }
    Ok(())
}
