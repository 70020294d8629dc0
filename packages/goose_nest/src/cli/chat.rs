//! Interactive chat: the conversation list plus one open conversation.
//!
//! Lines typed on stdin are sent to the open conversation; lines starting
//! with `/` are commands. Incoming traffic is printed as it arrives.

use anyhow::Result;
use goose_chat::{
    ChannelKind, ChannelState, ContentRules, ConversationBook, Message, SyncUpdate,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use super::{LiveSync, connect, describe, render};
use crate::config::NestConfig;

const HELP: &str = "commands: /open ID, /close, /list, /confirm, /quit (anything else is sent)";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Input {
    Open(String),
    Close,
    List,
    Confirm,
    Quit,
    Help,
    Send(String),
    Unknown(String),
    Empty,
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Send(line.to_string());
    };
    let mut parts = command.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("open"), Some(id)) => Input::Open(id.to_string()),
        (Some("close"), None) => Input::Close,
        (Some("list"), None) => Input::List,
        (Some("confirm"), None) => Input::Confirm,
        (Some("quit") | Some("exit"), None) => Input::Quit,
        (Some("help"), None) => Input::Help,
        _ => Input::Unknown(line.to_string()),
    }
}

fn print_list(sync: &LiveSync) {
    let book = sync.book();
    if book.groups().is_empty() {
        println!("No conversations.");
        return;
    }
    println!("{}", render::group_header());
    for group in book.groups() {
        println!("{}", render::group_row(book, group));
    }
}

fn print_history(sync: &LiveSync, group_id: &str) {
    let Some(group) = sync.book().get(group_id) else {
        return;
    };
    println!("── {} ({}) with {} ──", group.name, group.id, sync.book().counterpart_name(group));
    for message in &group.messages {
        println!("{}", render::message_line(sync.book(), sync.rules(), message));
    }
}

async fn open(sync: &mut LiveSync, group_id: &str) {
    if let Err(e) = sync.open_conversation(group_id).await {
        eprintln!("[nest: cannot open {}: {}]", group_id, describe(&e));
    }
}

/// Returns false when the session should end.
async fn handle_input(sync: &mut LiveSync, input: Input) -> bool {
    match input {
        Input::Empty => {}
        Input::Quit => return false,
        Input::Help => eprintln!("{HELP}"),
        Input::Unknown(line) => eprintln!("[nest: unknown command {line:?}; {HELP}]"),
        Input::List => print_list(sync),
        Input::Open(id) => open(sync, &id).await,
        Input::Close => {
            if sync.close_conversation() {
                eprintln!("[nest: conversation closed]");
            }
        }
        Input::Confirm => match sync.book().active().map(str::to_owned) {
            Some(id) => match sync.confirm_trade(&id, true).await {
                Ok(receipt) => eprintln!("[nest: {}]", receipt.message),
                Err(e) => eprintln!("[nest: confirmation failed: {}]", describe(&e)),
            },
            None => eprintln!("[nest: open a conversation first]"),
        },
        Input::Send(text) => {
            if sync.book().active().is_none() {
                eprintln!("[nest: open a conversation first (/open ID)]");
            } else if !sync.send_message(&text) {
                eprintln!("[nest: not sent, the conversation channel is not open]");
            }
        }
    }
    true
}

/// Transcript line for an appended message, if it belongs to the open conversation.
fn appended_line(book: &ConversationBook, rules: &ContentRules, message: &Message) -> Option<String> {
    book.is_active(&message.group_id)
        .then(|| render::message_line(book, rules, message))
}

fn render_update(sync: &LiveSync, update: SyncUpdate) {
    let active = sync.book().active();
    match update {
        SyncUpdate::HistoryLoaded { group_id } if active == Some(group_id.as_str()) => {
            print_history(sync, &group_id);
        }
        SyncUpdate::MessageAppended(message) => {
            if let Some(line) = appended_line(sync.book(), sync.rules(), &message) {
                println!("{line}");
            }
        }
        SyncUpdate::Alert(alert) => eprintln!("{}", render::alert_line(&alert)),
        SyncUpdate::GroupAdded { group_id } => {
            if let Some(group) = sync.book().get(&group_id) {
                eprintln!("[nest: new conversation {} ({})]", group.name, group.id);
            }
        }
        SyncUpdate::ChannelState {
            kind: ChannelKind::Active,
            state,
        } => match state {
            ChannelState::Open => eprintln!("[nest: connected, type to chat]"),
            _ => eprintln!("[nest: conversation channel {state}]"),
        },
        other => debug!(?other, "update"),
    }
}

pub async fn chat_command(config: &NestConfig, group_id: Option<String>) -> Result<()> {
    let client = config.client_config()?;
    let (mut sync, mut updates) = connect(&client)?;

    sync.start();
    if let Err(e) = sync.load_conversations().await {
        eprintln!("[nest: could not load conversations: {}]", describe(&e));
    }
    print_list(&sync);
    eprintln!("{HELP}");
    if let Some(id) = group_id {
        open(&mut sync, &id).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            event = sync.next_event() => match event {
                Some(event) => sync.handle_event(event).await,
                None => break,
            },
            Some(update) = updates.recv() => render_update(&sync, update),
            line = lines.next_line() => match line? {
                Some(line) => {
                    if !handle_input(&mut sync, parse_input(&line)).await {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    sync.shutdown();
    Ok(())
}
