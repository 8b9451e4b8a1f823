use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    transport::DEFAULT_TRANSPORT_CAPACITY, BroadcastTransport, ChatView, ClientEvent, EditOutcome,
    HttpMessageApi, MissingBroadcastTransport, SendOutcome, SubscriptionManager, ViewOptions,
    WebSocketTransport,
};
use shared::{
    domain::{ChannelId, ServerId, UserId},
    protocol::MessageAuthor,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::{self, error::RecvError},
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod render;

use config::{load_settings, ChatSettings, DEFAULT_SETTINGS_FILE};
use render::{parse_command, render_event, render_lobbies, Command, Transcript, HELP};

#[derive(Parser, Debug)]
#[command(about = "Terminal client for a realtime chat channel")]
struct Args {
    #[arg(long, default_value = DEFAULT_SETTINGS_FILE)]
    config: PathBuf,
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    user_id: Option<i64>,
    #[arg(long)]
    display_name: Option<String>,
    #[arg(long)]
    server_id: Option<i64>,
    #[arg(long)]
    channel_id: Option<i64>,
}

impl Args {
    fn apply(self, settings: &mut ChatSettings) {
        if let Some(v) = self.server_url {
            settings.server_url = v;
        }
        if let Some(v) = self.user_id {
            settings.user_id = v;
        }
        if self.display_name.is_some() {
            settings.display_name = self.display_name;
        }
        if let Some(v) = self.server_id {
            settings.server_id = v;
        }
        if let Some(v) = self.channel_id {
            settings.channel_id = v;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut settings = load_settings(&args.config);
    args.apply(&mut settings);

    let user_id = UserId(settings.user_id);
    let (server_id, channel_id) = (ServerId(settings.server_id), ChannelId(settings.channel_id));
    let viewer = MessageAuthor {
        id: user_id,
        display_name: settings.display_name(),
        avatar_url: None,
    };

    let api = Arc::new(
        HttpMessageApi::new(&settings.server_url, user_id)
            .with_context(|| format!("invalid server url '{}'", settings.server_url))?,
    );
    api.set_profile(&viewer.display_name, None)
        .await
        .context("failed to register display name with the relay")?;

    let transport: Arc<dyn BroadcastTransport> =
        match WebSocketTransport::connect(&settings.server_url, user_id, DEFAULT_TRANSPORT_CAPACITY)
            .await
        {
            Ok(transport) => transport,
            Err(err) => {
                warn!(%err, "chat: realtime updates unavailable, continuing without them");
                Arc::new(MissingBroadcastTransport)
            }
        };
    let subscriptions = SubscriptionManager::new(transport);

    let mut options = ViewOptions::new(viewer);
    options.history_limit = settings.history_limit;
    let view = Arc::new(
        ChatView::mount(&subscriptions, api.clone(), server_id, channel_id, options).await,
    );
    info!(
        server_id = server_id.0,
        channel_id = channel_id.0,
        live = view.is_live(),
        "chat: joined channel"
    );

    let printer = tokio::spawn(print_updates(view.clone(), view.subscribe_events()));
    view.load_history().await;
    println!(
        "joined server {server_id} channel {channel_id} as {}; /help lists commands",
        settings.display_name()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let Some(command) = parse_command(&line) else {
            continue;
        };
        match command {
            Command::Quit => break,
            Command::Help => println!("{HELP}"),
            Command::Invalid(reason) => println!("{reason}"),
            Command::Say(text) => {
                view.set_draft(text).await;
                if let SendOutcome::Rejected = view.send_message().await {
                    println!("nothing to send");
                }
            }
            Command::Edit {
                message_id,
                content,
            } => {
                if !view.begin_edit(message_id).await {
                    println!("#{message_id} is not in this channel");
                    continue;
                }
                view.set_edit_draft(content).await;
                if let EditOutcome::Rejected = view.save_edit().await {
                    println!("nothing to save");
                }
                view.cancel_edit().await;
            }
            Command::Delete(message_id) => {
                view.delete_message(message_id).await;
            }
            Command::History => {
                view.load_history().await;
            }
            Command::Lobby {
                link,
                expires_in_secs,
            } => {
                if let Err(err) = api.set_lobby(server_id, &link, expires_in_secs).await {
                    println!("! Failed to open lobby: {err}");
                }
            }
            Command::Unlobby => {
                if let Err(err) = api.clear_lobby(server_id).await {
                    println!("! Failed to close lobby: {err}");
                }
            }
            Command::Lobbies => {
                let board = view.lobby_board().await;
                for line in render_lobbies(&board, chrono::Utc::now()) {
                    println!("{line}");
                }
            }
        }
    }

    printer.abort();
    let _ = printer.await;
    if let Ok(view) = Arc::try_unwrap(view) {
        view.unmount();
    }
    Ok(())
}

async fn print_updates(view: Arc<ChatView>, mut events: broadcast::Receiver<ClientEvent>) {
    let mut transcript = Transcript::default();
    loop {
        match events.recv().await {
            Ok(ClientEvent::MessagesChanged) | Err(RecvError::Lagged(_)) => {
                for line in transcript.refresh(&view.snapshot().await) {
                    println!("{line}");
                }
            }
            Ok(event) => {
                if let Some(line) = render_event(&event) {
                    println!("{line}");
                }
            }
            Err(RecvError::Closed) => break,
        }
    }
}
