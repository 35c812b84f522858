use std::sync::Arc;

use anyhow::{Context, bail};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use uuid::Uuid;

use murmur_api::ApiClient;
use murmur_client::{ChatSession, Config};
use murmur_crypto::{KeyManager, P256Provider};
use murmur_gateway::{ConnectionState, DecryptedMessage, RouterConfig, RouterEvent, WsConnector};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur=info".into()),
        )
        .init();

    let peer: Uuid = std::env::args()
        .nth(1)
        .context("usage: murmur <peer-uuid>")?
        .parse()
        .context("peer must be a UUID")?;

    // Config
    let config = Config::from_env()?;

    // Keys live in the local SQLite database
    let db = Arc::new(murmur_db::Database::open(&config.db_path)?);
    let keys = Arc::new(KeyManager::new(Arc::new(P256Provider::new()), db));
    let api = Arc::new(ApiClient::new(&config.api_url, &config.token));

    let (session, mut events) = ChatSession::new(
        keys,
        api,
        WsConnector,
        config.connection(),
        RouterConfig::default(),
    );

    session.start(&config.token).await?;
    info!("Your key fingerprint: {}", session.fingerprint()?);

    let mut state = session.watch_state();
    let reached = *state
        .wait_for(|s| matches!(s, ConnectionState::Authenticated | ConnectionState::Disconnected))
        .await?;
    if reached == ConnectionState::Disconnected {
        bail!("could not connect to {}", config.ws_url);
    }

    for message in session.open_conversation(peer).await? {
        print_message(&message);
    }
    info!("Peer key fingerprint: {}", session.peer_fingerprint(peer)?);

    // Print router events and connection changes as they arrive
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(RouterEvent::Message(message)) => print_message(&message),
                    Some(RouterEvent::TypingStarted { .. }) => println!("  ... typing"),
                    Some(RouterEvent::TypingStopped { .. }) => {}
                    None => break,
                },
                changed = state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = *state.borrow_and_update();
                    println!("  [{:?}]", current);
                }
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                session.notify_typing();
                if let Err(e) = session.send_message(line).await {
                    warn!("Message not sent: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.close();
    Ok(())
}

fn print_message(message: &DecryptedMessage) {
    let who = if message.outgoing {
        "me".to_string()
    } else {
        message.peer_id.to_string()
    };
    let marker = if message.in_active_conversation { "" } else { " (other chat)" };
    println!(
        "[{}] {}{}: {}",
        message.created_at.format("%H:%M"),
        who,
        marker,
        message.content
    );
}
