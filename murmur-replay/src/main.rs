//! murmur-replay: feed a recorded gateway log through the message cache.
//!
//! Reads one JSON [`GatewayEvent`] per line from a file or stdin, applies
//! them in order and prints what every channel cache holds at the end.
//!
//!   murmur-replay --input events.jsonl --watch 10 --pretty
//!
//! Cache bounds come from `--config`, `$MURMUR_CONFIG` or the default
//! config path. Set `RUST_LOG=murmur_core=debug` to trace evictions.

mod summary;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use murmur_core::{
    CacheError, GatewayEvent, ListenerKind, Message, MessageEvent, MessageId, MessageStore,
    StoreConfig, UserId, listener,
};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;

use crate::summary::Summary;

#[derive(Parser)]
#[command(name = "murmur-replay", about = "Replay a gateway event log through the message cache")]
struct Args {
    /// Event log, one JSON event per line ("-" for stdin)
    #[arg(long, default_value = "-")]
    input: PathBuf,

    /// Config file (TOML)
    #[arg(long, env = "MURMUR_CONFIG")]
    config: Option<PathBuf>,

    /// Id of the local account; its reactions count as self reactions
    #[arg(long)]
    self_id: Option<u64>,

    /// Log every event on these message ids (repeatable)
    #[arg(long)]
    watch: Vec<u64>,

    /// Pretty-print the summary
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur_replay=info,murmur_core=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(StoreConfig::default_path);
    let mut config = StoreConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    if let Some(id) = args.self_id {
        config.self_id = Some(UserId::new(id));
    }

    tracing::info!(
        input = %args.input.display(),
        config = %config_path.display(),
        capacity = config.cache.capacity(),
        max_age_seconds = config.cache.max_age_seconds(),
        "Starting replay"
    );

    let store = Arc::new(MessageStore::new(config));
    watch(&store, args.watch.iter().copied().map(MessageId::new).collect());

    let (tx, rx) = mpsc::channel(256);
    let reader = if args.input.as_os_str() == "-" {
        tokio::spawn(feed(tokio::io::stdin(), tx))
    } else {
        let file = tokio::fs::File::open(&args.input)
            .await
            .with_context(|| format!("opening {}", args.input.display()))?;
        tokio::spawn(feed(file, tx))
    };

    let events = store.run(rx).await;
    let malformed = reader.await??;
    tracing::info!(events, malformed, "Replay finished");

    let summary = Summary::collect(&store, events, malformed);
    let json = if args.pretty {
        serde_json::to_string_pretty(&summary)?
    } else {
        serde_json::to_string(&summary)?
    };
    println!("{json}");
    Ok(())
}

/// Forward decoded lines to the store. Returns how many lines were
/// malformed.
async fn feed<R: AsyncRead + Unpin>(input: R, tx: mpsc::Sender<GatewayEvent>) -> Result<usize> {
    let mut lines = BufReader::new(input).lines();
    let mut number = 0;
    let mut malformed = 0;
    while let Some(line) = lines.next_line().await? {
        number += 1;
        match decode_line(number, &line) {
            Some(Ok(event)) => {
                if tx.send(event).await.is_err() {
                    tracing::warn!("store stopped before the input ended");
                    break;
                }
            }
            Some(Err(_)) => malformed += 1,
            None => {}
        }
    }
    Ok(malformed)
}

/// `None` for blank lines. Malformed lines are logged and returned as errors.
fn decode_line(number: usize, line: &str) -> Option<Result<GatewayEvent, CacheError>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let decoded = GatewayEvent::from_json(line);
    if let Err(e) = &decoded {
        tracing::warn!(line = number, "skipping event: {e}");
    }
    Some(decoded)
}

/// Log every event on the watched ids. Delete listeners pin, so watched
/// messages stay cached until deleted.
fn watch(store: &MessageStore, ids: Vec<MessageId>) {
    if ids.is_empty() {
        return;
    }
    store.add_create_listener(Arc::new(move |message: &Arc<Message>| {
        if !ids.contains(&message.id()) {
            return;
        }
        tracing::info!(message = %message.id(), channel = %message.channel_id(), "watching");
        for kind in ListenerKind::ALL {
            message.add_listener(
                kind,
                listener(|snapshot, event| match event {
                    MessageEvent::Edit {
                        previous_content,
                        content,
                        ..
                    } => tracing::info!(message = %snapshot.id, %previous_content, %content, "edited"),
                    MessageEvent::Delete { .. } => tracing::info!(message = %snapshot.id, "deleted"),
                    MessageEvent::ReactionAdd {
                        user_id, emoji, count, ..
                    } => tracing::info!(message = %snapshot.id, user = %user_id, %emoji, count, "reaction added"),
                    MessageEvent::ReactionRemove {
                        user_id, emoji, count, ..
                    } => tracing::info!(message = %snapshot.id, user = %user_id, %emoji, count, "reaction removed"),
                }),
            );
        }
    }));
}
