use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use clap::Parser;
use norn_core::adventure::AdventureStore;
use norn_core::config::NornConfig;
use norn_core::profile::ProfileStore;
use norn_core::state::StateStore;
use norn_core::store::{JsonFileStore, KvStore};
use norn_core::{ChatSink, MessageEvent, Persona};
use norn_engine::controller::Controller;
use norn_engine::dispatch::CallContext;
use norn_engine::handlers::Services;
use norn_engine::pacing::TokioClock;
use norn_engine::provider::HttpCompletionClient;
use norn_engine::sweep;
use norn_memory::BufferStore;
use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Verdandi, a fate-weaving adventure narrator")]
struct Args {
    /// Path to the config file
    #[arg(short, long, default_value = "norn.toml")]
    config: String,

    /// Path to the persona file
    #[arg(short, long, default_value = "persona.toml")]
    persona: String,

    /// Override the data directory
    #[arg(short, long)]
    data_dir: Option<String>,
}

/// Prints replies to the terminal; reactions become a bracketed choice hint.
struct TerminalSink {
    counter: AtomicU64,
}

#[async_trait]
impl ChatSink for TerminalSink {
    async fn send(&self, _channel: &str, text: &str) -> Result<String> {
        println!("\nVerdandi: {text}");
        print!("> ");
        io::stdout().flush()?;
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(format!("term_{n}"))
    }

    async fn react(&self, _channel: &str, _message_id: &str, emoji: &str) -> Result<()> {
        println!("[choice available: {emoji}]");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "norn_cli=info,norn_engine=info,norn_core=info".into()),
        )
        .init();
    let args = Args::parse();

    let mut config = NornConfig::load_or_default(&args.config);
    if let Some(dir) = args.data_dir {
        config.data_dir.root = dir;
    }
    let persona = Persona::load_or_default(&args.persona).await;
    info!("Persona loaded: {}", persona.name);

    let backing: Arc<dyn KvStore> = Arc::new(JsonFileStore::new(&config.data_dir.root));
    let client = Arc::new(HttpCompletionClient::new(&config.llm)?);
    let services = Arc::new(Services {
        profiles: ProfileStore::new(backing.clone()),
        states: StateStore::new(backing.clone()),
        adventures: AdventureStore::new(backing.clone()),
        buffers: BufferStore::new(backing, config.memory.max_short_term),
        client,
        persona,
        config,
    });

    let sink = Arc::new(TerminalSink {
        counter: AtomicU64::new(0),
    });
    let controller = Arc::new(Controller::new(
        services,
        sink,
        Arc::new(TokioClock),
    ));
    let sweeper = sweep::spawn(controller.clone());

    println!("Verdandi is at the loom. Type /help for commands, 'quit' to leave.");
    print!("> ");
    io::stdout().flush()?;

    let stdin = io::stdin();
    let mut input = String::new();

    loop {
        input.clear();
        if stdin.read_line(&mut input)? == 0 {
            break;
        }
        let trimmed = input.trim();

        if trimmed == "quit" || trimmed == "exit" {
            break;
        }
        if trimmed.is_empty() {
            print!("> ");
            io::stdout().flush()?;
            continue;
        }

        let ctx = CallContext {
            user_id: "local".to_string(),
            username: whoami(),
            channel: "terminal".to_string(),
        };

        if let Some(command) = trimmed.strip_prefix('/') {
            controller.handle_command(&ctx, command).await;
            continue;
        }

        controller
            .handle_message(&MessageEvent {
                user_id: ctx.user_id.clone(),
                author: ctx.username.clone(),
                channel: ctx.channel.clone(),
                body: trimmed.to_string(),
                timestamp: Utc::now(),
            })
            .await;
    }

    sweeper.abort();
    info!("Farewell.");
    Ok(())
}

fn whoami() -> String {
    std::env::var("USER").unwrap_or_else(|_| "traveller".to_string())
}
