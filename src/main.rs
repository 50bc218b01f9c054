use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use telepoll::{BotConfig, Event, MessageOptions, Regime, TelegramBot};

/// Echo bot over a single long-polling connection.
#[derive(Parser, Debug)]
#[command(name = "telepoll", version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Override the configured regime: auto, inline or worker
    #[arg(long)]
    regime: Option<String>,
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("telepoll={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn parse_regime(text: &str) -> Result<Regime> {
    match text.to_ascii_lowercase().as_str() {
        "auto" => Ok(Regime::Auto),
        "inline" => Ok(Regime::Inline),
        "worker" => Ok(Regime::Worker),
        other => anyhow::bail!("unknown regime `{other}` (expected auto, inline or worker)"),
    }
}

async fn handle(bot: &TelegramBot, event: Event) {
    match event {
        Event::NoData => {}
        Event::Text { origin, text } => {
            tracing::info!("Telegram message from {}: {text}", origin.sender.id);
            bot.send_message(origin.chat_id, &text, &MessageOptions::default())
                .await;
        }
        Event::Reply { origin, text, .. } => {
            let answer = format!("You replied: {text}");
            bot.send_message(origin.chat_id, &answer, &MessageOptions::default())
                .await;
        }
        Event::Query { query, .. } => {
            let text = format!("Pressed: {}", query.data);
            bot.answer_callback_query(&query.id, Some(&text), false).await;
        }
        Event::Location {
            origin,
            latitude,
            longitude,
        } => {
            let text = format!("Location: {latitude:.6}, {longitude:.6}");
            bot.send_message(origin.chat_id, &text, &MessageOptions::default())
                .await;
        }
        Event::Contact { origin, contact } => {
            let text = format!("Contact: {} {}", contact.first_name, contact.phone_number);
            bot.send_message(origin.chat_id, &text, &MessageOptions::default())
                .await;
        }
        Event::Document { origin, document } => {
            let text = match &document.resolved_url {
                Some(url) => format!("Document received: {url}"),
                None => format!("Document {} could not be resolved", document.file_id),
            };
            bot.send_message(origin.chat_id, &text, &MessageOptions::default())
                .await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let path = match cli.config {
        Some(path) => path,
        None => BotConfig::default_path().context("no config path given and no config dir")?,
    };
    let mut config = BotConfig::load(&path)?;
    if let Some(regime) = &cli.regime {
        config.regime = parse_regime(regime)?;
    }

    let poll_interval = config.poll_interval();
    let mut bot = TelegramBot::over_tls(config)?;
    bot.begin().await.context("starting Telegram bot")?;

    let mut ticker = tokio::time::interval(poll_interval / 4);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutting down");
                break;
            }
            _ = ticker.tick() => {
                let event = bot.get_new_message().await;
                handle(&bot, event).await;
            }
        }
    }
    Ok(())
}
