//! # polyprompt emulator
//!
//! Serves OpenAI-compatible and Anthropic-style chat endpoints that answer
//! from a fixed text or by replaying a conversation database, with
//! per-model streaming speeds.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use polyprompt::cancel::CancelHandle;
use polyprompt::emulator::{
    EmulatorConfig, ResponseSource, ScriptedResponse, StaticResponses, StoreReplay, serve,
};
use polyprompt::store::SqliteConversationStore;
use polyprompt::telemetry::{OutputFormat, SubscriberConfig, init_subscriber};
use tokio::net::TcpListener;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "polyprompt-emulator")]
#[command(about = "Emulated LLM provider with realistic streaming pacing")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "POLYPROMPT_EMULATOR_BIND", default_value = "127.0.0.1:8000")]
    bind: String,

    /// Replay responses from this conversation database
    #[arg(long)]
    database: Option<PathBuf>,

    /// Answer every request with this text (fallback when replaying)
    #[arg(long)]
    response: Option<String>,

    /// Probability of answering 503 (0.0 to 1.0)
    #[arg(long, default_value_t = 0.0)]
    failure_rate: f64,

    /// Log format: text, json, json-compact
    #[arg(long, env = "POLYPROMPT_LOG_FORMAT", default_value = "text")]
    log_format: OutputFormat,

    /// Log level
    #[arg(long, env = "POLYPROMPT_LOG_LEVEL", default_value = "info")]
    log_level: tracing::Level,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut logging = SubscriberConfig::builder()
        .log_level(args.log_level)
        .output_format(args.log_format);
    if let Some(path) = &args.log_file {
        logging = logging.log_file(path);
    }
    let _guard = init_subscriber(logging.build())?;

    let source: Arc<dyn ResponseSource> = match (&args.database, &args.response) {
        (Some(path), fallback) => {
            let store = SqliteConversationStore::open(path).await?;
            info!(database = %path.display(), "replaying stored conversations");
            let mut replay = StoreReplay::new(Arc::new(store));
            if let Some(text) = fallback {
                replay = replay.with_fallback(ScriptedResponse::answer(text.clone()));
            }
            Arc::new(replay)
        }
        (None, Some(text)) => Arc::new(StaticResponses::always(ScriptedResponse::answer(text.clone()))),
        (None, None) => Arc::new(StaticResponses::always(ScriptedResponse::answer(
            "This is a simulated response from the emulator.",
        ))),
    };
    let config = EmulatorConfig::new(source).with_failure_rate(args.failure_rate);

    let listener = TcpListener::bind(&args.bind).await?;
    let shutdown = CancelHandle::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("shutdown requested"),
                Err(e) => error!(error = %e, "cannot listen for ctrl-c"),
            }
            shutdown.cancel();
        });
    }

    serve(listener, config, shutdown).await?;
    Ok(())
}
