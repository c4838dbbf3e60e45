//! Provider emulator
//!
//! A stand-in for real LLM providers that reproduces their wire behavior:
//! time to first token, paced token-by-token streaming, whole-shot bodies,
//! provider-shaped error responses. Useful for exercising the dispatcher
//! without API cost.
//!
//! ```rust,ignore
//! use polyprompt::emulator::{EmulatorConfig, serve};
//! use polyprompt::cancel::CancelHandle;
//!
//! # async fn run() -> Result<(), polyprompt::LlmError> {
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8000").await?;
//! serve(listener, EmulatorConfig::default(), CancelHandle::new()).await
//! # }
//! ```

mod profile;
mod server;
mod source;
mod stream;
mod tokenizer;
pub mod wire;

pub use profile::{
    DEFAULT_TIME_TO_FIRST_TOKEN, DEFAULT_TOKENS_PER_SECOND, SLOW_TOKENS_PER_SECOND, SpeedProfile,
    SpeedProfileSpec, SpeedTable,
};
pub use server::{EmulatorConfig, router, serve};
pub use source::{ResponseSource, ScriptedResponse, StaticResponses, StoreReplay};
pub use stream::{EmulatorMonitor, EmulatorState, Generated, Segment, StreamChunk, StreamEmulator};
pub use tokenizer::Tokenizer;
