//! ViVoice — real-time voice assistant and live translation backend
//!
//! Clients connect over WebSocket and stream raw PCM16 audio; each session
//! fans out to a pipeline of cooperating workers that transcribe
//! incrementally, translate committed segments with a streaming LLM, keep
//! a rolling summary, and synthesize speech back to the client. Two
//! session flavors share the pipeline core:
//!
//! - `/ws/translate` — live STT with punctuation/pause segment commits,
//!   streamed translation, periodic summaries, and a final
//!   reconciliation pass on stop
//! - `/ws/assistant` — full-utterance STT with intent routing (device
//!   control, sensor queries, music, free-form chat) and streamed TTS
//!
//! A thin HTTP surface handles conversation browsing and batch audio jobs.

pub mod assistant;
pub mod audio;
pub mod cli;
pub mod config;
pub mod history;
pub mod llm;
pub mod protocol;
pub mod server;
pub mod session;
pub mod store;
pub mod stt;
pub mod tts;

// Re-export commonly used types for convenience
pub use config::Config;
pub use llm::{prompts::Lang, OllamaClient};
pub use protocol::{ClientMessage, ServerEvent, WireError};
pub use server::{start as start_server, ServerState};
pub use session::pipeline::{Pipeline, PipelineDeps};
pub use store::Store;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
