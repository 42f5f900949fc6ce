//! Web server: WebSocket sessions plus the thin HTTP admin surface

pub mod assistant_ws;
pub mod chat_ws;
pub mod http;
pub mod translate_ws;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::history::titles::TitleStore;
use crate::llm::OllamaClient;
use crate::store::Store;
use crate::stt::{SttEngine, WhisperSubprocess};
use crate::tts::{HttpTts, TtsEngine};

/// Shared server state
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<Config>,
    pub llm: Arc<OllamaClient>,
    pub stt: Arc<dyn SttEngine>,
    pub tts: Arc<dyn TtsEngine>,
    pub titles: Arc<TitleStore>,
    pub store: Arc<Store>,
}

impl ServerState {
    pub fn new(config: Config) -> Result<Self> {
        let titles = Arc::new(TitleStore::new(&config.data_dir)?);
        let store = Arc::new(Store::open(&config.data_dir)?);
        let llm = Arc::new(OllamaClient::from_config(&config.llm));
        let stt: Arc<dyn SttEngine> = Arc::new(WhisperSubprocess::new(config.stt.clone()));
        let tts: Arc<dyn TtsEngine> = Arc::new(HttpTts::from_config(&config.tts));
        Ok(Self {
            config: Arc::new(config),
            llm,
            stt,
            tts,
            titles,
            store,
        })
    }
}

pub fn router(state: ServerState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // WebSocket sessions
        .route("/ws/translate", get(translate_ws::ws_handler))
        .route("/ws/assistant", get(assistant_ws::ws_handler))
        .route("/ws/chat", get(chat_ws::ws_handler))
        // admin surface
        .route("/api/status", get(http::status_handler))
        .route(
            "/api/conversations",
            get(http::list_conversations_handler).post(http::create_conversation_handler),
        )
        .route(
            "/api/conversations/{id}",
            get(http::conversation_detail_handler).delete(http::delete_conversation_handler),
        )
        .route("/api/chat", post(http::chat_handler))
        .route("/api/voice", post(http::voice_handler))
        .route("/api/translate/audio", post(http::translate_audio_handler))
        .route(
            "/api/titles",
            get(http::list_titles_handler).post(http::create_title_handler),
        )
        .route("/api/titles/{id}", get(http::title_detail_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the web server
pub async fn start(host: &str, port: u16) -> Result<()> {
    let config = Config::from_env();
    let state = ServerState::new(config)?;
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .context("invalid host/port")?;

    info!("listening on http://{}", addr);
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;
    Ok(())
}
