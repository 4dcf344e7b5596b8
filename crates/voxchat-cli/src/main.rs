//! voxchat CLI: chat API server and terminal voice client.
//!
//! ```text
//! voxchat serve [--host 127.0.0.1] [--port 5000] [--gemini-url URL]
//! voxchat chat [--server http://localhost:5000] [--api-key K] [--speak] [--listen]
//! ```

mod terminal;

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use voxchat_core::types::{
    ConversationConfig, KokoroConfig, ServerConfig, SpeechConfig, WhisperConfig, GEMINI_API_URL,
};
use voxchat_lib::backend::HttpBackend;
use voxchat_lib::conversation::{Conversation, Parts};
use voxchat_lib::gemini::GeminiClient;
use voxchat_lib::recognition::Recognizer;
use voxchat_lib::stt::WhisperRecognizer;
use voxchat_lib::synthesis::Synthesizer;
use voxchat_lib::tts::KokoroSynthesizer;

use crate::terminal::TerminalDisplay;

/// voxchat: spoken conversation with a Gemini-backed assistant
#[derive(Parser)]
#[command(name = "voxchat", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the chat API server
    Serve {
        /// Listen host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Listen port
        #[arg(long, default_value = "5000")]
        port: u16,
        /// Gemini generateContent endpoint
        #[arg(long, default_value = GEMINI_API_URL)]
        gemini_url: String,
    },
    /// Talk to a running chat API from the terminal
    Chat {
        /// Chat API base URL
        #[arg(long, env = "VOXCHAT_SERVER", default_value = "http://localhost:5000")]
        server: String,
        /// Gemini API key (can also be set later with /key)
        #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
        /// Speak replies through Kokoro
        #[arg(long)]
        speak: bool,
        /// Kokoro TTS server URL
        #[arg(long, env = "KOKORO_URL", default_value = "http://localhost:3001")]
        kokoro_url: String,
        /// Kokoro voice id
        #[arg(long, default_value = "af_heart")]
        voice: String,
        /// Enable microphone input through Whisper
        #[arg(long)]
        listen: bool,
        /// Whisper server URL
        #[arg(long, env = "WHISPER_URL", default_value = "http://localhost:2022")]
        whisper_url: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("voxchat=info,voxchat_lib=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Serve {
            host,
            port,
            gemini_url,
        } => {
            serve(ServerConfig {
                host,
                port,
                gemini_url,
            })
            .await
        }
        Command::Chat {
            server,
            api_key,
            speak,
            kokoro_url,
            voice,
            listen,
            whisper_url,
        } => {
            let synthesizer = speak
                .then(|| {
                    KokoroSynthesizer::new(KokoroConfig {
                        url: kokoro_url,
                        voice,
                        ..KokoroConfig::default()
                    })
                    .map_err(|e| warn!("speech output unavailable: {e}"))
                    .ok()
                })
                .flatten()
                .map(|s| Arc::new(s) as Arc<dyn Synthesizer>);

            let recognizer = listen
                .then(|| {
                    WhisperRecognizer::new(WhisperConfig {
                        url: whisper_url,
                        ..WhisperConfig::default()
                    })
                    .map_err(|e| warn!("speech input unavailable: {e}"))
                    .ok()
                })
                .flatten()
                .map(|r| Arc::new(r) as Arc<dyn Recognizer>);

            let conversation = Conversation::new(Parts {
                backend: Arc::new(HttpBackend::new(&server)),
                recognizer,
                synthesizer,
                display: Box::new(TerminalDisplay::default()),
                config: ConversationConfig::default(),
                speech: SpeechConfig::default(),
            });
            if let Some(key) = api_key {
                conversation.set_credential(key);
            }
            chat(conversation).await
        }
    }
}

async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let app = voxchat_lib::server::router(Arc::new(GeminiClient::new(config.gemini_url)));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("voxchat listening on {addr}");

    axum::serve(listener, app).await.context("server error")
}

/// One terminal line, parsed.
#[derive(Debug, PartialEq, Eq)]
enum Line<'a> {
    Voice,
    Stop,
    Key(&'a str),
    Quit,
    Message(&'a str),
}

fn parse_line(line: &str) -> Line<'_> {
    match line.trim() {
        "/voice" => Line::Voice,
        "/stop" => Line::Stop,
        "/quit" => Line::Quit,
        other => match other.strip_prefix("/key ") {
            Some(key) => Line::Key(key.trim()),
            None => Line::Message(line),
        },
    }
}

async fn chat(conversation: Conversation) -> anyhow::Result<()> {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        match parse_line(&line) {
            Line::Voice => conversation.toggle_voice(),
            Line::Stop => conversation.stop(),
            Line::Key(key) => conversation.set_credential(key),
            Line::Quit => break,
            Line::Message(text) => conversation.submit(text),
        }
    }

    conversation.stop();
    Ok(())
}
