//! Process configuration: environment variables layered under CLI overrides,
//! the way the teacher's `cmdline.rs` layers flags over defaults.

use clap::Parser;

const DEFAULT_PORT: u16 = 3001;
const DEV_TOKEN_SECRET: &str = "dev-secret-change-me";

#[derive(Parser, Debug)]
#[command(about = "Voice-chat SFU signaling core")]
pub struct Opts {
    /// Port to listen on. Overrides $PORT.
    #[arg(long)]
    pub port: Option<u16>,
    /// HMAC secret used to sign/verify join tokens. Overrides $SFU_TOKEN_SECRET.
    #[arg(long)]
    pub token_secret: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub token_secret: String,
}

impl Config {
    /// Resolve from CLI flags, then environment, then built-in defaults.
    pub fn resolve(opts: Opts) -> Self {
        let port = opts
            .port
            .or_else(|| std::env::var("PORT").ok().and_then(|s| s.parse().ok()))
            .unwrap_or(DEFAULT_PORT);
        let token_secret = opts
            .token_secret
            .or_else(|| std::env::var("SFU_TOKEN_SECRET").ok())
            .unwrap_or_else(|| {
                log::warn!("SFU_TOKEN_SECRET not set, using insecure development default");
                DEV_TOKEN_SECRET.to_string()
            });
        Self { port, token_secret }
    }
}
