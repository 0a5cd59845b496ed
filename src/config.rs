//! Configuration for the single-node deployment.

use crate::adapters::local::process::CommandLine;
use crate::domain::progress::TickPolicy;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

const DEFAULT_WORKER_COMMAND: &str = "python3 /app/openpose/analyze_video.py";
const DEFAULT_TICK_MS: u64 = 1000;

#[derive(Clone, Debug)]
pub struct LocalConfig {
    /// HTTP server bind address
    pub addr: String,
    /// HTTP server port
    pub port: String,
    /// Flat directory holding uploaded videos
    pub uploads_dir: PathBuf,
    /// Optional directory with the browser front end
    pub public_dir: Option<PathBuf>,
    /// Analysis worker; the video path is appended as last argument
    pub worker_command: CommandLine,
    /// Artifact the worker writes on success
    pub result_path: PathBuf,
    /// Run on every upload as `<command> <input> <output>`
    pub preprocess_command: Option<CommandLine>,
    /// Stored uploads become world read/write, for workers running as another user
    pub shared_upload_permissions: bool,
    pub tick_interval: Duration,
    pub tick_policy: TickPolicy,
}

impl LocalConfig {
    /// Load configuration from environment variables (and `.env`).
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let defaults = TickPolicy::default();

        Self {
            addr: env::var("ADDR").unwrap_or_else(|_| String::from("0.0.0.0")),
            port: env::var("PORT").unwrap_or_else(|_| String::from("8080")),
            uploads_dir: env::var("UPLOADS_DIR")
                .unwrap_or_else(|_| String::from("/app/uploads"))
                .into(),
            public_dir: env::var("PUBLIC_DIR").ok().map(PathBuf::from),
            worker_command: env::var("WORKER_COMMAND")
                .ok()
                .and_then(|cmd| CommandLine::parse(&cmd))
                .or_else(|| CommandLine::parse(DEFAULT_WORKER_COMMAND))
                .unwrap_or_else(|| CommandLine::new("python3", vec![])),
            result_path: env::var("RESULT_PATH")
                .unwrap_or_else(|_| String::from("/app/openpose/result.json"))
                .into(),
            preprocess_command: env::var("PREPROCESS_COMMAND")
                .ok()
                .and_then(|cmd| CommandLine::parse(&cmd)),
            shared_upload_permissions: parse_var("SHARED_UPLOAD_PERMISSIONS", false),
            tick_interval: tick_interval(parse_var("PROGRESS_TICK_MS", DEFAULT_TICK_MS)),
            tick_policy: TickPolicy {
                step: parse_var("PROGRESS_TICK_STEP", defaults.step),
                cap: parse_var("PROGRESS_TICK_CAP", defaults.cap),
            },
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }
}

fn parse_var<T: FromStr + Copy>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => parse_or(name, &raw, default),
        Err(_) => default,
    }
}

fn parse_or<T: FromStr + Copy>(name: &str, raw: &str, default: T) -> T {
    raw.trim().parse().unwrap_or_else(|_| {
        warn!("Ignoring invalid {}={:?}, using default", name, raw);
        default
    })
}

fn tick_interval(millis: u64) -> Duration {
    if millis == 0 {
        warn!("Ignoring PROGRESS_TICK_MS=0, using {}ms", DEFAULT_TICK_MS);
        return Duration::from_millis(DEFAULT_TICK_MS);
    }
    Duration::from_millis(millis)
}
