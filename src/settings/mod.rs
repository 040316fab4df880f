use crate::api::upload::tus::DEFAULT_CHUNK_SIZE;
use crate::error::UploadError;
use clap::Parser;
use std::fmt;
use std::path::PathBuf;

pub const ENV_USERNAME: &str = "DEX_USERNAME";
pub const ENV_PASSWORD: &str = "DEX_PASSWORD";
pub const ENV_URL: &str = "DEX_URL";
pub const ENV_CONFIGS_FOLDER: &str = "DEX_CONFIGS_FOLDER";
pub const ENV_CHUNK_SIZE: &str = "DEX_CHUNK_SIZE";

pub const DEFAULT_DESTINATION: &str = "dextesting";
pub const DEFAULT_EVENT: &str = "testevent1";

/// 命令行参数；未给出的项回落到环境变量。
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Resumable upload client for the DEX upload API")]
pub struct Args {
    /// Account name (overrides DEX_USERNAME)
    #[arg(long)]
    pub username: Option<String>,

    /// Account password (overrides DEX_PASSWORD)
    #[arg(long)]
    pub password: Option<String>,

    /// Base URL of the upload API (overrides DEX_URL)
    #[arg(long)]
    pub url: Option<String>,

    /// Folder holding allowed_destination_and_events.json (overrides DEX_CONFIGS_FOLDER)
    #[arg(long)]
    pub configs_folder: Option<PathBuf>,

    /// Chunk size in bytes (overrides DEX_CHUNK_SIZE)
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Upload one file to a single destination/event
    #[arg(long)]
    pub smoke: bool,

    /// Upload to every destination/event listed in the configs folder
    #[arg(long)]
    pub regression: bool,

    /// Maximum status polls per upload while the status is not terminal
    #[arg(long, default_value_t = 1)]
    pub status_rounds: u32,

    /// Write a JSON report of all outcomes to this path
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Destination for smoke mode
    pub destination: Option<String>,

    /// Event for smoke mode
    pub event: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    Smoke { destination: String, event: String },
    Regression { configs_folder: PathBuf },
}

/// 合并后的运行配置。
#[derive(Clone)]
pub struct AppConfig {
    pub username: String,
    pub password: String,
    pub base_url: String,
    pub chunk_size: usize,
    pub status_rounds: u32,
    pub report: Option<PathBuf>,
    pub mode: Mode,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("chunk_size", &self.chunk_size)
            .field("status_rounds", &self.status_rounds)
            .field("report", &self.report)
            .field("mode", &self.mode)
            .finish()
    }
}

impl AppConfig {
    /// 解析命令行并与环境变量合并。调用前应已加载 `.env`。
    pub fn from_env_and_args() -> Result<Self, UploadError> {
        let args = Args::parse();
        Self::resolve(args, |key| std::env::var(key).ok())
    }

    /// 命令行优先，其次环境变量；`env` 便于测试时注入。
    pub fn resolve<F>(args: Args, env: F) -> Result<Self, UploadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

        let username = non_empty(args.username.or_else(|| env(ENV_USERNAME)))
            .ok_or_else(|| missing("username", ENV_USERNAME))?;
        let password = non_empty(args.password.or_else(|| env(ENV_PASSWORD)))
            .ok_or_else(|| missing("password", ENV_PASSWORD))?;
        let base_url = non_empty(args.url.or_else(|| env(ENV_URL)))
            .ok_or_else(|| missing("url", ENV_URL))?;

        let chunk_size = match args.chunk_size {
            Some(size) => size,
            None => match non_empty(env(ENV_CHUNK_SIZE)) {
                Some(raw) => raw.trim().parse::<usize>().map_err(|e| {
                    UploadError::Settings(format!("parsing {ENV_CHUNK_SIZE} value `{raw}`: {e}"))
                })?,
                None => DEFAULT_CHUNK_SIZE,
            },
        };
        if chunk_size == 0 {
            return Err(UploadError::Settings(
                "chunk size must be greater than zero".to_string(),
            ));
        }

        // 两个模式标志都没给或都给了时按冒烟测试处理。
        let regression = args.regression && !args.smoke;
        let mode = if regression {
            let configs_folder = args
                .configs_folder
                .or_else(|| non_empty(env(ENV_CONFIGS_FOLDER)).map(PathBuf::from))
                .ok_or_else(|| missing("configs-folder", ENV_CONFIGS_FOLDER))?;
            Mode::Regression { configs_folder }
        } else {
            let (destination, event) = match (args.destination, args.event) {
                (Some(destination), Some(event)) => (destination, event),
                (None, None) => (DEFAULT_DESTINATION.to_string(), DEFAULT_EVENT.to_string()),
                _ => {
                    return Err(UploadError::Settings(
                        "destination and event must be given together".to_string(),
                    ))
                }
            };
            Mode::Smoke { destination, event }
        };

        Ok(Self {
            username,
            password,
            base_url: base_url.trim_end_matches('/').to_string(),
            chunk_size,
            status_rounds: args.status_rounds.max(1),
            report: args.report,
            mode,
        })
    }
}

fn missing(flag: &str, env_key: &str) -> UploadError {
    UploadError::Settings(format!("missing --{flag} (or {env_key})"))
}
