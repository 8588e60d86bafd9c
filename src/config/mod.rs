use std::env;
use std::path::PathBuf;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub openai: OpenAiConfig,
    pub github: GitHubConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
}

/// OpenAI chat-completions configuration
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

/// GitHub API configuration
#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub api_url: String,
    pub installation_token: Option<String>,
    /// Login of the app's bot user; comments it authors are ignored.
    pub bot_login: String,
    /// Branch pull requests target and file trees are read from.
    pub base_branch: String,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
}

/// Default model used for structured queries.
pub const DEFAULT_MODEL: &str = "gpt-4o-2024-08-06";

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let openai = OpenAiConfig {
            api_key: env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            model: env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
        };

        let github = GitHubConfig {
            api_url: env::var("GITHUB_API_URL")
                .unwrap_or_else(|_| "https://api.github.com".to_string()),
            installation_token: env::var("GITHUB_INSTALLATION_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
            bot_login: env::var("GITHUB_BOT_LOGIN")
                .unwrap_or_else(|_| "issue-assistant[bot]".to_string()),
            base_branch: env::var("GITHUB_BASE_BRANCH").unwrap_or_else(|_| "main".to_string()),
        };

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/assistant.db".to_string()),
            ),
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
        };

        if database.max_connections == 0 {
            return Err(AppError::Config {
                message: "DATABASE_MAX_CONNECTIONS must be at least 1".to_string(),
            });
        }

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: env::var("REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(120_000),
        };

        Ok(Config {
            openai,
            github,
            database,
            logging,
            request,
        })
    }
}

impl OpenAiConfig {
    /// The API key, or a configuration error naming the missing variable.
    pub fn require_api_key(&self) -> Result<&str, AppError> {
        self.api_key.as_deref().ok_or_else(|| AppError::Config {
            message: "OPENAI_API_KEY is required".to_string(),
        })
    }
}

impl GitHubConfig {
    /// The installation token, or a configuration error naming the missing variable.
    pub fn require_installation_token(&self) -> Result<&str, AppError> {
        self.installation_token
            .as_deref()
            .ok_or_else(|| AppError::Config {
                message: "GITHUB_INSTALLATION_TOKEN is required".to_string(),
            })
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self { timeout_ms: 120_000 }
    }
}
