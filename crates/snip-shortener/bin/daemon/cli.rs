use clap::{Parser, ValueEnum};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub const SECRET_KEY_ENV: &str = "SNIP_SECRET_KEY";
pub const FILE_STORAGE_PATH_ENV: &str = "SNIP_FILE_STORAGE_PATH";
pub const USER_STORAGE_PATH_ENV: &str = "SNIP_USER_STORAGE_PATH";
pub const DATABASE_DSN_ENV: &str = "SNIP_DATABASE_DSN";
pub const BASE_URL_ENV: &str = "SNIP_BASE_URL";
pub const LOG_FORMAT_ENV: &str = "SNIP_LOG_FORMAT";

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    #[value(name = "text")]
    Text,
    #[value(name = "json")]
    Json,
}

impl Display for LogFormatArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormatArg::Text => write!(f, "text"),
            LogFormatArg::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "snipd")]
pub struct CLI {
    /// Secret the token encryption key is derived from.
    #[arg(long, env = SECRET_KEY_ENV, hide_env_values = true)]
    pub secret_key: String,

    /// URL log for the file backend. Ignored when a DSN is set.
    #[arg(long, env = FILE_STORAGE_PATH_ENV)]
    pub file_storage_path: Option<PathBuf>,

    /// User log for the identity service.
    #[arg(long, env = USER_STORAGE_PATH_ENV)]
    pub user_storage_path: Option<PathBuf>,

    /// PostgreSQL DSN. Selects the relational backend when set.
    #[arg(long, env = DATABASE_DSN_ENV, hide_env_values = true)]
    pub database_dsn: Option<String>,

    #[arg(long, env = BASE_URL_ENV, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    #[arg(
        long,
        env = LOG_FORMAT_ENV,
        value_enum,
        default_value_t = LogFormatArg::Text
    )]
    pub log_format: LogFormatArg,
}
