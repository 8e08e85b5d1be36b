use std::path::PathBuf;

use crate::error::{FeedError, Result};

pub const DEFAULT_API_URL: &str = "https://api-news.layervault.com/api/v1";
pub const DEFAULT_PAGE_SIZE: usize = 25;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub api_url: String,
    pub page_size: usize,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub data_dir: PathBuf,
}

impl Config {
    /// Defaults, with `DN_API_URL`, `DN_PAGE_SIZE` and `DN_DATA_DIR` applied on top.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::defaults()?;
        if let Ok(url) = std::env::var("DN_API_URL") {
            config.api_url = url;
        }
        if let Ok(size) = std::env::var("DN_PAGE_SIZE") {
            config.page_size = size
                .parse()
                .map_err(|_| FeedError::Config(format!("DN_PAGE_SIZE is not a number: {size}")))?;
        }
        if let Ok(dir) = std::env::var("DN_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(FeedError::Config("page size must be at least 1".to_string()));
        }
        if self.http_timeout_secs == 0 {
            return Err(FeedError::Config("HTTP timeout must be at least 1 second".to_string()));
        }
        Ok(())
    }

    pub fn defaults() -> Result<Self> {
        Ok(Self {
            api_url: DEFAULT_API_URL.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            user_agent: format!("designer_news_feed/{}", env!("CARGO_PKG_VERSION")),
            data_dir: default_data_dir()?,
        })
    }
}

fn default_data_dir() -> Result<PathBuf> {
    let home_dir = dirs_next::home_dir()
        .ok_or_else(|| FeedError::Config("Could not find home directory".to_string()))?;
    Ok(home_dir.join(".designer_news"))
}
