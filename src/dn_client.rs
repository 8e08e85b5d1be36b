use log::{debug, info};
use reqwest::blocking::Client;
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::error::{FeedError, Result};
use crate::models::{Page, Section, Story};

/// The remote side of the feed: story listings and votes.
pub trait StoryApi: Send + Sync {
    fn fetch_stories(&self, section: Section, page: u32) -> Result<Page>;

    fn fetch_more_stories(&self, section: Section, page_token: &str) -> Result<Page>;

    /// `Ok(true)` when the vote was recorded.
    fn upvote_story(&self, id: &str, token: &str) -> Result<bool>;
}

pub struct DesignerNewsClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(u64),
    Text(String),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Number(n) => n.to_string(),
            RawId::Text(s) => s,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawStory {
    id: RawId,
    title: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default)]
    user_display_name: Option<String>,
    #[serde(default)]
    vote_count: i32,
    #[serde(default)]
    comment_count: i32,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    upvoted: bool,
}

#[derive(Debug, Deserialize)]
struct RawStories {
    stories: Vec<RawStory>,
    #[serde(default)]
    next: Option<String>,
}

impl From<RawStory> for Story {
    fn from(raw: RawStory) -> Self {
        let url = raw.url.unwrap_or_default();
        let domain = raw
            .hostname
            .filter(|h| !h.is_empty())
            .or_else(|| {
                Url::parse(&url)
                    .ok()
                    .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
            })
            .unwrap_or_default();
        let created_at = raw
            .created_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Self {
            id: raw.id.into_string(),
            title: html_escape::decode_html_entities(&raw.title).into_owned(),
            url,
            domain,
            by: raw.user_display_name.unwrap_or_default(),
            score: raw.vote_count,
            comments_count: raw.comment_count,
            created_at,
            server_upvoted: raw.upvoted,
            local_vote: false,
        }
    }
}

/// Parses a listing response body.
pub fn parse_stories(body: &str) -> Result<Page> {
    let raw: RawStories = serde_json::from_str(body)?;
    Ok(Page {
        stories: raw.stories.into_iter().map(Story::from).collect(),
        next_token: raw.next.filter(|t| !t.is_empty()),
    })
}

impl DesignerNewsClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
        })
    }

    fn get_page(&self, url: &str, query: &[(&str, &str)]) -> Result<Page> {
        debug!("GET {url} {query:?}");
        let response = self.client.get(url).query(query).send()?.error_for_status()?;
        let body = response.text()?;
        let page = parse_stories(&body)?;
        info!("Fetched {} stories from {url}", page.stories.len());
        Ok(page)
    }
}

impl StoryApi for DesignerNewsClient {
    fn fetch_stories(&self, section: Section, page: u32) -> Result<Page> {
        let url = format!("{}/{}", self.base_url, section.path());
        let page = page.to_string();
        self.get_page(&url, &[("page", page.as_str())])
    }

    fn fetch_more_stories(&self, section: Section, page_token: &str) -> Result<Page> {
        let url = format!("{}/{}", self.base_url, section.path());
        self.get_page(&url, &[("next", page_token)])
    }

    fn upvote_story(&self, id: &str, token: &str) -> Result<bool> {
        if token.is_empty() {
            return Err(FeedError::Unauthenticated);
        }
        let url = format!("{}/stories/{id}/upvote", self.base_url);
        debug!("POST {url}");
        let response = self.client.post(&url).bearer_auth(token).send()?;
        let accepted = response.status().is_success();
        info!("Upvote for story {id}: {}", response.status());
        Ok(accepted)
    }
}
