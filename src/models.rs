use chrono::{DateTime, Utc};

/// The story listings the feed can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Section {
    #[default]
    Default,
    Recent,
}

impl Section {
    pub fn title(&self) -> &'static str {
        match self {
            Section::Default => "Top Stories",
            Section::Recent => "Recent Stories",
        }
    }

    /// Path segment of the listing endpoint, relative to the API root.
    pub fn path(&self) -> &'static str {
        match self {
            Section::Default => "stories",
            Section::Recent => "stories/recent",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Story {
    pub id: String,
    pub title: String,
    pub url: String,
    pub domain: String,
    pub by: String,
    pub score: i32,
    pub comments_count: i32,
    pub created_at: Option<DateTime<Utc>>,
    // Vote flag as reported by the server. Rendering uses local state instead.
    pub server_upvoted: bool,
    // Set while this copy carries a local +1 that the server has not confirmed.
    pub local_vote: bool,
}

impl Story {
    /// Adds the local +1. A copy that already carries it is left alone.
    pub fn upvote(&mut self) {
        if !self.local_vote {
            self.score += 1;
            self.local_vote = true;
        }
    }

    /// Takes back the local +1. Copies that never received it, such as a
    /// fresh one from a reload, keep the server's score.
    pub fn downvote(&mut self) {
        if self.local_vote {
            self.score -= 1;
            self.local_vote = false;
        }
    }
}

/// One page of a listing as returned by the story API.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub stories: Vec<Story>,
    /// Opaque pointer to the following page, when the server hands one out.
    pub next_token: Option<String>,
}

impl Page {
    pub fn new(stories: Vec<Story>) -> Self {
        Self {
            stories,
            next_token: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    Visited,
    Upvoted,
    Replied,
}

impl Flag {
    pub fn column(&self) -> &'static str {
        match self {
            Flag::Visited => "visited",
            Flag::Upvoted => "upvoted",
            Flag::Replied => "replied",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoryFlags {
    pub visited: bool,
    pub upvoted: bool,
    pub replied: bool,
}

/// A story merged with its local flags, ready for a render pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoryRow<'a> {
    pub story: &'a Story,
    pub is_upvoted: bool,
    pub is_visited: bool,
    pub is_replied: bool,
}

#[cfg(test)]
pub(crate) fn test_story(id: &str, score: i32) -> Story {
    Story {
        id: id.to_string(),
        title: format!("Story {id}"),
        url: format!("https://example.com/{id}"),
        domain: "example.com".to_string(),
        by: "tester".to_string(),
        score,
        comments_count: 0,
        created_at: None,
        server_upvoted: false,
        local_vote: false,
    }
}

#[cfg(test)]
pub(crate) fn test_page(prefix: &str, count: usize) -> Vec<Story> {
    (0..count)
        .map(|i| test_story(&format!("{prefix}{i}"), 1))
        .collect()
}
