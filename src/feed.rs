//! Paginated story listing for one section.
//!
//! The feed never performs I/O on its own. `load` and `load_more` hand out a
//! [`PageRequest`] tagged with a ticket; whoever runs the request passes the
//! result back through [`StoryFeed::apply_page`]. Tickets that no longer match
//! the feed's outstanding requests (a newer load, a section switch) are
//! dropped without touching the items.

use log::{debug, info};
use std::collections::HashSet;
use std::ops::Range;

use crate::dn_client::StoryApi;
use crate::error::{FeedError, Result};
use crate::models::{Page, Section, Story};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    Page(u32),
    Token(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    Load,
    LoadMore,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub ticket: u64,
    pub section: Section,
    pub kind: FetchKind,
    pub cursor: Cursor,
}

impl PageRequest {
    pub fn execute(&self, api: &dyn StoryApi) -> Result<Page> {
        match &self.cursor {
            Cursor::Page(page) => api.fetch_stories(self.section, *page),
            Cursor::Token(token) => api.fetch_more_stories(self.section, token),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    /// A first page replaced the items.
    Loaded { count: usize },
    /// A following page was appended; the range indexes the new items.
    Appended { range: Range<usize> },
    /// The response belonged to a request the feed no longer waits for.
    Stale,
}

#[derive(Debug)]
pub struct StoryFeed {
    section: Section,
    items: Vec<Story>,
    has_more: bool,
    page_size: usize,
    pages_loaded: u32,
    next_cursor: Cursor,
    next_ticket: u64,
    loading: Option<u64>,
    loading_more: Option<u64>,
}

impl StoryFeed {
    pub fn new(section: Section, page_size: usize) -> Self {
        Self {
            section,
            items: Vec::new(),
            has_more: false,
            page_size,
            pages_loaded: 0,
            next_cursor: Cursor::Page(1),
            next_ticket: 0,
            loading: None,
            loading_more: None,
        }
    }

    pub fn section(&self) -> Section {
        self.section
    }

    pub fn title(&self) -> &'static str {
        self.section.title()
    }

    pub fn items(&self) -> &[Story] {
        &self.items
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn is_loading(&self) -> bool {
        self.loading.is_some()
    }

    pub fn is_loading_more(&self) -> bool {
        self.loading_more.is_some()
    }

    pub fn story(&self, id: &str) -> Option<&Story> {
        self.items.iter().find(|story| story.id == id)
    }

    pub fn story_mut(&mut self, id: &str) -> Option<&mut Story> {
        self.items.iter_mut().find(|story| story.id == id)
    }

    /// Stories plus the trailing "loading more" row while more pages exist.
    pub fn row_count(&self) -> usize {
        self.items.len() + usize::from(self.has_more)
    }

    pub fn is_loading_row(&self, index: usize) -> bool {
        self.has_more && index == self.items.len()
    }

    /// Switches to another section, dropping every item and forgetting any
    /// outstanding request. Returns false when the section is unchanged.
    pub fn set_section(&mut self, section: Section) -> bool {
        if self.section == section {
            return false;
        }
        info!("Switching feed from {:?} to {:?}", self.section, section);
        self.section = section;
        self.items.clear();
        self.has_more = false;
        self.pages_loaded = 0;
        self.next_cursor = Cursor::Page(1);
        self.loading = None;
        self.loading_more = None;
        true
    }

    fn issue(&mut self, kind: FetchKind, cursor: Cursor) -> PageRequest {
        self.next_ticket += 1;
        PageRequest {
            ticket: self.next_ticket,
            section: self.section,
            kind,
            cursor,
        }
    }

    /// Starts a fresh load of the first page. Supersedes any outstanding
    /// load or pagination request.
    pub fn load(&mut self) -> PageRequest {
        let request = self.issue(FetchKind::Load, Cursor::Page(1));
        self.loading = Some(request.ticket);
        self.loading_more = None;
        debug!("Loading {:?} (ticket {})", self.section, request.ticket);
        request
    }

    /// Starts fetching the next page, unless there is none or a fetch is
    /// already running.
    pub fn load_more(&mut self) -> Option<PageRequest> {
        if !self.has_more || self.loading.is_some() || self.loading_more.is_some() {
            return None;
        }
        let request = self.issue(FetchKind::LoadMore, self.next_cursor.clone());
        self.loading_more = Some(request.ticket);
        debug!(
            "Loading more {:?} at {:?} (ticket {})",
            self.section, request.cursor, request.ticket
        );
        Some(request)
    }

    fn advance(&mut self, page: &Page) {
        // An empty page ends the listing whatever the page size.
        self.has_more = !page.stories.is_empty() && page.stories.len() >= self.page_size;
        self.next_cursor = match &page.next_token {
            Some(token) => Cursor::Token(token.clone()),
            None => Cursor::Page(self.pages_loaded + 1),
        };
    }

    /// Feeds a finished request back in. A failure for the current request
    /// clears its in-flight mark and is returned as-is; items stay unchanged.
    pub fn apply_page(&mut self, ticket: u64, result: Result<Page>) -> Result<PageOutcome> {
        if self.loading == Some(ticket) {
            self.loading = None;
            let page = result?;
            self.pages_loaded = 1;
            self.advance(&page);
            self.items = page.stories;
            info!(
                "Loaded {} {:?} stories (more: {})",
                self.items.len(),
                self.section,
                self.has_more
            );
            return Ok(PageOutcome::Loaded {
                count: self.items.len(),
            });
        }

        if self.loading_more == Some(ticket) {
            self.loading_more = None;
            let page = result?;
            self.pages_loaded += 1;
            self.advance(&page);

            let start = self.items.len();
            let mut seen: HashSet<String> = self.items.iter().map(|s| s.id.clone()).collect();
            for story in page.stories {
                if seen.insert(story.id.clone()) {
                    self.items.push(story);
                }
            }
            debug!(
                "Appended {} stories to {:?} (more: {})",
                self.items.len() - start,
                self.section,
                self.has_more
            );
            return Ok(PageOutcome::Appended {
                range: start..self.items.len(),
            });
        }

        debug!("Dropping stale response for ticket {ticket}");
        Ok(PageOutcome::Stale)
    }

    /// Loads the first page on the calling thread.
    pub fn load_blocking(&mut self, api: &dyn StoryApi) -> Result<&[Story]> {
        let request = self.load();
        let result = request.execute(api);
        self.apply_page(request.ticket, result)?;
        Ok(&self.items)
    }

    /// Loads the next page on the calling thread and returns only the new
    /// stories. Empty when there is nothing more to load.
    pub fn load_more_blocking(&mut self, api: &dyn StoryApi) -> Result<&[Story]> {
        let Some(request) = self.load_more() else {
            return Ok(&[]);
        };
        let result = request.execute(api);
        match self.apply_page(request.ticket, result)? {
            PageOutcome::Appended { range } => Ok(&self.items[range]),
            PageOutcome::Loaded { .. } | PageOutcome::Stale => {
                Err(FeedError::Network("pagination response was not applied".to_string()))
            }
        }
    }
}
