//! Local per-story state: visited, upvoted and replied flags, plus the
//! optimistic upvote protocol that reconciles the upvoted flag with the
//! remote vote call.

use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Arc;

use crate::db::FlagStore;
use crate::error::{FeedError, Result};
use crate::models::{Flag, Story, StoryFlags, StoryRow};

/// Where a story's upvote stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpvotePhase {
    #[default]
    Idle,
    /// Local state already shows the vote; the remote call is outstanding.
    Pending,
    Confirmed,
    RolledBack,
}

/// A remote vote call the caller has to issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpvoteRequest {
    pub story_id: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpvoteStart {
    Started(UpvoteRequest),
    /// No access token: nothing was mutated, the login flow should run.
    LoginRequired,
    AlreadyPending,
    AlreadyUpvoted,
    /// The upvoted flag could not be saved; nothing was mutated.
    Failed(FeedError),
}

pub struct LocalStoryState {
    store: Arc<dyn FlagStore>,
    upvotes: HashMap<String, UpvotePhase>,
}

impl LocalStoryState {
    pub fn new(store: Arc<dyn FlagStore>) -> Self {
        Self {
            store,
            upvotes: HashMap::new(),
        }
    }

    fn read(&self, id: &str, flag: Flag) -> bool {
        match self.store.flag(id, flag) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to read {} flag for story {id}: {e}", flag.column());
                false
            }
        }
    }

    pub fn is_visited(&self, id: &str) -> bool {
        self.read(id, Flag::Visited)
    }

    pub fn is_upvoted(&self, id: &str) -> bool {
        self.read(id, Flag::Upvoted)
    }

    pub fn is_replied(&self, id: &str) -> bool {
        self.read(id, Flag::Replied)
    }

    pub fn flags(&self, id: &str) -> StoryFlags {
        self.store.flags(id).unwrap_or_else(|e| {
            warn!("Failed to read flags for story {id}: {e}");
            StoryFlags::default()
        })
    }

    pub fn mark_visited(&self, id: &str) -> Result<()> {
        self.store.set_flag(id, Flag::Visited, true)
    }

    pub fn mark_replied(&self, id: &str) -> Result<()> {
        self.store.set_flag(id, Flag::Replied, true)
    }

    pub fn set_upvoted(&self, id: &str) -> Result<()> {
        self.store.set_flag(id, Flag::Upvoted, true)
    }

    pub fn clear_upvoted(&self, id: &str) -> Result<()> {
        self.store.set_flag(id, Flag::Upvoted, false)
    }

    /// Merges a story with its local flags. The upvoted state comes from
    /// local storage, never from the story's server flag.
    pub fn row<'a>(&self, story: &'a Story) -> StoryRow<'a> {
        let flags = self.flags(&story.id);
        StoryRow {
            story,
            is_upvoted: flags.upvoted,
            is_visited: flags.visited,
            is_replied: flags.replied,
        }
    }

    pub fn upvote_phase(&self, id: &str) -> UpvotePhase {
        self.upvotes.get(id).copied().unwrap_or_default()
    }

    /// Applies the optimistic half of an upvote: flag the story upvoted and
    /// bump its score. Returns the remote call to make, if any.
    pub fn begin_upvote(&mut self, story: &mut Story, token: Option<&str>) -> UpvoteStart {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            debug!("Upvote on story {} needs login", story.id);
            return UpvoteStart::LoginRequired;
        };

        match self.upvote_phase(&story.id) {
            UpvotePhase::Pending => return UpvoteStart::AlreadyPending,
            UpvotePhase::Idle | UpvotePhase::RolledBack | UpvotePhase::Confirmed => {}
        }
        if self.is_upvoted(&story.id) {
            return UpvoteStart::AlreadyUpvoted;
        }

        if let Err(e) = self.set_upvoted(&story.id) {
            warn!("Failed to persist upvote for story {}: {e}", story.id);
            return UpvoteStart::Failed(e);
        }
        story.upvote();
        self.upvotes.insert(story.id.clone(), UpvotePhase::Pending);
        debug!("Upvote pending for story {} (score {})", story.id, story.score);

        UpvoteStart::Started(UpvoteRequest {
            story_id: story.id.clone(),
            token: token.to_string(),
        })
    }

    /// Settles a pending upvote with the remote outcome. Anything but
    /// `Ok(true)` rolls the optimistic change back. `story` is the live copy
    /// in the feed, if the feed still holds one.
    ///
    /// Outcomes for stories that are not pending are ignored.
    pub fn finish_upvote(
        &mut self,
        id: &str,
        story: Option<&mut Story>,
        outcome: Result<bool>,
    ) -> UpvotePhase {
        if self.upvote_phase(id) != UpvotePhase::Pending {
            debug!("Ignoring upvote outcome for story {id}: not pending");
            return self.upvote_phase(id);
        }

        let phase = match outcome {
            Ok(true) => {
                if let Some(story) = story {
                    story.local_vote = false;
                }
                UpvotePhase::Confirmed
            }
            Ok(false) | Err(_) => {
                if let Err(e) = &outcome {
                    debug!("Upvote for story {id} failed: {e}");
                }
                if let Some(story) = story {
                    story.downvote();
                }
                if let Err(e) = self.clear_upvoted(id) {
                    warn!("Failed to clear upvote for story {id}: {e}");
                }
                UpvotePhase::RolledBack
            }
        };
        self.upvotes.insert(id.to_string(), phase);
        phase
    }

    /// Runs the whole protocol with a synchronous confirmation call.
    /// `remote_confirm` receives the story id and the access token.
    pub fn upvote_story<F>(&mut self, story: &mut Story, token: Option<&str>, remote_confirm: F) -> UpvoteStart
    where
        F: FnOnce(&str, &str) -> Result<bool>,
    {
        let start = self.begin_upvote(story, token);
        if let UpvoteStart::Started(request) = &start {
            let outcome = remote_confirm(&request.story_id, &request.token);
            self.finish_upvote(&request.story_id, Some(story), outcome);
        }
        start
    }
}
