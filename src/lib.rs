//! Story feed logic for a Designer News reader: paginated loading per
//! section, local visited/upvoted/replied flags, and optimistic upvotes.

pub mod auth;
pub mod config;
pub mod controller;
pub mod db;
pub mod dn_client;
pub mod error;
pub mod feed;
pub mod local_state;
pub mod models;

pub use controller::{FeedEvent, StoriesController};
pub use error::{FeedError, Result};
pub use feed::StoryFeed;
pub use local_state::{LocalStoryState, UpvotePhase};
pub use models::{Section, Story};
