//! The stories screen without its widgets.
//!
//! Network calls run on worker threads; their results travel back over a
//! channel and are applied on the owning thread when it calls [`StoriesController::poll`],
//! which is also where the presentation layer picks up [`FeedEvent`]s.

use log::{debug, info, warn};
use std::ops::Range;
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::auth::{AuthProvider, AuthState};
use crate::db::FlagStore;
use crate::dn_client::StoryApi;
use crate::error::{FeedError, Result};
use crate::feed::{FetchKind, PageOutcome, PageRequest, StoryFeed};
use crate::local_state::{LocalStoryState, UpvotePhase, UpvoteRequest, UpvoteStart};
use crate::models::{Page, Section, Story, StoryRow};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs network jobs off the owning thread.
pub trait Executor: Send + Sync {
    fn spawn(&self, job: Job);
}

pub struct ThreadExecutor;

impl Executor for ThreadExecutor {
    fn spawn(&self, job: Job) {
        thread::spawn(job);
    }
}

/// What the presentation layer should react to.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    TitleChanged(&'static str),
    /// A load started; show the loading indicator.
    LoadingStarted,
    /// The item list was replaced.
    Reloaded { count: usize },
    Appended { range: Range<usize> },
    LoadFailed(FeedError),
    /// Pagination failed. Nothing is shown to the user for this.
    LoadMoreFailed(FeedError),
    /// Any load finished, successfully or not; dismiss loading indicators.
    LoadingFinished,
    /// The row for this story needs to be rendered again.
    RowChanged(String),
    LoginRequested,
    /// The remote vote came back; `phase` is `Confirmed` or `RolledBack`.
    UpvoteSettled { id: String, phase: UpvotePhase },
    OpenStory { id: String, url: String },
    OpenComments { id: String },
}

enum Completion {
    Page {
        ticket: u64,
        kind: FetchKind,
        result: Result<Page>,
    },
    Upvote {
        story_id: String,
        result: Result<bool>,
    },
}

pub struct StoriesController {
    api: Arc<dyn StoryApi>,
    auth: Arc<dyn AuthProvider>,
    executor: Arc<dyn Executor>,
    feed: StoryFeed,
    state: LocalStoryState,
    tx: Sender<Completion>,
    rx: Receiver<Completion>,
    auth_rx: Receiver<AuthState>,
    events: Vec<FeedEvent>,
    first_time: bool,
    appeared: bool,
}

impl StoriesController {
    pub fn new(
        api: Arc<dyn StoryApi>,
        auth: Arc<dyn AuthProvider>,
        store: Arc<dyn FlagStore>,
        section: Section,
        page_size: usize,
    ) -> Self {
        Self::with_executor(api, auth, store, section, page_size, Arc::new(ThreadExecutor))
    }

    pub fn with_executor(
        api: Arc<dyn StoryApi>,
        auth: Arc<dyn AuthProvider>,
        store: Arc<dyn FlagStore>,
        section: Section,
        page_size: usize,
        executor: Arc<dyn Executor>,
    ) -> Self {
        let (tx, rx) = channel();
        let auth_rx = auth.subscribe();
        Self {
            api,
            auth,
            executor,
            feed: StoryFeed::new(section, page_size),
            state: LocalStoryState::new(store),
            tx,
            rx,
            auth_rx,
            events: Vec::new(),
            first_time: true,
            appeared: false,
        }
    }

    pub fn feed(&self) -> &StoryFeed {
        &self.feed
    }

    pub fn local_state(&self) -> &LocalStoryState {
        &self.state
    }

    pub fn title(&self) -> &'static str {
        self.feed.title()
    }

    pub fn row_count(&self) -> usize {
        self.feed.row_count()
    }

    /// The story row at `index`, merged with its local flags. `None` for the
    /// trailing loading row.
    pub fn row(&self, index: usize) -> Option<StoryRow<'_>> {
        self.feed.items().get(index).map(|story| self.state.row(story))
    }

    /// The screen became visible. The first appearance triggers a load.
    pub fn view_appeared(&mut self) {
        self.appeared = true;
        if self.first_time {
            self.first_time = false;
            self.load();
        }
    }

    pub fn set_section(&mut self, section: Section) {
        if self.feed.set_section(section) {
            self.events.push(FeedEvent::TitleChanged(self.feed.title()));
            if self.appeared {
                self.load();
            }
        }
    }

    /// Reloads the first page; also the pull-to-refresh action.
    pub fn load(&mut self) {
        let request = self.feed.load();
        self.events.push(FeedEvent::LoadingStarted);
        self.dispatch(request);
    }

    fn dispatch(&self, request: PageRequest) {
        let api = Arc::clone(&self.api);
        let tx = self.tx.clone();
        self.executor.spawn(Box::new(move || {
            let result = request.execute(api.as_ref());
            let _ = tx.send(Completion::Page {
                ticket: request.ticket,
                kind: request.kind,
                result,
            });
        }));
    }

    /// Called when a row is about to be shown; the loading row pulls in the
    /// next page.
    pub fn row_displayed(&mut self, index: usize) {
        if self.feed.is_loading_row(index) {
            if let Some(request) = self.feed.load_more() {
                self.dispatch(request);
            }
        }
    }

    fn story_at(&self, index: usize) -> Option<&Story> {
        self.feed.items().get(index)
    }

    fn visit(&mut self, id: &str) {
        if let Err(e) = self.state.mark_visited(id) {
            warn!("Failed to mark story {id} visited: {e}");
        }
        self.events.push(FeedEvent::RowChanged(id.to_string()));
    }

    /// The user tapped a story to open its link.
    pub fn select_story(&mut self, index: usize) {
        let Some(story) = self.story_at(index) else {
            return;
        };
        let (id, url) = (story.id.clone(), story.url.clone());
        self.events.push(FeedEvent::OpenStory { id: id.clone(), url });
        self.visit(&id);
    }

    pub fn comments_pressed(&mut self, index: usize) {
        let Some(story) = self.story_at(index) else {
            return;
        };
        let id = story.id.clone();
        self.events.push(FeedEvent::OpenComments { id: id.clone() });
        self.visit(&id);
    }

    /// The user posted a comment on the story.
    pub fn comment_posted(&mut self, id: &str) {
        if let Err(e) = self.state.mark_replied(id) {
            warn!("Failed to mark story {id} replied: {e}");
        }
        self.events.push(FeedEvent::RowChanged(id.to_string()));
    }

    pub fn upvote_pressed(&mut self, index: usize) {
        let token = self.auth.access_token();
        let Some(id) = self.story_at(index).map(|s| s.id.clone()) else {
            return;
        };
        let Some(story) = self.feed.story_mut(&id) else {
            return;
        };

        match self.state.begin_upvote(story, token.as_deref()) {
            UpvoteStart::Started(request) => {
                self.events.push(FeedEvent::RowChanged(request.story_id.clone()));
                self.send_upvote(request);
            }
            UpvoteStart::LoginRequired => self.events.push(FeedEvent::LoginRequested),
            UpvoteStart::Failed(e) => warn!("Upvote on story {id} not started: {e}"),
            UpvoteStart::AlreadyPending | UpvoteStart::AlreadyUpvoted => {
                debug!("Ignoring upvote press on story {id}");
            }
        }
    }

    fn send_upvote(&self, request: UpvoteRequest) {
        let api = Arc::clone(&self.api);
        let tx = self.tx.clone();
        self.executor.spawn(Box::new(move || {
            let result = api.upvote_story(&request.story_id, &request.token);
            let _ = tx.send(Completion::Upvote {
                story_id: request.story_id,
                result,
            });
        }));
    }

    fn apply(&mut self, completion: Completion) {
        match completion {
            Completion::Page {
                ticket,
                kind,
                result,
            } => match (kind, self.feed.apply_page(ticket, result)) {
                (_, Ok(PageOutcome::Loaded { count })) => {
                    self.events.push(FeedEvent::Reloaded { count });
                    self.events.push(FeedEvent::LoadingFinished);
                }
                (_, Ok(PageOutcome::Appended { range })) => {
                    self.events.push(FeedEvent::Appended { range });
                }
                (_, Ok(PageOutcome::Stale)) => {}
                (FetchKind::Load, Err(e)) => {
                    warn!("Loading {:?} failed: {e}", self.feed.section());
                    self.events.push(FeedEvent::LoadFailed(e));
                    self.events.push(FeedEvent::LoadingFinished);
                }
                (FetchKind::LoadMore, Err(e)) => {
                    debug!("Loading more {:?} failed: {e}", self.feed.section());
                    self.events.push(FeedEvent::LoadMoreFailed(e));
                }
            },
            Completion::Upvote { story_id, result } => {
                if self.state.upvote_phase(&story_id) != UpvotePhase::Pending {
                    return;
                }
                let story = self.feed.story_mut(&story_id);
                let phase = self.state.finish_upvote(&story_id, story, result);
                if phase == UpvotePhase::RolledBack {
                    self.events.push(FeedEvent::RowChanged(story_id.clone()));
                }
                self.events.push(FeedEvent::UpvoteSettled { id: story_id, phase });
            }
        }
    }

    fn drain_auth(&mut self) {
        let mut changed = false;
        while let Ok(state) = self.auth_rx.try_recv() {
            info!("Auth state changed: {state:?}");
            changed = true;
        }
        if changed && self.appeared {
            self.load();
        }
    }

    /// Applies every finished request and returns the events raised since
    /// the last poll.
    pub fn poll(&mut self) -> Vec<FeedEvent> {
        self.drain_auth();
        while let Ok(completion) = self.rx.try_recv() {
            self.apply(completion);
        }
        std::mem::take(&mut self.events)
    }

    /// Like [`poll`](Self::poll), but first waits up to `timeout` for a
    /// request to finish.
    pub fn poll_wait(&mut self, timeout: Duration) -> Vec<FeedEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(completion) => self.apply(completion),
            Err(RecvTimeoutError::Timeout) => debug!("No response within {timeout:?}"),
            // `self.tx` keeps the channel open.
            Err(RecvTimeoutError::Disconnected) => {}
        }
        self.poll()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Session;
    use crate::db::MemoryFlagStore;
    use crate::models::{test_page, test_story};
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    struct ManualExecutor {
        jobs: Mutex<VecDeque<Job>>,
    }

    impl ManualExecutor {
        fn pending(&self) -> usize {
            self.jobs.lock().unwrap().len()
        }

        fn run_next(&self) {
            let job = self.jobs.lock().unwrap().pop_front().expect("no queued job");
            job();
        }

        fn run_last(&self) {
            let job = self.jobs.lock().unwrap().pop_back().expect("no queued job");
            job();
        }

        fn run_all(&self) {
            while self.pending() > 0 {
                self.run_next();
            }
        }
    }

    impl Executor for ManualExecutor {
        fn spawn(&self, job: Job) {
            self.jobs.lock().unwrap().push_back(job);
        }
    }

    #[derive(Default)]
    struct FakeApi {
        pages: Mutex<VecDeque<Result<Page>>>,
        fetches: Mutex<Vec<(Section, u32)>>,
        votes: Mutex<VecDeque<Result<bool>>>,
        vote_calls: Mutex<Vec<String>>,
    }

    impl FakeApi {
        fn push_page(&self, page: Result<Page>) {
            self.pages.lock().unwrap().push_back(page);
        }

        fn push_vote(&self, vote: Result<bool>) {
            self.votes.lock().unwrap().push_back(vote);
        }

        fn next_page(&self) -> Result<Page> {
            self.pages.lock().unwrap().pop_front().unwrap_or_else(|| Ok(Page::default()))
        }
    }

    impl StoryApi for FakeApi {
        fn fetch_stories(&self, section: Section, page: u32) -> Result<Page> {
            self.fetches.lock().unwrap().push((section, page));
            self.next_page()
        }

        fn fetch_more_stories(&self, section: Section, _page_token: &str) -> Result<Page> {
            self.fetches.lock().unwrap().push((section, 0));
            self.next_page()
        }

        fn upvote_story(&self, id: &str, _token: &str) -> Result<bool> {
            self.vote_calls.lock().unwrap().push(id.to_string());
            self.votes.lock().unwrap().pop_front().unwrap_or(Ok(true))
        }
    }

    struct Harness {
        api: Arc<FakeApi>,
        session: Arc<Session>,
        executor: Arc<ManualExecutor>,
        controller: StoriesController,
    }

    fn harness(page_size: usize) -> Harness {
        let api = Arc::new(FakeApi::default());
        let session = Arc::new(Session::new());
        let executor = Arc::new(ManualExecutor::default());
        let controller = StoriesController::with_executor(
            Arc::clone(&api) as Arc<dyn StoryApi>,
            Arc::clone(&session) as Arc<dyn AuthProvider>,
            Arc::new(MemoryFlagStore::new()),
            Section::Default,
            page_size,
            Arc::clone(&executor) as Arc<dyn Executor>,
        );
        Harness {
            api,
            session,
            executor,
            controller,
        }
    }

    fn loaded(page_size: usize, stories: Vec<Story>) -> Harness {
        loaded_as(page_size, stories, None)
    }

    fn loaded_as(page_size: usize, stories: Vec<Story>, token: Option<&str>) -> Harness {
        let mut h = harness(page_size);
        if let Some(token) = token {
            h.session.login(token).unwrap();
            // Not visible yet, so the login does not trigger a load.
            h.controller.poll();
        }
        h.api.push_page(Ok(Page::new(stories)));
        h.controller.view_appeared();
        h.executor.run_all();
        h.controller.poll();
        h
    }

    #[test]
    fn first_appearance_loads_once() {
        let mut h = harness(10);
        h.api.push_page(Ok(Page::new(test_page("a", 10))));

        h.controller.view_appeared();
        h.controller.view_appeared();
        assert_eq!(h.executor.pending(), 1);

        h.executor.run_all();
        let events = h.controller.poll();
        assert_eq!(
            events,
            vec![
                FeedEvent::LoadingStarted,
                FeedEvent::Reloaded { count: 10 },
                FeedEvent::LoadingFinished
            ]
        );
        assert_eq!(h.controller.row_count(), 11);
        assert!(h.controller.row(10).is_none());
    }

    #[test]
    fn failed_load_reports_and_finishes() {
        let mut h = harness(10);
        h.api.push_page(Err(FeedError::Network("offline".to_string())));
        h.controller.view_appeared();
        h.executor.run_all();

        let events = h.controller.poll();
        assert_eq!(
            events,
            vec![
                FeedEvent::LoadingStarted,
                FeedEvent::LoadFailed(FeedError::Network("offline".to_string())),
                FeedEvent::LoadingFinished
            ]
        );
        assert_eq!(h.controller.row_count(), 0);
    }

    #[test]
    fn rapid_scroll_issues_one_pagination_call() {
        let mut h = loaded(10, test_page("a", 10));
        h.api.push_page(Ok(Page::new(test_page("b", 7))));

        for _ in 0..5 {
            h.controller.row_displayed(10);
        }
        assert_eq!(h.executor.pending(), 1);

        h.executor.run_all();
        let events = h.controller.poll();
        assert_eq!(events, vec![FeedEvent::Appended { range: 10..17 }]);
        assert_eq!(
            *h.api.fetches.lock().unwrap(),
            vec![(Section::Default, 1), (Section::Default, 2)]
        );
        // Short page: no loading row, no more fetches.
        assert_eq!(h.controller.row_count(), 17);
        h.controller.row_displayed(17);
        assert_eq!(h.executor.pending(), 0);
    }

    #[test]
    fn displaying_story_rows_does_not_paginate() {
        let mut h = loaded(10, test_page("a", 10));
        h.controller.row_displayed(3);
        assert_eq!(h.executor.pending(), 0);
    }

    #[test]
    fn pagination_failure_is_silent_and_retryable() {
        let mut h = loaded(10, test_page("a", 10));
        h.api.push_page(Err(FeedError::Network("timeout".to_string())));

        h.controller.row_displayed(10);
        h.executor.run_all();
        let events = h.controller.poll();
        assert_eq!(
            events,
            vec![FeedEvent::LoadMoreFailed(FeedError::Network("timeout".to_string()))]
        );
        assert_eq!(h.controller.feed().items().len(), 10);

        h.controller.row_displayed(10);
        assert_eq!(h.executor.pending(), 1);
    }

    #[test]
    fn section_switch_drops_stale_response() {
        let mut h = harness(10);
        h.api.push_page(Ok(Page::new(test_page("top", 10))));
        h.api.push_page(Ok(Page::new(test_page("recent", 4))));

        h.controller.view_appeared();
        h.controller.set_section(Section::Recent);
        assert_eq!(h.executor.pending(), 2);

        h.executor.run_all();
        let events = h.controller.poll();
        assert!(events.contains(&FeedEvent::TitleChanged("Recent Stories")));
        assert!(events.contains(&FeedEvent::Reloaded { count: 4 }));
        assert!(!events.contains(&FeedEvent::Reloaded { count: 10 }));

        let ids: Vec<&str> = h.controller.feed().items().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["recent0", "recent1", "recent2", "recent3"]);
        assert_eq!(h.controller.title(), "Recent Stories");
    }

    #[test]
    fn section_switch_before_appearing_does_not_load() {
        let mut h = harness(10);
        h.controller.set_section(Section::Recent);
        assert_eq!(h.executor.pending(), 0);
        assert_eq!(h.controller.poll(), vec![FeedEvent::TitleChanged("Recent Stories")]);
    }

    #[test]
    fn upvote_happy_path() {
        let mut h = loaded_as(10, vec![test_story("x", 5)], Some("tok"));

        h.controller.upvote_pressed(0);
        let row = h.controller.row(0).unwrap();
        assert_eq!(row.story.score, 6);
        assert!(row.is_upvoted);

        h.executor.run_all();
        h.controller.poll();
        let row = h.controller.row(0).unwrap();
        assert_eq!(row.story.score, 6);
        assert!(row.is_upvoted);
    }

    #[test]
    fn upvote_failure_rolls_back() {
        let mut h = loaded_as(10, vec![test_story("x", 5)], Some("tok"));
        h.api.push_vote(Err(FeedError::Network("offline".to_string())));

        h.controller.upvote_pressed(0);
        h.executor.run_all();
        let events = h.controller.poll();

        assert_eq!(
            events,
            vec![
                FeedEvent::RowChanged("x".to_string()),
                FeedEvent::RowChanged("x".to_string()),
                FeedEvent::UpvoteSettled {
                    id: "x".to_string(),
                    phase: UpvotePhase::RolledBack
                },
            ]
        );
        let row = h.controller.row(0).unwrap();
        assert_eq!(row.story.score, 5);
        assert!(!row.is_upvoted);
    }

    #[test]
    fn confirmed_upvote_is_reported() {
        let mut h = loaded_as(10, vec![test_story("x", 5)], Some("tok"));

        h.controller.upvote_pressed(0);
        h.controller.poll();
        h.executor.run_all();

        assert_eq!(
            h.controller.poll(),
            vec![FeedEvent::UpvoteSettled {
                id: "x".to_string(),
                phase: UpvotePhase::Confirmed
            }]
        );
    }

    #[test]
    fn failed_vote_after_reload_keeps_server_score() {
        let mut h = loaded_as(10, vec![test_story("x", 5)], Some("tok"));
        h.api.push_vote(Err(FeedError::Network("offline".to_string())));

        h.controller.upvote_pressed(0);
        h.api.push_page(Ok(Page::new(vec![test_story("x", 5)])));
        h.controller.load();

        // The reload lands before the vote fails.
        h.executor.run_last();
        h.controller.poll();
        h.executor.run_all();
        h.controller.poll();

        let row = h.controller.row(0).unwrap();
        assert_eq!(row.story.score, 5);
        assert!(!row.is_upvoted);
    }

    #[test]
    fn failed_vote_after_section_round_trip_keeps_server_score() {
        let mut h = loaded_as(10, vec![test_story("x", 5)], Some("tok"));
        h.api.push_vote(Ok(false));

        h.controller.upvote_pressed(0);
        h.controller.set_section(Section::Recent);
        h.controller.set_section(Section::Default);
        h.api.push_page(Ok(Page::new(vec![test_story("x", 5)])));

        // Run the newest load first; the older one is stale either way.
        h.executor.run_last();
        h.controller.poll();
        h.executor.run_all();
        h.controller.poll();

        let row = h.controller.row(0).unwrap();
        assert_eq!(row.story.score, 5);
        assert!(!row.is_upvoted);
        assert_eq!(h.controller.local_state().upvote_phase("x"), UpvotePhase::RolledBack);
    }

    #[test]
    fn double_press_sends_one_vote() {
        let mut h = loaded_as(10, vec![test_story("x", 5)], Some("tok"));
        h.api.push_vote(Ok(false));

        h.controller.upvote_pressed(0);
        h.controller.upvote_pressed(0);
        assert_eq!(h.controller.row(0).unwrap().story.score, 6);
        h.executor.run_all();
        h.controller.poll();

        assert_eq!(*h.api.vote_calls.lock().unwrap(), vec!["x".to_string()]);
        assert_eq!(h.controller.row(0).unwrap().story.score, 5);
        assert!(!h.controller.row(0).unwrap().is_upvoted);
    }

    #[test]
    fn upvote_without_login_requests_login() {
        let mut h = loaded(10, vec![test_story("x", 5)]);

        h.controller.upvote_pressed(0);
        assert_eq!(h.executor.pending(), 0);
        assert_eq!(h.controller.poll(), vec![FeedEvent::LoginRequested]);
        assert!(h.api.vote_calls.lock().unwrap().is_empty());
        let row = h.controller.row(0).unwrap();
        assert_eq!(row.story.score, 5);
        assert!(!row.is_upvoted);
    }

    #[test]
    fn login_change_reloads_feed() {
        let mut h = loaded(10, test_page("a", 3));
        h.session.login("tok").unwrap();

        let events = h.controller.poll();
        assert_eq!(events, vec![FeedEvent::LoadingStarted]);
        assert_eq!(h.executor.pending(), 1);
    }

    #[test]
    fn selecting_and_commenting_mark_visited() {
        let mut h = loaded(10, vec![test_story("x", 1), test_story("y", 1)]);

        h.controller.select_story(0);
        h.controller.comments_pressed(1);
        h.controller.comment_posted("y");
        let events = h.controller.poll();

        assert_eq!(
            events,
            vec![
                FeedEvent::OpenStory {
                    id: "x".to_string(),
                    url: "https://example.com/x".to_string()
                },
                FeedEvent::RowChanged("x".to_string()),
                FeedEvent::OpenComments { id: "y".to_string() },
                FeedEvent::RowChanged("y".to_string()),
                FeedEvent::RowChanged("y".to_string()),
            ]
        );
        assert!(h.controller.row(0).unwrap().is_visited);
        let second = h.controller.row(1).unwrap();
        assert!(second.is_visited);
        assert!(second.is_replied);
    }

    #[test]
    fn thread_executor_delivers_results() {
        let api = Arc::new(FakeApi::default());
        api.push_page(Ok(Page::new(test_page("a", 2))));
        let mut controller = StoriesController::new(
            api,
            Arc::new(Session::new()),
            Arc::new(MemoryFlagStore::new()),
            Section::Default,
            10,
        );

        controller.view_appeared();
        let events = controller.poll_wait(Duration::from_secs(5));
        assert!(events.contains(&FeedEvent::Reloaded { count: 2 }));
        assert_eq!(controller.feed().items().len(), 2);
    }
}
