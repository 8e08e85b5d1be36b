use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use designer_news_feed::auth::{AuthProvider, Session};
use designer_news_feed::config::Config;
use designer_news_feed::controller::{FeedEvent, StoriesController};
use designer_news_feed::db::Database;
use designer_news_feed::dn_client::DesignerNewsClient;
use designer_news_feed::local_state::UpvotePhase;
use designer_news_feed::models::{Section, StoryRow};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SectionArg {
    Top,
    Recent,
}

impl From<SectionArg> for Section {
    fn from(arg: SectionArg) -> Self {
        match arg {
            SectionArg::Top => Section::Default,
            SectionArg::Recent => Section::Recent,
        }
    }
}

#[derive(Debug, Parser)]
#[command(version, about = "Browse Designer News stories from the terminal")]
struct Cli {
    #[arg(short, long, value_enum, default_value_t = SectionArg::Top)]
    section: SectionArg,

    /// Number of pages to load.
    #[arg(short, long, default_value_t = 1)]
    pages: usize,

    #[arg(long, env = "DN_API_URL")]
    api_url: Option<String>,

    #[arg(long)]
    page_size: Option<usize>,

    #[arg(long, env = "DN_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Save an access token before loading.
    #[arg(long, env = "DN_ACCESS_TOKEN")]
    login: Option<String>,

    #[arg(long, conflicts_with = "login")]
    logout: bool,

    /// Upvote the story with this id once the feed is loaded.
    #[arg(long)]
    upvote: Option<String>,

    /// Mark the story at this position (1-based) as visited.
    #[arg(long)]
    visit: Option<usize>,

    /// Seconds to wait for each response.
    #[arg(long, default_value_t = 60)]
    wait: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(url) = cli.api_url.clone() {
        config.api_url = url;
    }
    if let Some(size) = cli.page_size {
        config.page_size = size;
    }
    if let Some(dir) = cli.data_dir.clone() {
        config.data_dir = dir;
    }
    config.validate()?;

    let database = Arc::new(
        Database::new(&config.data_dir)
            .with_context(|| format!("opening database in {}", config.data_dir.display()))?,
    );
    let session = Arc::new(Session::with_database(Arc::clone(&database))?);
    if let Some(token) = &cli.login {
        session.login(token)?;
    } else if cli.logout {
        session.logout()?;
    }

    let client = DesignerNewsClient::new(&config)?;
    let mut controller = StoriesController::new(
        Arc::new(client),
        Arc::clone(&session) as Arc<dyn AuthProvider>,
        database,
        cli.section.into(),
        config.page_size,
    );
    let timeout = Duration::from_secs(cli.wait);

    controller.view_appeared();
    let events = wait_for(&mut controller, timeout, |e| matches!(e, FeedEvent::LoadingFinished));
    if let Some(FeedEvent::LoadFailed(e)) = events.iter().find(|e| matches!(e, FeedEvent::LoadFailed(_))) {
        return Err(anyhow!("could not load stories: {e}"));
    }

    for _ in 1..cli.pages {
        if !controller.feed().has_more() {
            break;
        }
        controller.row_displayed(controller.feed().items().len());
        wait_for(&mut controller, timeout, |e| {
            matches!(e, FeedEvent::Appended { .. } | FeedEvent::LoadMoreFailed(_))
        });
    }

    if let Some(position) = cli.visit {
        controller.select_story(position.saturating_sub(1));
    }

    if let Some(id) = &cli.upvote {
        let index = controller
            .feed()
            .items()
            .iter()
            .position(|s| &s.id == id)
            .ok_or_else(|| anyhow!("story {id} is not in the loaded pages"))?;
        controller.upvote_pressed(index);
        let events = controller.poll();
        if events.contains(&FeedEvent::LoginRequested) {
            warn!("Upvoting needs an access token; pass --login <TOKEN>");
        } else if controller.local_state().upvote_phase(id) == UpvotePhase::Pending {
            wait_for(&mut controller, timeout, |e| {
                matches!(e, FeedEvent::UpvoteSettled { id: settled, .. } if settled == id)
            });
            info!("Upvote for story {id}: {:?}", controller.local_state().upvote_phase(id));
        }
    }

    println!("{}", controller.title());
    for index in 0..controller.feed().items().len() {
        if let Some(row) = controller.row(index) {
            println!("{}", format_row(index + 1, &row));
        }
    }
    if controller.feed().has_more() {
        println!("  ... more stories available");
    }

    Ok(())
}

fn wait_for<F>(controller: &mut StoriesController, timeout: Duration, done: F) -> Vec<FeedEvent>
where
    F: Fn(&FeedEvent) -> bool,
{
    let deadline = Instant::now() + timeout;
    let mut seen = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let events = controller.poll_wait(remaining.min(Duration::from_millis(250)));
        let finished = events.iter().any(&done);
        seen.extend(events);
        if finished || remaining.is_zero() {
            return seen;
        }
    }
}

fn format_row(position: usize, row: &StoryRow<'_>) -> String {
    let story = row.story;
    let marks = format!(
        "{}{}{}",
        if row.is_upvoted { '^' } else { ' ' },
        if row.is_visited { '*' } else { ' ' },
        if row.is_replied { '@' } else { ' ' },
    );
    let age = story
        .created_at
        .map(|t| format!(" {}", t.format("%Y-%m-%d")))
        .unwrap_or_default();
    format!(
        "{position:>3}. [{marks}] {} ({})\n       {} points by {}{age} | {} comments | id {}",
        story.title, story.domain, story.score, story.by, story.comments_count, story.id
    )
}
