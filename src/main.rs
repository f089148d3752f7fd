use anyhow::{Context, Result};
use chrono::DateTime;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use feedpager::config::{Config, SESSION_ENV};
use feedpager::loader::{FetchState, LoaderError, PageOutcome, PaginatedFeedLoader, Presenter};
use feedpager::storage::{Database, DatabaseError};
use feedpager::story::{FeedContext, IntelligenceLevel, Story};
use feedpager::transport::HttpTransport;
use feedpager::util::{strip_control_chars, truncate_to_width};

/// Columns used for a story title in the listing
const TITLE_WIDTH: usize = 72;

/// Get the config directory path (~/.config/feedpager/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedpager"))
}

#[derive(Parser, Debug)]
#[command(
    name = "feedpager",
    about = "Page through a NewsBlur feed or river from the terminal"
)]
struct Args {
    /// Feed ID to read; repeat to read several feeds as one river
    #[arg(long = "feed", value_name = "ID", required = true)]
    feeds: Vec<i64>,

    /// Number of pages to fetch
    #[arg(long, default_value_t = 1)]
    pages: u32,

    /// Intelligence filter: -1 (all), 0 (neutral and up), 1 (focus only)
    #[arg(long, allow_negative_numbers = true)]
    intelligence: Option<i64>,

    /// Config file (default: ~/.config/feedpager/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Only show stories from the offline cache
    #[arg(long)]
    offline: bool,
}

/// Prints loader notifications as a plain story listing, skipping stories
/// below the selected intelligence level.
struct PrintPresenter {
    level: IntelligenceLevel,
}

impl PrintPresenter {
    fn format_story(story: &Story) -> String {
        let date = DateTime::from_timestamp(story.published, 0)
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "----------".to_string());
        let marker = match (story.read, story.saved) {
            (_, true) => '*',
            (false, false) => '+',
            (true, false) => ' ',
        };
        let title = strip_control_chars(&story.title);
        format!(
            "{} {} {}",
            marker,
            date,
            truncate_to_width(&title, TITLE_WIDTH)
        )
    }

    fn lines(&self, stories: &[Story]) -> Vec<String> {
        stories
            .iter()
            .filter(|story| story.is_visible_at(self.level))
            .map(Self::format_story)
            .collect()
    }

    fn print(&self, stories: &[Story]) {
        for line in self.lines(stories) {
            println!("{}", line);
        }
    }
}

impl Presenter for PrintPresenter {
    fn on_stories_added(&self, stories: &[Story]) {
        self.print(stories);
    }

    fn on_stories_replaced(&self, stories: &[Story]) {
        println!("-- refreshed from server --");
        self.print(stories);
    }

    fn on_fetch_state_changed(&self, state: &FetchState) {
        tracing::debug!(
            page = state.current_page(),
            fetching = state.is_fetching(),
            finished = state.is_finished(),
            online = state.is_online(),
            "Fetch state changed"
        );
    }

    fn on_error(&self, error: &LoaderError) {
        eprintln!("Error: {}", error);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    tracing::debug!(?config, "Configuration");

    let intelligence = match args.intelligence {
        Some(level) => IntelligenceLevel::try_from(level)?,
        None => config.default_intelligence,
    };
    let context = match args.feeds.as_slice() {
        [feed_id] => FeedContext::feed(*feed_id),
        feed_ids => FeedContext::river(feed_ids.iter().copied()),
    }
    .with_intelligence(intelligence);

    let cache_path = match &config.cache_path {
        Some(path) => path.clone(),
        None => {
            if !config_dir.exists() {
                std::fs::create_dir_all(&config_dir)
                    .context("Failed to create config directory")?;
            }
            config_dir.join("cache.db")
        }
    };
    let cache_path_str = cache_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in cache path"))?;
    let db = match Database::open(cache_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: The offline cache is locked by another feedpager process.");
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open offline cache: {}", e)),
    };

    let http_client = reqwest::Client::builder()
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(std::time::Duration::from_secs(30))
        .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
        .build()?;
    let session = config.session(std::env::var(SESSION_ENV).ok());
    if session.is_none() && !args.offline {
        tracing::warn!("No session cookie configured, requests will be anonymous");
    }
    let transport = HttpTransport::new(
        http_client,
        &config.base_url,
        session,
        config.transport_options(),
    )
    .context("Invalid base_url in config")?;

    let mut loader = PaginatedFeedLoader::new(
        context.clone(),
        Arc::new(transport),
        Arc::new(db),
        Arc::new(PrintPresenter {
            level: intelligence,
        }),
    )
    .with_page_size(config.page_size);

    println!("== {} ({}) ==", context, intelligence);
    loader.reset(context).await;

    if !args.offline {
        for _ in 0..args.pages {
            match loader.fetch_next_page().await {
                Ok(PageOutcome::Loaded { finished: true, .. })
                | Ok(PageOutcome::Skipped(_)) => break,
                Ok(_) => {}
                // Already reported through the presenter
                Err(_) => break,
            }
        }
    }
    loader.settle().await;

    let state = loader.state();
    println!(
        "-- {} stories, {} unread, {} page(s){}{} --",
        loader.visible_stories().len(),
        loader.unread_count(),
        state.current_page(),
        if state.is_finished() { ", end of feed" } else { "" },
        if state.is_online() { "" } else { ", offline" },
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scored(id: &str, score: i8) -> Story {
        let mut story = Story::new(id, 1, id);
        story.published = 1704067200;
        story.score = score;
        story
    }

    #[test]
    fn test_print_presenter_hides_stories_below_level() {
        let stories = vec![scored("liked", 1), scored("plain", 0), scored("disliked", -1)];

        let focus = PrintPresenter {
            level: IntelligenceLevel::Focus,
        };
        assert_eq!(focus.lines(&stories), vec!["+ 2024-01-01 liked"]);

        let neutral = PrintPresenter {
            level: IntelligenceLevel::Neutral,
        };
        assert_eq!(neutral.lines(&stories).len(), 2);

        let all = PrintPresenter {
            level: IntelligenceLevel::All,
        };
        assert_eq!(all.lines(&stories).len(), 3);
    }
}
