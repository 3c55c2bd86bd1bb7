//! Handlers for the `gator` subcommands.
//!
//! Each handler takes the open [`Session`] and a writer for its user-facing
//! output, so the CLI passes stdout and tests pass a buffer.
use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;

use crate::config::Config;
use crate::feed::HttpFetcher;
use crate::storage::{Database, Feed, User};
use crate::sync::{Scheduler, SystemClock};
use crate::util::validate_feed_url;

/// Default number of posts shown by `browse`
pub const DEFAULT_BROWSE_LIMIT: i64 = 2;

/// Everything a command needs: the database, the loaded config and where it
/// came from (login/register write back to it).
pub struct Session {
    pub db: Database,
    pub config: Config,
    pub config_path: PathBuf,
}

impl Session {
    pub fn new(db: Database, config: Config, config_path: PathBuf) -> Self {
        Self {
            db,
            config,
            config_path,
        }
    }

    /// The logged-in user, or an error telling the operator how to get one.
    pub async fn current_user(&self) -> Result<User> {
        let Some(name) = self.config.current_user_name.as_deref() else {
            bail!("No user logged in. Run `gator register <name>` or `gator login <name>` first.");
        };
        self.db
            .get_user_by_name(name)
            .await?
            .with_context(|| format!("Current user '{}' does not exist. Log in again.", name))
    }

    /// Look a feed up by url as typed, then in the normalized form `addfeed` stores.
    async fn feed_by_url(&self, url: &str) -> Result<Feed> {
        let url = url.trim();
        if let Some(feed) = self.db.get_feed_by_url(url).await? {
            return Ok(feed);
        }
        if let Ok(parsed) = url::Url::parse(url) {
            if let Some(feed) = self.db.get_feed_by_url(parsed.as_str()).await? {
                return Ok(feed);
            }
        }
        bail!("No feed registered with url {}", url)
    }

    fn set_current_user(&mut self, name: &str) -> Result<()> {
        self.config = Config::set_current_user(&self.config_path, name)
            .with_context(|| format!("Failed to update {}", self.config_path.display()))?;
        Ok(())
    }
}

pub async fn register(session: &mut Session, name: &str, out: &mut impl Write) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        bail!("User name must not be empty");
    }
    if session.db.get_user_by_name(name).await?.is_some() {
        bail!("User '{}' already exists", name);
    }

    let user = session.db.create_user(name).await?;
    session.set_current_user(&user.name)?;
    tracing::info!(user_id = user.id, user = %user.name, "Registered user");
    writeln!(out, "User {} created", user.name)?;
    Ok(())
}

pub async fn login(session: &mut Session, name: &str, out: &mut impl Write) -> Result<()> {
    let name = name.trim();
    if session.db.get_user_by_name(name).await?.is_none() {
        bail!("User '{}' does not exist", name);
    }
    session.set_current_user(name)?;
    writeln!(out, "Logged in as {}", name)?;
    Ok(())
}

pub async fn users(session: &Session, out: &mut impl Write) -> Result<()> {
    let current = session.config.current_user_name.as_deref();
    for user in session.db.get_users().await? {
        if Some(user.name.as_str()) == current {
            writeln!(out, "* {} (current)", user.name)?;
        } else {
            writeln!(out, "* {}", user.name)?;
        }
    }
    Ok(())
}

pub async fn reset(session: &Session, out: &mut impl Write) -> Result<()> {
    let removed = session.db.delete_all_users().await?;
    tracing::info!(users = removed, "Reset database");
    writeln!(out, "Removed {} users and everything they owned", removed)?;
    Ok(())
}

pub async fn add_feed(
    session: &Session,
    name: &str,
    url: &str,
    out: &mut impl Write,
) -> Result<()> {
    let user = session.current_user().await?;
    let name = name.trim();
    if name.is_empty() {
        bail!("Feed name must not be empty");
    }
    let url = validate_feed_url(url).with_context(|| format!("Rejected feed url {}", url))?;

    if session.db.get_feed_by_url(url.as_str()).await?.is_some() {
        bail!("A feed with url {} is already registered", url);
    }

    let feed = session.db.create_feed(name, url.as_str(), user.id).await?;
    session.db.follow_feed(user.id, feed.id).await?;
    tracing::info!(feed_id = feed.id, url = %feed.url, user = %user.name, "Added feed");

    writeln!(out, "Feed added:")?;
    writeln!(out, "  id:   {}", feed.id)?;
    writeln!(out, "  name: {}", feed.name)?;
    writeln!(out, "  url:  {}", feed.url)?;
    Ok(())
}

pub async fn feeds(session: &Session, out: &mut impl Write) -> Result<()> {
    let feeds = session.db.get_feeds_with_owner().await?;
    if feeds.is_empty() {
        writeln!(out, "No feeds registered")?;
        return Ok(());
    }
    for entry in feeds {
        writeln!(
            out,
            "* {} ({}) added by {}",
            entry.feed.name, entry.feed.url, entry.owner_name
        )?;
    }
    Ok(())
}

pub async fn follow(session: &Session, url: &str, out: &mut impl Write) -> Result<()> {
    let user = session.current_user().await?;
    let feed = session.feed_by_url(url).await?;
    let follow = session.db.follow_feed(user.id, feed.id).await?;
    writeln!(out, "{} now follows {}", follow.user_name, follow.feed_name)?;
    Ok(())
}

pub async fn unfollow(session: &Session, url: &str, out: &mut impl Write) -> Result<()> {
    let user = session.current_user().await?;
    let feed = session.feed_by_url(url).await?;
    if !session.db.unfollow_feed(user.id, feed.id).await? {
        bail!("{} does not follow {}", user.name, feed.name);
    }
    writeln!(out, "{} unfollowed {}", user.name, feed.name)?;
    Ok(())
}

pub async fn following(session: &Session, out: &mut impl Write) -> Result<()> {
    let user = session.current_user().await?;
    let feeds = session.db.get_followed_feeds(user.id).await?;
    if feeds.is_empty() {
        writeln!(out, "{} follows no feeds", user.name)?;
        return Ok(());
    }
    for feed in feeds {
        writeln!(out, "* {}", feed.name)?;
    }
    Ok(())
}

pub async fn browse(session: &Session, limit: i64, out: &mut impl Write) -> Result<()> {
    if limit <= 0 {
        bail!("Limit must be a positive number");
    }
    let user = session.current_user().await?;
    let posts = session.db.get_posts_for_user(user.id, limit).await?;
    if posts.is_empty() {
        writeln!(out, "No posts yet. Follow a feed and run `gator agg` first.")?;
        return Ok(());
    }
    for post in posts {
        writeln!(out, "{}", post.title)?;
        writeln!(out, "  {}", post.published_at.format("%a, %d %b %Y %H:%M:%S %z"))?;
        writeln!(out, "  {}", post.url)?;
        if !post.description.is_empty() {
            writeln!(out, "  {}", post.description)?;
        }
        writeln!(out)?;
    }
    Ok(())
}

/// Poll feeds every `interval` until `shutdown` fires, printing each cycle's report.
pub async fn agg(
    session: Session,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
    out: &mut impl Write,
) -> Result<u64> {
    let fetcher = HttpFetcher::new(&session.config.user_agent)
        .context("Failed to build HTTP client")?;
    let fetch_timeout = session.config.fetch_timeout();
    let scheduler = Scheduler::new(session.db, fetcher, SystemClock, fetch_timeout);

    writeln!(out, "Collecting feeds every {:?}", interval)?;
    let cycles = scheduler
        .run_until_cancelled(interval, shutdown, |report| {
            if let Err(e) = writeln!(out, "{}", report) {
                tracing::warn!(error = %e, "Failed to write cycle report");
            }
        })
        .await;
    writeln!(out, "Stopped after {} cycles", cycles)?;
    Ok(cycles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn session() -> (Session, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(":memory:").await.unwrap();
        let path = dir.path().join("config.toml");
        (Session::new(db, Config::default(), path), dir)
    }

    fn text(out: Vec<u8>) -> String {
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_register_sets_current_user_and_persists_config() {
        let (mut session, _dir) = session().await;
        let mut out = Vec::new();

        register(&mut session, "kahya", &mut out).await.unwrap();

        assert_eq!(session.config.current_user_name.as_deref(), Some("kahya"));
        let saved = Config::load(&session.config_path).unwrap();
        assert_eq!(saved.current_user_name.as_deref(), Some("kahya"));
        assert!(text(out).contains("User kahya created"));
    }

    #[tokio::test]
    async fn test_register_twice_fails() {
        let (mut session, _dir) = session().await;
        register(&mut session, "kahya", &mut Vec::new()).await.unwrap();
        let err = register(&mut session, "kahya", &mut Vec::new()).await.unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn test_login_unknown_user_fails() {
        let (mut session, _dir) = session().await;
        assert!(login(&mut session, "ghost", &mut Vec::new()).await.is_err());
        assert_eq!(session.config.current_user_name, None);
    }

    #[tokio::test]
    async fn test_users_marks_current() {
        let (mut session, _dir) = session().await;
        register(&mut session, "holgith", &mut Vec::new()).await.unwrap();
        register(&mut session, "kahya", &mut Vec::new()).await.unwrap();

        let mut out = Vec::new();
        users(&session, &mut out).await.unwrap();
        assert_eq!(text(out), "* holgith\n* kahya (current)\n");
    }

    #[tokio::test]
    async fn test_commands_require_login() {
        let (session, _dir) = session().await;
        let err = add_feed(&session, "Blog", "https://blog.example.com/rss", &mut Vec::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No user logged in"));
        assert!(following(&session, &mut Vec::new()).await.is_err());
        assert!(browse(&session, 2, &mut Vec::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_add_feed_follows_automatically() {
        let (mut session, _dir) = session().await;
        register(&mut session, "kahya", &mut Vec::new()).await.unwrap();
        add_feed(&session, "Boot.dev", "https://blog.boot.dev/index.xml", &mut Vec::new())
            .await
            .unwrap();

        let mut out = Vec::new();
        following(&session, &mut out).await.unwrap();
        assert_eq!(text(out), "* Boot.dev\n");

        let mut out = Vec::new();
        feeds(&session, &mut out).await.unwrap();
        assert!(text(out).contains("added by kahya"));
    }

    #[tokio::test]
    async fn test_add_feed_rejects_private_url() {
        let (mut session, _dir) = session().await;
        register(&mut session, "kahya", &mut Vec::new()).await.unwrap();
        assert!(add_feed(&session, "Local", "http://127.0.0.1/rss", &mut Vec::new())
            .await
            .is_err());
        assert!(session.db.get_feeds_with_owner().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_follow_and_unfollow_other_users_feed() {
        let (mut session, _dir) = session().await;
        register(&mut session, "holgith", &mut Vec::new()).await.unwrap();
        add_feed(&session, "HN", "https://news.ycombinator.com/rss", &mut Vec::new())
            .await
            .unwrap();
        register(&mut session, "kahya", &mut Vec::new()).await.unwrap();

        let mut out = Vec::new();
        follow(&session, "https://news.ycombinator.com/rss", &mut out).await.unwrap();
        assert_eq!(text(out), "kahya now follows HN\n");

        unfollow(&session, "https://news.ycombinator.com/rss", &mut Vec::new())
            .await
            .unwrap();
        assert!(unfollow(&session, "https://news.ycombinator.com/rss", &mut Vec::new())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_browse_empty_and_invalid_limit() {
        let (mut session, _dir) = session().await;
        register(&mut session, "kahya", &mut Vec::new()).await.unwrap();

        let mut out = Vec::new();
        browse(&session, DEFAULT_BROWSE_LIMIT, &mut out).await.unwrap();
        assert!(text(out).starts_with("No posts yet"));
        assert!(browse(&session, 0, &mut Vec::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_reset_removes_everything() {
        let (mut session, _dir) = session().await;
        register(&mut session, "kahya", &mut Vec::new()).await.unwrap();
        add_feed(&session, "Blog", "https://blog.example.com/rss", &mut Vec::new())
            .await
            .unwrap();

        reset(&session, &mut Vec::new()).await.unwrap();
        assert!(session.db.get_users().await.unwrap().is_empty());
        assert!(session.db.get_feeds_with_owner().await.unwrap().is_empty());
    }
}
