use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use tokio::sync::OwnedMutexGuard;

use crate::storage::{Database, EpisodeKeys, NewEpisode, PodcastKeys};
use crate::util::unique_slug;

/// Result of claiming a feed URL in the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodcastClaim {
    /// A podcast for this feed URL already exists (or was inserted earlier
    /// in this run).
    Existing,
    /// The feed URL and `slug` are now reserved for a new podcast.
    New { slug: String },
}

/// Run-scoped dedup state shared by every pipeline task.
///
/// The std mutexes are never held across an await. Work on the same feed
/// URL is additionally serialized through [`DedupIndex::lock_feed`], so the
/// check-then-insert sequence of one feed never interleaves with another
/// task reconciling that feed.
#[derive(Debug, Default)]
pub struct DedupIndex {
    podcasts: Mutex<PodcastKeys>,
    /// Episode GUIDs and slugs, keyed by podcast slug. Loaded lazily.
    episodes: Mutex<HashMap<String, EpisodeKeys>>,
    feed_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

// A panicking task cannot leave the sets half-updated (every mutation is a
// single insert/remove), so a poisoned lock is still safe to use.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DedupIndex {
    pub fn new(podcasts: PodcastKeys) -> Self {
        Self {
            podcasts: Mutex::new(podcasts),
            ..Default::default()
        }
    }

    /// Seed the index with every stored podcast's feed URL and slug.
    pub async fn load(db: &Database) -> Result<Self> {
        let keys = db.podcast_keys().await?;
        tracing::debug!(
            podcasts = keys.feed_urls.len(),
            "Loaded podcast keys into dedup index"
        );
        Ok(Self::new(keys))
    }

    // ========================================================================
    // Podcasts
    // ========================================================================

    /// Atomically check a feed URL and, when unknown, reserve it together
    /// with a collision-free slug derived from `title`.
    pub fn claim_podcast(&self, feed_url: &str, title: &str) -> PodcastClaim {
        let mut podcasts = lock(&self.podcasts);
        if podcasts.feed_urls.contains(feed_url) {
            return PodcastClaim::Existing;
        }

        let slug = unique_slug(title, &podcasts.slugs);
        podcasts.feed_urls.insert(feed_url.to_owned());
        podcasts.slugs.insert(slug.clone());
        PodcastClaim::New { slug }
    }

    /// Undo a [`PodcastClaim::New`] whose insert failed.
    pub fn release_podcast(&self, feed_url: &str, slug: &str) {
        let mut podcasts = lock(&self.podcasts);
        podcasts.feed_urls.remove(feed_url);
        podcasts.slugs.remove(slug);
    }

    pub fn knows_feed_url(&self, feed_url: &str) -> bool {
        lock(&self.podcasts).feed_urls.contains(feed_url)
    }

    pub fn knows_podcast_slug(&self, slug: &str) -> bool {
        lock(&self.podcasts).slugs.contains(slug)
    }

    /// Serialize reconciliation of one feed URL across tasks.
    pub async fn lock_feed(&self, feed_url: &str) -> OwnedMutexGuard<()> {
        let feed_lock = {
            let mut locks = lock(&self.feed_locks);
            Arc::clone(locks.entry(feed_url.to_owned()).or_default())
        };
        feed_lock.lock_owned().await
    }

    // ========================================================================
    // Episodes
    // ========================================================================

    pub fn has_episode_keys(&self, podcast_slug: &str) -> bool {
        lock(&self.episodes).contains_key(podcast_slug)
    }

    /// Install the stored episode keys of a podcast. Keys that are already
    /// cached win, so a late load never discards claims made in this run.
    pub fn seed_episode_keys(&self, podcast_slug: &str, keys: EpisodeKeys) {
        lock(&self.episodes)
            .entry(podcast_slug.to_owned())
            .or_insert(keys);
    }

    /// Claim an episode GUID for a podcast.
    ///
    /// Returns the episode slug reserved for it, or `None` when the GUID is
    /// already known for this podcast.
    pub fn claim_episode(&self, podcast_slug: &str, guid: &str, title: &str) -> Option<String> {
        let mut episodes = lock(&self.episodes);
        let keys = episodes.entry(podcast_slug.to_owned()).or_default();
        if keys.guids.contains(guid) {
            return None;
        }

        let slug = unique_slug(title, &keys.slugs);
        keys.guids.insert(guid.to_owned());
        keys.slugs.insert(slug.clone());
        Some(slug)
    }

    /// Undo the claims of episodes whose insert failed.
    pub fn release_episodes(&self, podcast_slug: &str, released: &[NewEpisode]) {
        let mut episodes = lock(&self.episodes);
        if let Some(keys) = episodes.get_mut(podcast_slug) {
            for episode in released {
                keys.guids.remove(&episode.guid);
                keys.slugs.remove(&episode.slug);
            }
        }
    }

    pub fn knows_episode(&self, podcast_slug: &str, guid: &str) -> bool {
        lock(&self.episodes)
            .get(podcast_slug)
            .is_some_and(|keys| keys.guids.contains(guid))
    }
}
