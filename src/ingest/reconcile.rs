use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use super::index::{DedupIndex, PodcastClaim};
use crate::feed::{ItemExtension, ParsedFeed, ParsedItem};
use crate::storage::{Database, NewEpisode, NewPodcast, Podcast, PodcastUpdate};

/// Store failures scoped to one feed. The run continues with other feeds.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Feed has no URL to identify it by")]
    MissingFeedUrl,

    #[error("Podcast for {0} is indexed but missing from the store")]
    PodcastMissing(String),

    #[error("Failed to load podcast {feed_url}: {message}")]
    LoadPodcast { feed_url: String, message: String },

    #[error("Failed to insert podcast {feed_url}: {message}")]
    InsertPodcast { feed_url: String, message: String },

    #[error("Failed to update podcast {feed_url}: {message}")]
    UpdatePodcast { feed_url: String, message: String },

    #[error("Failed to load episodes of {podcast_slug}: {message}")]
    LoadEpisodes {
        podcast_slug: String,
        message: String,
    },

    #[error("Failed to insert {count} episodes of {podcast_slug}: {message}")]
    InsertEpisodes {
        podcast_slug: String,
        count: usize,
        message: String,
    },
}

/// What reconciling one feed changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub podcast_id: i64,
    pub slug: String,
    /// The podcast was created by this reconcile
    pub inserted: bool,
    /// An existing podcast had at least one field refreshed
    pub updated: bool,
    pub episodes_inserted: usize,
    /// Items without an iTunes block
    pub skipped_items: usize,
}

/// The stored podcast fields copied onto each new episode.
struct PodcastRef {
    id: i64,
    slug: String,
    title: String,
    image: String,
}

/// Decides insert vs. update for parsed feeds and writes the result.
#[derive(Clone)]
pub struct Reconciler {
    db: Database,
    index: Arc<DedupIndex>,
}

impl Reconciler {
    pub fn new(db: Database, index: Arc<DedupIndex>) -> Self {
        Self { db, index }
    }

    /// Reconcile one parsed feed against the store.
    ///
    /// The podcast is identified by [`ParsedFeed::feed_url`]. A known feed
    /// refreshes the podcast's mutable fields; an unknown one inserts a new
    /// podcast under a fresh slug. Items carrying an iTunes block whose GUID
    /// is not yet known become new episodes, written in one bulk insert.
    ///
    /// # Errors
    ///
    /// Returns a [`ReconcileError`] when the feed has no URL or a store
    /// read/write fails. Index reservations made for the failed write are
    /// released, so a later run can retry the same entities.
    pub async fn reconcile(&self, feed: &ParsedFeed) -> Result<ReconcileOutcome, ReconcileError> {
        let feed_url = feed
            .feed_url()
            .ok_or(ReconcileError::MissingFeedUrl)?
            .to_owned();

        let _feed_guard = self.index.lock_feed(&feed_url).await;
        let now = Utc::now().timestamp();

        let (podcast, inserted, updated) = match self.index.claim_podcast(&feed_url, &feed.title) {
            PodcastClaim::Existing => {
                let (podcast, updated) = self.refresh_podcast(&feed_url, feed, now).await?;
                (podcast, false, updated)
            }
            PodcastClaim::New { slug } => {
                let podcast = self.insert_podcast(&feed_url, slug, feed, now).await?;
                (podcast, true, false)
            }
        };

        let (episodes_inserted, skipped_items) =
            self.reconcile_episodes(&podcast, feed, now).await?;

        tracing::debug!(
            feed_url = %feed_url,
            slug = %podcast.slug,
            inserted,
            updated,
            episodes_inserted,
            skipped_items,
            "Reconciled feed"
        );

        Ok(ReconcileOutcome {
            podcast_id: podcast.id,
            slug: podcast.slug,
            inserted,
            updated,
            episodes_inserted,
            skipped_items,
        })
    }

    async fn refresh_podcast(
        &self,
        feed_url: &str,
        feed: &ParsedFeed,
        now: i64,
    ) -> Result<(PodcastRef, bool), ReconcileError> {
        let stored = self
            .db
            .find_podcast_by_feed_url(feed_url)
            .await
            .map_err(|e| ReconcileError::LoadPodcast {
                feed_url: feed_url.to_owned(),
                message: format!("{e:#}"),
            })?
            .ok_or_else(|| ReconcileError::PodcastMissing(feed_url.to_owned()))?;

        // A feed without a publish date is stamped with the time it was seen
        let updated_at = feed.published.unwrap_or(now);
        let fresh = podcast_from_feed(feed, feed_url, stored.slug.clone(), updated_at);
        let update = PodcastUpdate::diff(&stored, &fresh);

        let changed = self
            .db
            .update_podcast(stored.id, &update)
            .await
            .map_err(|e| ReconcileError::UpdatePodcast {
                feed_url: feed_url.to_owned(),
                message: format!("{e:#}"),
            })?;

        Ok((podcast_ref(stored, fresh.image), changed))
    }

    async fn insert_podcast(
        &self,
        feed_url: &str,
        slug: String,
        feed: &ParsedFeed,
        now: i64,
    ) -> Result<PodcastRef, ReconcileError> {
        let podcast = podcast_from_feed(feed, feed_url, slug, feed.published.unwrap_or(now));

        match self.db.insert_podcast(&podcast).await {
            Ok(id) => {
                tracing::info!(feed_url = %feed_url, slug = %podcast.slug, "Inserted podcast");
                Ok(PodcastRef {
                    id,
                    slug: podcast.slug,
                    title: podcast.title,
                    image: podcast.image,
                })
            }
            Err(e) => {
                self.index.release_podcast(feed_url, &podcast.slug);
                Err(ReconcileError::InsertPodcast {
                    feed_url: feed_url.to_owned(),
                    message: format!("{e:#}"),
                })
            }
        }
    }

    /// Returns `(episodes_inserted, skipped_items)`.
    async fn reconcile_episodes(
        &self,
        podcast: &PodcastRef,
        feed: &ParsedFeed,
        now: i64,
    ) -> Result<(usize, usize), ReconcileError> {
        if !self.index.has_episode_keys(&podcast.slug) {
            let keys = self.db.episode_keys(&podcast.slug).await.map_err(|e| {
                ReconcileError::LoadEpisodes {
                    podcast_slug: podcast.slug.clone(),
                    message: format!("{e:#}"),
                }
            })?;
            self.index.seed_episode_keys(&podcast.slug, keys);
        }

        let mut skipped = 0;
        let mut fresh = Vec::new();

        for item in &feed.items {
            let Some(itunes) = &item.itunes else {
                tracing::debug!(slug = %podcast.slug, guid = %item.guid, "Skipping item without iTunes block");
                skipped += 1;
                continue;
            };

            let Some(slug) = self
                .index
                .claim_episode(&podcast.slug, &item.guid, &item.title)
            else {
                continue;
            };

            fresh.push(episode_from_item(podcast, item, itunes, slug, now));
        }

        if fresh.is_empty() {
            return Ok((0, skipped));
        }

        match self.db.insert_episodes(&fresh).await {
            Ok(inserted) => {
                if inserted < fresh.len() {
                    tracing::debug!(
                        slug = %podcast.slug,
                        attempted = fresh.len(),
                        inserted,
                        "Some episodes were already stored"
                    );
                }
                Ok((inserted, skipped))
            }
            Err(e) => {
                self.index.release_episodes(&podcast.slug, &fresh);
                Err(ReconcileError::InsertEpisodes {
                    podcast_slug: podcast.slug.clone(),
                    count: fresh.len(),
                    message: format!("{e:#}"),
                })
            }
        }
    }
}

fn podcast_from_feed(feed: &ParsedFeed, feed_url: &str, slug: String, updated: i64) -> NewPodcast {
    let itunes = feed.itunes.clone().unwrap_or_default();

    NewPodcast {
        title: feed.title.clone(),
        categories: feed.categories.clone(),
        link: feed.link.clone(),
        description: feed.description.clone(),
        subtitle: itunes.subtitle,
        owner: itunes.owner.unwrap_or_default(),
        author: itunes.author,
        image: itunes.image,
        feed_url: feed_url.to_owned(),
        slug,
        updated,
    }
}

fn podcast_ref(stored: Podcast, image: String) -> PodcastRef {
    PodcastRef {
        id: stored.id,
        slug: stored.slug,
        title: stored.title,
        image,
    }
}

fn episode_from_item(
    podcast: &PodcastRef,
    item: &ParsedItem,
    itunes: &ItemExtension,
    slug: String,
    now: i64,
) -> NewEpisode {
    NewEpisode {
        podcast_id: podcast.id,
        podcast_slug: podcast.slug.clone(),
        podcast_title: podcast.title.clone(),
        podcast_image: podcast.image.clone(),
        guid: item.guid.clone(),
        title: item.title.clone(),
        published: item.published.unwrap_or(now),
        duration: itunes.duration.clone(),
        summary: itunes.summary.clone(),
        subtitle: itunes.subtitle.clone(),
        description: item.description.clone(),
        image: itunes.image.clone(),
        content: item.content.clone(),
        enclosure: item.enclosures.first().cloned().unwrap_or_default(),
        slug,
    }
}
