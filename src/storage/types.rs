use std::collections::HashSet;

use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds a lock on the database file
    #[error("The database is locked by another process. Is another ingest run still active?")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) all surface as
/// one of these messages.
pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Shared Value Types
// ============================================================================

/// Owner block of a podcast (`itunes:owner`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Owner {
    pub name: String,
    pub email: String,
}

/// Media attachment of an episode. All fields are kept verbatim from the feed,
/// including `size`, which feeds frequently leave empty or fill with junk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enclosure {
    pub size: String,
    pub mime_type: String,
    pub url: String,
}

// ============================================================================
// Podcasts
// ============================================================================

/// A stored podcast.
#[derive(Debug, Clone, PartialEq)]
pub struct Podcast {
    pub id: i64,
    pub title: String,
    pub categories: Vec<String>,
    pub link: String,
    pub description: String,
    pub subtitle: String,
    pub owner: Owner,
    pub author: String,
    pub image: String,
    /// Canonical feed URL, unique across podcasts
    pub feed_url: String,
    /// Unique across podcasts
    pub slug: String,
    /// Unix seconds
    pub updated: i64,
}

/// A podcast about to be inserted; the store assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPodcast {
    pub title: String,
    pub categories: Vec<String>,
    pub link: String,
    pub description: String,
    pub subtitle: String,
    pub owner: Owner,
    pub author: String,
    pub image: String,
    pub feed_url: String,
    pub slug: String,
    pub updated: i64,
}

/// Partial update of a podcast's mutable fields.
///
/// Only `Some` fields are written. Title, slug and feed URL never change
/// after insertion, so they are not representable here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PodcastUpdate {
    pub categories: Option<Vec<String>>,
    pub link: Option<String>,
    pub description: Option<String>,
    pub subtitle: Option<String>,
    pub author: Option<String>,
    pub image: Option<String>,
    pub updated: Option<i64>,
}

impl PodcastUpdate {
    /// Builds the update that turns `current` into `fresh`, keeping only the
    /// fields that actually differ.
    pub fn diff(current: &Podcast, fresh: &NewPodcast) -> Self {
        fn changed<T: PartialEq + Clone>(old: &T, new: &T) -> Option<T> {
            (old != new).then(|| new.clone())
        }

        Self {
            categories: changed(&current.categories, &fresh.categories),
            link: changed(&current.link, &fresh.link),
            description: changed(&current.description, &fresh.description),
            subtitle: changed(&current.subtitle, &fresh.subtitle),
            author: changed(&current.author, &fresh.author),
            image: changed(&current.image, &fresh.image),
            updated: changed(&current.updated, &fresh.updated),
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Uniqueness keys of every stored podcast, used to seed the dedup index.
#[derive(Debug, Clone, Default)]
pub struct PodcastKeys {
    pub feed_urls: HashSet<String>,
    pub slugs: HashSet<String>,
}

/// Row type for podcast queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PodcastRow {
    pub id: i64,
    pub title: String,
    pub categories: String,
    pub link: String,
    pub description: String,
    pub subtitle: String,
    pub owner_name: String,
    pub owner_email: String,
    pub author: String,
    pub image: String,
    pub feed_url: String,
    pub slug: String,
    pub updated: i64,
}

impl PodcastRow {
    pub(crate) fn into_podcast(self) -> Podcast {
        // Categories are written by us as a JSON array; anything else means the
        // row was edited by hand and is treated as uncategorised.
        let categories = serde_json::from_str(&self.categories).unwrap_or_else(|e| {
            tracing::warn!(podcast_id = self.id, error = %e, "Unreadable categories column");
            Vec::new()
        });

        Podcast {
            id: self.id,
            title: self.title,
            categories,
            link: self.link,
            description: self.description,
            subtitle: self.subtitle,
            owner: Owner {
                name: self.owner_name,
                email: self.owner_email,
            },
            author: self.author,
            image: self.image,
            feed_url: self.feed_url,
            slug: self.slug,
            updated: self.updated,
        }
    }
}

// ============================================================================
// Episodes
// ============================================================================

/// A stored episode. Episodes are immutable once written.
#[derive(Debug, Clone, PartialEq)]
pub struct Episode {
    pub id: i64,
    pub podcast_id: i64,
    pub podcast_slug: String,
    pub podcast_title: String,
    pub podcast_image: String,
    /// Unique within the owning podcast
    pub guid: String,
    pub title: String,
    /// Unix seconds
    pub published: i64,
    pub duration: String,
    pub summary: String,
    pub subtitle: String,
    pub description: String,
    pub image: String,
    pub content: String,
    pub enclosure: Enclosure,
    /// Unique within the owning podcast only
    pub slug: String,
}

/// An episode about to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEpisode {
    pub podcast_id: i64,
    pub podcast_slug: String,
    pub podcast_title: String,
    pub podcast_image: String,
    pub guid: String,
    pub title: String,
    pub published: i64,
    pub duration: String,
    pub summary: String,
    pub subtitle: String,
    pub description: String,
    pub image: String,
    pub content: String,
    pub enclosure: Enclosure,
    pub slug: String,
}

/// GUIDs and slugs of the episodes stored for one podcast.
#[derive(Debug, Clone, Default)]
pub struct EpisodeKeys {
    pub guids: HashSet<String>,
    pub slugs: HashSet<String>,
}

/// Row type for episode queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EpisodeRow {
    pub id: i64,
    pub podcast_id: i64,
    pub podcast_slug: String,
    pub podcast_title: String,
    pub podcast_image: String,
    pub guid: String,
    pub title: String,
    pub published: i64,
    pub duration: String,
    pub summary: String,
    pub subtitle: String,
    pub description: String,
    pub image: String,
    pub content: String,
    pub enclosure_size: String,
    pub enclosure_type: String,
    pub enclosure_url: String,
    pub slug: String,
}

impl EpisodeRow {
    pub(crate) fn into_episode(self) -> Episode {
        Episode {
            id: self.id,
            podcast_id: self.podcast_id,
            podcast_slug: self.podcast_slug,
            podcast_title: self.podcast_title,
            podcast_image: self.podcast_image,
            guid: self.guid,
            title: self.title,
            published: self.published,
            duration: self.duration,
            summary: self.summary,
            subtitle: self.subtitle,
            description: self.description,
            image: self.image,
            content: self.content,
            enclosure: Enclosure {
                size: self.enclosure_size,
                mime_type: self.enclosure_type,
                url: self.enclosure_url,
            },
            slug: self.slug,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn stored() -> Podcast {
        Podcast {
            id: 7,
            title: "My Show".into(),
            categories: vec!["Tech".into()],
            link: "https://a.example".into(),
            description: "About things".into(),
            subtitle: "Sub".into(),
            owner: Owner::default(),
            author: "Ann".into(),
            image: "https://a.example/cover.jpg".into(),
            feed_url: "https://a.example/feed.xml".into(),
            slug: "my-show".into(),
            updated: 1_700_000_000,
        }
    }

    fn fresh_from(podcast: &Podcast) -> NewPodcast {
        NewPodcast {
            title: podcast.title.clone(),
            categories: podcast.categories.clone(),
            link: podcast.link.clone(),
            description: podcast.description.clone(),
            subtitle: podcast.subtitle.clone(),
            owner: podcast.owner.clone(),
            author: podcast.author.clone(),
            image: podcast.image.clone(),
            feed_url: podcast.feed_url.clone(),
            slug: podcast.slug.clone(),
            updated: podcast.updated,
        }
    }

    #[test]
    fn test_diff_identical_is_empty() {
        let current = stored();
        let update = PodcastUpdate::diff(&current, &fresh_from(&current));
        assert!(update.is_empty());
    }

    #[test]
    fn test_diff_only_changed_fields() {
        let current = stored();
        let mut fresh = fresh_from(&current);
        fresh.description = "New description".into();
        fresh.categories.push("News".into());
        fresh.updated = 1_700_000_500;
        // Immutable fields are ignored even when the feed changes them
        fresh.title = "Renamed".into();

        let update = PodcastUpdate::diff(&current, &fresh);
        assert_eq!(
            update,
            PodcastUpdate {
                categories: Some(vec!["Tech".into(), "News".into()]),
                description: Some("New description".into()),
                updated: Some(1_700_000_500),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_lock_messages_detected() {
        assert!(is_lock_message("error returned from database: database is locked"));
        assert!(is_lock_message("(code: 14) unable to open database file"));
        assert!(!is_lock_message("UNIQUE constraint failed: podcasts.slug"));
    }
}
