use anyhow::{Context, Result};
use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{NewPodcast, Podcast, PodcastKeys, PodcastRow, PodcastUpdate};

const PODCAST_COLUMNS: &str = "id, title, categories, link, description, subtitle, \
     owner_name, owner_email, author, image, feed_url, slug, updated";

impl Database {
    // ========================================================================
    // Podcast Queries
    // ========================================================================

    /// Load the feed URL and slug of every stored podcast.
    pub async fn podcast_keys(&self) -> Result<PodcastKeys> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT feed_url, slug FROM podcasts")
            .fetch_all(&self.pool)
            .await?;

        let mut keys = PodcastKeys::default();
        for (feed_url, slug) in rows {
            keys.feed_urls.insert(feed_url);
            keys.slugs.insert(slug);
        }
        Ok(keys)
    }

    /// Find the podcast stored for a canonical feed URL.
    pub async fn find_podcast_by_feed_url(&self, feed_url: &str) -> Result<Option<Podcast>> {
        let row = sqlx::query_as::<_, PodcastRow>(&format!(
            "SELECT {PODCAST_COLUMNS} FROM podcasts WHERE feed_url = ?"
        ))
        .bind(feed_url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(PodcastRow::into_podcast))
    }

    /// Find a podcast by its slug.
    pub async fn find_podcast_by_slug(&self, slug: &str) -> Result<Option<Podcast>> {
        let row = sqlx::query_as::<_, PodcastRow>(&format!(
            "SELECT {PODCAST_COLUMNS} FROM podcasts WHERE slug = ?"
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(PodcastRow::into_podcast))
    }

    /// All podcasts in insertion order.
    pub async fn get_podcasts(&self) -> Result<Vec<Podcast>> {
        let rows = sqlx::query_as::<_, PodcastRow>(&format!(
            "SELECT {PODCAST_COLUMNS} FROM podcasts ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PodcastRow::into_podcast).collect())
    }

    pub async fn count_podcasts(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM podcasts")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // ========================================================================
    // Podcast Writes
    // ========================================================================

    /// Insert a podcast and return its id.
    ///
    /// Fails with a UNIQUE constraint error when the feed URL or slug is
    /// already taken.
    pub async fn insert_podcast(&self, podcast: &NewPodcast) -> Result<i64> {
        let categories = serde_json::to_string(&podcast.categories)?;

        let result = sqlx::query(
            r#"
            INSERT INTO podcasts (
                title, categories, link, description, subtitle, owner_name,
                owner_email, author, image, feed_url, slug, updated
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(&podcast.title)
        .bind(categories)
        .bind(&podcast.link)
        .bind(&podcast.description)
        .bind(&podcast.subtitle)
        .bind(&podcast.owner.name)
        .bind(&podcast.owner.email)
        .bind(&podcast.author)
        .bind(&podcast.image)
        .bind(&podcast.feed_url)
        .bind(&podcast.slug)
        .bind(podcast.updated)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert podcast {}", podcast.feed_url))?;

        Ok(result.last_insert_rowid())
    }

    /// Apply a partial update to one podcast.
    ///
    /// Returns `false` without touching the database when the update carries
    /// no fields, or when no podcast has the given id.
    pub async fn update_podcast(&self, podcast_id: i64, update: &PodcastUpdate) -> Result<bool> {
        if update.is_empty() {
            return Ok(false);
        }

        let categories = update
            .categories
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        // Build: UPDATE podcasts SET a = ?, b = ? WHERE id = ?
        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new("UPDATE podcasts SET ");
        let mut set = builder.separated(", ");
        if let Some(categories) = categories {
            set.push("categories = ").push_bind_unseparated(categories);
        }
        if let Some(link) = &update.link {
            set.push("link = ").push_bind_unseparated(link);
        }
        if let Some(description) = &update.description {
            set.push("description = ").push_bind_unseparated(description);
        }
        if let Some(subtitle) = &update.subtitle {
            set.push("subtitle = ").push_bind_unseparated(subtitle);
        }
        if let Some(author) = &update.author {
            set.push("author = ").push_bind_unseparated(author);
        }
        if let Some(image) = &update.image {
            set.push("image = ").push_bind_unseparated(image);
        }
        if let Some(updated) = update.updated {
            set.push("updated = ").push_bind_unseparated(updated);
        }
        builder.push(" WHERE id = ").push_bind(podcast_id);

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to update podcast {podcast_id}"))?;

        Ok(result.rows_affected() > 0)
    }
}
