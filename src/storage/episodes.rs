use anyhow::{Context, Result};
use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{Episode, EpisodeKeys, EpisodeRow, NewEpisode};

/// 17 bound columns * 50 rows stays under SQLite's default 999 parameter limit.
const INSERT_BATCH_SIZE: usize = 50;

impl Database {
    // ========================================================================
    // Episode Queries
    // ========================================================================

    /// Load the GUIDs and slugs of every episode stored for a podcast.
    pub async fn episode_keys(&self, podcast_slug: &str) -> Result<EpisodeKeys> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT guid, slug FROM episodes WHERE podcast_slug = ?")
                .bind(podcast_slug)
                .fetch_all(&self.pool)
                .await?;

        let mut keys = EpisodeKeys::default();
        for (guid, slug) in rows {
            keys.guids.insert(guid);
            keys.slugs.insert(slug);
        }
        Ok(keys)
    }

    /// Episodes of one podcast, newest first.
    pub async fn get_episodes_for_podcast(&self, podcast_id: i64) -> Result<Vec<Episode>> {
        let rows = sqlx::query_as::<_, EpisodeRow>(
            r#"
            SELECT id, podcast_id, podcast_slug, podcast_title, podcast_image, guid,
                   title, published, duration, summary, subtitle, description, image,
                   content, enclosure_size, enclosure_type, enclosure_url, slug
            FROM episodes
            WHERE podcast_id = ?
            ORDER BY published DESC, id
        "#,
        )
        .bind(podcast_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(EpisodeRow::into_episode).collect())
    }

    pub async fn count_episodes(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM episodes")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // ========================================================================
    // Episode Writes
    // ========================================================================

    /// Bulk insert episodes, returning how many rows were actually written.
    ///
    /// Runs in a single transaction: either every chunk lands or none does.
    /// Rows whose `(podcast_slug, guid)` already exists are skipped by the
    /// UNIQUE constraint rather than failing the batch, so the returned count
    /// can be lower than `episodes.len()`.
    pub async fn insert_episodes(&self, episodes: &[NewEpisode]) -> Result<usize> {
        if episodes.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted: usize = 0;

        for chunk in episodes.chunks(INSERT_BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT INTO episodes (podcast_id, podcast_slug, podcast_title, podcast_image, \
                 guid, title, published, duration, summary, subtitle, description, image, \
                 content, enclosure_size, enclosure_type, enclosure_url, slug) ",
            );

            builder.push_values(chunk, |mut b, episode| {
                b.push_bind(episode.podcast_id)
                    .push_bind(&episode.podcast_slug)
                    .push_bind(&episode.podcast_title)
                    .push_bind(&episode.podcast_image)
                    .push_bind(&episode.guid)
                    .push_bind(&episode.title)
                    .push_bind(episode.published)
                    .push_bind(&episode.duration)
                    .push_bind(&episode.summary)
                    .push_bind(&episode.subtitle)
                    .push_bind(&episode.description)
                    .push_bind(&episode.image)
                    .push_bind(&episode.content)
                    .push_bind(&episode.enclosure.size)
                    .push_bind(&episode.enclosure.mime_type)
                    .push_bind(&episode.enclosure.url)
                    .push_bind(&episode.slug);
            });

            builder.push(" ON CONFLICT(podcast_slug, guid) DO NOTHING");

            let result = builder
                .build()
                .execute(&mut *tx)
                .await
                .context("Failed to insert episode batch")?;
            inserted += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(inserted)
    }
}
