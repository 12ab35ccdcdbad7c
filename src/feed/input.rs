use std::collections::HashSet;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::util::{validate_url, HostPolicy};

/// Maximum accepted size of the input list (16 MB).
const MAX_INPUT_SIZE: u64 = 16 * 1024 * 1024;

/// Errors that make the input list unusable. All of them abort the run.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("Failed to read feed list {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Feed list is not a JSON array of URL strings: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Feed list {path} is too large ({size} bytes, max {max} bytes)")]
    TooLarge { path: PathBuf, size: u64, max: u64 },
}

/// Reads a JSON array of feed URLs from disk.
///
/// Entries that are not valid http(s) URLs under `policy` are skipped with
/// a warning; repeated entries are dropped, keeping the first occurrence.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is larger than 16 MB, or is
/// not a JSON array of strings.
pub async fn load_feed_urls(path: &Path, policy: HostPolicy) -> Result<Vec<String>, InputError> {
    let io_error = |source| InputError::Io {
        path: path.to_path_buf(),
        source,
    };

    let size = tokio::fs::metadata(path).await.map_err(io_error)?.len();
    if size > MAX_INPUT_SIZE {
        return Err(InputError::TooLarge {
            path: path.to_path_buf(),
            size,
            max: MAX_INPUT_SIZE,
        });
    }

    let content = tokio::fs::read_to_string(path).await.map_err(io_error)?;
    parse_feed_urls(&content, policy)
}

/// Parses the JSON feed list content. See [`load_feed_urls`].
pub fn parse_feed_urls(content: &str, policy: HostPolicy) -> Result<Vec<String>, InputError> {
    let raw: Vec<String> = serde_json::from_str(content)?;

    let mut seen = HashSet::with_capacity(raw.len());
    let mut urls = Vec::with_capacity(raw.len());

    for entry in raw {
        let entry = entry.trim();
        if let Err(e) = validate_url(entry, policy) {
            tracing::warn!(url = %entry, error = %e, "Skipping invalid feed URL");
            continue;
        }
        if !seen.insert(entry.to_owned()) {
            tracing::debug!(url = %entry, "Skipping duplicate feed URL");
            continue;
        }
        urls.push(entry.to_owned());
    }

    Ok(urls)
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: HostPolicy = HostPolicy::PublicOnly;

    #[test]
    fn test_parse_plain_list() {
        let urls = parse_feed_urls(
            r#"["https://a.example/feed.xml", "https://b.example/rss"]"#,
            POLICY,
        )
        .unwrap();
        assert_eq!(urls, vec!["https://a.example/feed.xml", "https://b.example/rss"]);
    }

    #[test]
    fn test_empty_list() {
        assert!(parse_feed_urls("[]", POLICY).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_entries_skipped() {
        let urls = parse_feed_urls(
            r#"["not a url", "ftp://x.example/feed", "https://ok.example/feed", "http://10.0.0.1/feed"]"#,
            POLICY,
        )
        .unwrap();
        assert_eq!(urls, vec!["https://ok.example/feed"]);
    }

    #[test]
    fn test_duplicates_keep_first_occurrence() {
        let urls = parse_feed_urls(
            r#"["https://b.example/feed", "https://a.example/feed", " https://b.example/feed "]"#,
            POLICY,
        )
        .unwrap();
        assert_eq!(urls, vec!["https://b.example/feed", "https://a.example/feed"]);
    }

    #[test]
    fn test_malformed_json_is_error() {
        assert!(matches!(
            parse_feed_urls("{\"feeds\": []}", POLICY),
            Err(InputError::Json(_))
        ));
        assert!(matches!(
            parse_feed_urls("[1, 2, 3]", POLICY),
            Err(InputError::Json(_))
        ));
        assert!(parse_feed_urls("", POLICY).is_err());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = std::env::temp_dir().join("podingest_input_test_load");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("feeds.json");
        std::fs::write(&path, r#"["https://a.example/feed.xml"]"#).unwrap();

        let urls = load_feed_urls(&path, POLICY).await.unwrap();
        assert_eq!(urls, vec!["https://a.example/feed.xml"]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let path = Path::new("/tmp/podingest_test_nonexistent_feeds.json");
        let err = load_feed_urls(path, POLICY).await.unwrap_err();
        assert!(matches!(err, InputError::Io { .. }));
        assert!(err.to_string().contains("podingest_test_nonexistent_feeds.json"));
    }
}
