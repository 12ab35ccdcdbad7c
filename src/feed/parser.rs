use anyhow::{anyhow, Result};
use chrono::DateTime;
use sha2::{Digest, Sha256};

use crate::storage::{Enclosure, Owner};

/// A feed as delivered by the network, before reconciliation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFeed {
    pub title: String,
    /// The feed's own URL (`atom:link rel="self"`). The fetcher fills it with
    /// the request URL when the document does not declare one.
    pub self_link: Option<String>,
    pub link: String,
    pub description: String,
    pub categories: Vec<String>,
    /// Unix seconds
    pub published: Option<i64>,
    pub itunes: Option<ChannelExtension>,
    pub items: Vec<ParsedItem>,
}

impl ParsedFeed {
    /// Canonical key of the feed, or `None` when no non-empty self link is known.
    pub fn feed_url(&self) -> Option<&str> {
        self.self_link
            .as_deref()
            .map(str::trim)
            .filter(|link| !link.is_empty())
    }
}

/// Channel-level iTunes metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelExtension {
    pub owner: Option<Owner>,
    pub subtitle: String,
    pub author: String,
    pub image: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedItem {
    pub guid: String,
    pub title: String,
    /// Unix seconds
    pub published: Option<i64>,
    pub description: String,
    pub content: String,
    pub enclosures: Vec<Enclosure>,
    /// Items without an iTunes block are not ingested.
    pub itunes: Option<ItemExtension>,
}

/// Item-level iTunes metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemExtension {
    pub duration: String,
    pub summary: String,
    pub subtitle: String,
    pub image: String,
}

/// Parses RSS, falling back to Atom / JSON Feed.
///
/// RSS goes through the `rss` crate, which exposes the iTunes namespace.
/// Anything it rejects is handed to `feed-rs`; those formats have no iTunes
/// blocks, so their items are never ingested, but the podcast itself is.
pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed> {
    match rss::Channel::read_from(bytes) {
        Ok(channel) => Ok(from_rss(&channel)),
        Err(rss_err) => {
            let feed = feed_rs::parser::parse(bytes).map_err(|e| {
                anyhow!("not a valid RSS document ({rss_err}) nor Atom/JSON feed ({e})")
            })?;
            Ok(from_feed_rs(feed))
        }
    }
}

fn from_rss(channel: &rss::Channel) -> ParsedFeed {
    let self_link = channel
        .atom_ext()
        .and_then(|ext| ext.links().iter().find(|link| link.rel() == "self"))
        .map(|link| link.href().trim().to_owned())
        .filter(|href| !href.is_empty());

    let itunes = channel.itunes_ext().map(|ext| ChannelExtension {
        owner: ext.owner().map(|owner| Owner {
            name: text(owner.name()),
            email: text(owner.email()),
        }),
        subtitle: text(ext.subtitle()),
        author: text(ext.author()),
        image: text(ext.image()),
    });

    ParsedFeed {
        title: channel.title().trim().to_owned(),
        self_link,
        link: channel.link().trim().to_owned(),
        description: channel.description().trim().to_owned(),
        categories: channel
            .categories()
            .iter()
            .map(|c| c.name().trim().to_owned())
            .filter(|name| !name.is_empty())
            .collect(),
        published: channel
            .pub_date()
            .or(channel.last_build_date())
            .and_then(parse_date),
        itunes,
        items: channel.items().iter().map(item_from_rss).collect(),
    }
}

fn item_from_rss(item: &rss::Item) -> ParsedItem {
    let title = text(item.title());
    let published = item.pub_date().and_then(parse_date);
    let enclosures: Vec<Enclosure> = item
        .enclosure()
        .map(|e| Enclosure {
            size: e.length().trim().to_owned(),
            mime_type: e.mime_type().trim().to_owned(),
            url: e.url().trim().to_owned(),
        })
        .into_iter()
        .collect();

    let fallback_url = enclosures
        .first()
        .map(|e| e.url.as_str())
        .or(item.link());
    let guid = generate_guid(item.guid().map(|g| g.value()), fallback_url, &title, published);

    let itunes = item.itunes_ext().map(|ext| ItemExtension {
        duration: text(ext.duration()),
        summary: text(ext.summary()),
        subtitle: text(ext.subtitle()),
        image: text(ext.image()),
    });

    ParsedItem {
        guid,
        title,
        published,
        description: text(item.description()),
        content: text(item.content()),
        enclosures,
        itunes,
    }
}

fn from_feed_rs(feed: feed_rs::model::Feed) -> ParsedFeed {
    let self_link = feed
        .links
        .iter()
        .find(|link| link.rel.as_deref() == Some("self"))
        .map(|link| link.href.trim().to_owned())
        .filter(|href| !href.is_empty());
    let link = feed
        .links
        .iter()
        .find(|link| matches!(link.rel.as_deref(), None | Some("alternate")))
        .map(|link| link.href.trim().to_owned())
        .unwrap_or_default();

    let items = feed
        .entries
        .into_iter()
        .map(|entry| {
            let title = entry
                .title
                .map(|t| t.content.trim().to_owned())
                .unwrap_or_default();
            let published = entry.published.or(entry.updated).map(|dt| dt.timestamp());
            let enclosures: Vec<Enclosure> = entry
                .links
                .iter()
                .filter(|link| link.rel.as_deref() == Some("enclosure"))
                .map(|link| Enclosure {
                    size: link.length.map(|n| n.to_string()).unwrap_or_default(),
                    mime_type: link.media_type.clone().unwrap_or_default(),
                    url: link.href.clone(),
                })
                .collect();
            let fallback_url = enclosures
                .first()
                .map(|e| e.url.clone())
                .or_else(|| entry.links.first().map(|l| l.href.clone()));
            let guid = generate_guid(
                Some(entry.id.as_str()),
                fallback_url.as_deref(),
                &title,
                published,
            );

            ParsedItem {
                guid,
                title,
                published,
                description: entry.summary.map(|s| s.content).unwrap_or_default(),
                content: entry.content.and_then(|c| c.body).unwrap_or_default(),
                enclosures,
                itunes: None,
            }
        })
        .collect();

    ParsedFeed {
        title: feed
            .title
            .map(|t| t.content.trim().to_owned())
            .unwrap_or_default(),
        self_link,
        link,
        description: feed.description.map(|t| t.content).unwrap_or_default(),
        categories: feed.categories.into_iter().map(|c| c.term).collect(),
        published: feed.published.or(feed.updated).map(|dt| dt.timestamp()),
        itunes: None,
        items,
    }
}

fn text(value: Option<&str>) -> String {
    value.map(str::trim).unwrap_or_default().to_owned()
}

/// RFC 2822 (RSS) with an RFC 3339 fallback for feeds that use Atom-style dates.
fn parse_date(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|dt| dt.timestamp())
}

/// Uses the feed-supplied GUID when present, otherwise a stable hash of the
/// item's URL, title and publish date so re-fetches map to the same key.
fn generate_guid(
    existing: Option<&str>,
    url: Option<&str>,
    title: &str,
    published: Option<i64>,
) -> String {
    if let Some(guid) = existing {
        let trimmed = guid.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let input = format!(
        "{}|{}|{}",
        url.unwrap_or(""),
        title,
        published.map(|p| p.to_string()).unwrap_or_default()
    );
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PODCAST_RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"
     xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd"
     xmlns:atom="http://www.w3.org/2005/Atom">
<channel>
    <title>My Show</title>
    <link>https://a.example/</link>
    <description>Talk about things</description>
    <category>Technology</category>
    <category>News</category>
    <pubDate>Tue, 14 Nov 2023 22:13:20 GMT</pubDate>
    <atom:link href="https://a.example/feed.xml" rel="self" type="application/rss+xml"/>
    <itunes:author>Ann Example</itunes:author>
    <itunes:subtitle>Weekly chat</itunes:subtitle>
    <itunes:image href="https://a.example/cover.jpg"/>
    <itunes:owner>
        <itunes:name>Ann</itunes:name>
        <itunes:email>ann@a.example</itunes:email>
    </itunes:owner>
    <item>
        <guid>g1</guid>
        <title>Episode One</title>
        <pubDate>Wed, 15 Nov 2023 08:00:00 +0000</pubDate>
        <description>First</description>
        <enclosure url="https://a.example/1.mp3" length="1234" type="audio/mpeg"/>
        <itunes:duration>31:07</itunes:duration>
        <itunes:summary>Summary one</itunes:summary>
        <itunes:subtitle>Sub one</itunes:subtitle>
        <itunes:image href="https://a.example/1.jpg"/>
    </item>
    <item>
        <title>No Guid</title>
        <enclosure url="https://a.example/2.mp3" length="99" type="audio/mpeg"/>
    </item>
</channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
    <title>Atom Cast</title>
    <link href="https://b.example/"/>
    <link rel="self" href="https://b.example/atom.xml"/>
    <id>urn:uuid:60a76c80-d399-11d9-b93C-0003939e0af6</id>
    <updated>2023-11-14T22:13:20Z</updated>
    <entry>
        <title>Entry</title>
        <id>urn:uuid:1225c695-cfb8-4ebb-aaaa-80da344efa6a</id>
        <updated>2023-11-15T08:00:00Z</updated>
        <link rel="enclosure" href="https://b.example/e.mp3" type="audio/mpeg" length="42"/>
    </entry>
</feed>"#;

    #[test]
    fn test_parse_rss_channel_fields() {
        let feed = parse_feed(PODCAST_RSS.as_bytes()).unwrap();

        assert_eq!(feed.title, "My Show");
        assert_eq!(feed.self_link.as_deref(), Some("https://a.example/feed.xml"));
        assert_eq!(feed.feed_url(), Some("https://a.example/feed.xml"));
        assert_eq!(feed.link, "https://a.example/");
        assert_eq!(feed.categories, vec!["Technology", "News"]);
        assert_eq!(feed.published, Some(1_700_000_000));
        assert_eq!(
            feed.itunes,
            Some(ChannelExtension {
                owner: Some(Owner {
                    name: "Ann".into(),
                    email: "ann@a.example".into(),
                }),
                subtitle: "Weekly chat".into(),
                author: "Ann Example".into(),
                image: "https://a.example/cover.jpg".into(),
            })
        );
    }

    #[test]
    fn test_parse_rss_items() {
        let feed = parse_feed(PODCAST_RSS.as_bytes()).unwrap();
        assert_eq!(feed.items.len(), 2);

        let first = &feed.items[0];
        assert_eq!(first.guid, "g1");
        assert_eq!(first.title, "Episode One");
        assert_eq!(first.published, Some(1_700_035_200));
        assert_eq!(
            first.enclosures,
            vec![Enclosure {
                size: "1234".into(),
                mime_type: "audio/mpeg".into(),
                url: "https://a.example/1.mp3".into(),
            }]
        );
        assert_eq!(
            first.itunes,
            Some(ItemExtension {
                duration: "31:07".into(),
                summary: "Summary one".into(),
                subtitle: "Sub one".into(),
                image: "https://a.example/1.jpg".into(),
            })
        );

        let second = &feed.items[1];
        assert!(second.itunes.is_none());
        // Missing GUID is replaced by a 64-char SHA-256 hex digest
        assert_eq!(second.guid.len(), 64);
    }

    #[test]
    fn test_synthesized_guid_is_stable() {
        let a = parse_feed(PODCAST_RSS.as_bytes()).unwrap();
        let b = parse_feed(PODCAST_RSS.as_bytes()).unwrap();
        assert_eq!(a.items[1].guid, b.items[1].guid);
    }

    #[test]
    fn test_rss_without_self_link() {
        let xml = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Bare</title><link>https://c.example</link><description/></channel></rss>"#;
        let feed = parse_feed(xml.as_bytes()).unwrap();
        assert_eq!(feed.self_link, None);
        assert_eq!(feed.feed_url(), None);
        assert!(feed.itunes.is_none());
        assert!(feed.items.is_empty());
    }

    #[test]
    fn test_atom_fallback() {
        let feed = parse_feed(ATOM.as_bytes()).unwrap();

        assert_eq!(feed.title, "Atom Cast");
        assert_eq!(feed.self_link.as_deref(), Some("https://b.example/atom.xml"));
        assert_eq!(feed.link, "https://b.example/");
        assert_eq!(feed.published, Some(1_700_000_000));
        assert!(feed.itunes.is_none());

        assert_eq!(feed.items.len(), 1);
        let entry = &feed.items[0];
        assert_eq!(entry.guid, "urn:uuid:1225c695-cfb8-4ebb-aaaa-80da344efa6a");
        assert!(entry.itunes.is_none());
        assert_eq!(entry.enclosures[0].url, "https://b.example/e.mp3");
        assert_eq!(entry.enclosures[0].size, "42");
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(parse_feed(b"<not valid xml").is_err());
        assert!(parse_feed(b"").is_err());
    }

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(parse_date("Tue, 14 Nov 2023 22:13:20 GMT"), Some(1_700_000_000));
        assert_eq!(parse_date(" 2023-11-14T22:13:20Z "), Some(1_700_000_000));
        assert_eq!(parse_date("yesterday"), None);
    }
}
