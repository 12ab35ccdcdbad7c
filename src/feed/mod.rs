//! Feed input, fetching and parsing.
//!
//! - [`input`] - Load the JSON list of feed URLs to ingest
//! - [`fetcher`] - Fetch one feed over HTTP under a timeout and size limit
//! - [`parser`] - Turn RSS (with iTunes metadata) or Atom/JSON Feed bytes
//!   into a [`ParsedFeed`]
//!
//! # Example
//!
//! ```ignore
//! use podingest::feed::{fetch_feed, load_feed_urls, FetchSettings};
//!
//! let urls = load_feed_urls(path, HostPolicy::PublicOnly).await?;
//! let feed = fetch_feed(&client, &urls[0], &FetchSettings::default()).await?;
//! ```

mod fetcher;
mod input;
mod parser;

pub use fetcher::{
    build_client, fetch_feed, FetchError, FetchErrorKind, FetchSettings, DEFAULT_MAX_FEED_SIZE,
};
pub use input::{load_feed_urls, parse_feed_urls, InputError};
pub use parser::{parse_feed, ChannelExtension, ItemExtension, ParsedFeed, ParsedItem};
