//! Utility functions shared by the ingestion pipeline.
//!
//! - **Slugs**: URL-safe, collision-free identifiers derived from titles
//! - **URL validation**: scheme and host checks for input feed URLs
//!
//! # Examples
//!
//! ```
//! use std::collections::HashSet;
//! use podingest::util::{slugify, unique_slug};
//!
//! assert_eq!(slugify("My Show"), "my-show");
//!
//! let used: HashSet<String> = ["news".to_string()].into();
//! assert_eq!(unique_slug("News", &used), "newsx");
//! ```

mod slug;
mod url_validator;

pub use slug::{slugify, unique_slug};
pub use url_validator::{validate_url, HostPolicy, UrlValidationError};
