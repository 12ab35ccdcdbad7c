use std::collections::HashSet;

use url::form_urlencoded;

/// Derives a URL-safe slug from a title.
///
/// The title is lowercased, German umlauts and `ß` are transliterated
/// (`ä` -> `ae`, `ö` -> `oe`, `ü` -> `ue`, `ß` -> `ss`), everything outside
/// ASCII letters, digits, spaces and hyphens is dropped, runs of spaces become
/// a single hyphen and runs of hyphens are collapsed. The result is
/// percent-encoded so it can be used as a URL path segment as-is.
///
/// A title made only of punctuation yields an empty slug. That is not an
/// error; [`unique_slug`] still resolves collisions on it.
///
/// # Examples
///
/// ```
/// use podingest::util::slugify;
///
/// assert_eq!(slugify("My Show"), "my-show");
/// assert_eq!(slugify("Grüße aus Köln"), "gruesse-aus-koeln");
/// assert_eq!(slugify("Rock -- n' Roll!"), "rock-n-roll");
/// assert_eq!(slugify("!!!"), "");
/// ```
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());

    for c in title.to_lowercase().chars() {
        match c {
            'ä' => slug.push_str("ae"),
            'ö' => slug.push_str("oe"),
            'ü' => slug.push_str("ue"),
            'ß' => slug.push_str("ss"),
            // Spaces and hyphens both fold into one separator
            ' ' | '-' => {
                if !slug.ends_with('-') {
                    slug.push('-');
                }
            }
            c if c.is_ascii_alphanumeric() => slug.push(c),
            _ => {}
        }
    }

    form_urlencoded::byte_serialize(slug.as_bytes()).collect()
}

/// Derives a slug from `title` that is not contained in `used`.
///
/// On collision a literal `x` is appended and the candidate is slugified
/// again, so repeated collisions produce `title`, `titlex`, `titlexx`, ...
/// Every step grows the candidate by one character, which bounds the loop by
/// the number of colliding entries in `used`.
///
/// The caller owns `used` and is responsible for recording the returned slug.
pub fn unique_slug(title: &str, used: &HashSet<String>) -> String {
    let mut candidate = slugify(title);
    while used.contains(&candidate) {
        candidate.push('x');
        candidate = slugify(&candidate);
    }
    candidate
}
