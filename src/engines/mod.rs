pub mod qdrant;
pub mod sqlite;

pub use qdrant::{BackendUnreachable, QdrantMessageEngine};
pub use sqlite::SqliteMessageEngine;

/// Maximum length of the stored display snippet, in characters.
pub const SNIPPET_CHARS: usize = 300;

/// Builds the display snippet stored alongside a vector: at most
/// [`SNIPPET_CHARS`] characters, ellipsis-suffixed when truncated. This is
/// independent of the (longer) truncation applied before embedding.
pub(crate) fn make_snippet(content: &str) -> String {
    match content.char_indices().nth(SNIPPET_CHARS) {
        Some((idx, _)) => format!("{}...", &content[..idx]),
        None => content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_content_is_kept_verbatim() {
        assert_eq!(make_snippet("hello"), "hello");
    }

    #[test]
    fn long_content_gets_ellipsis() {
        let content = "x".repeat(SNIPPET_CHARS + 10);
        let snippet = make_snippet(&content);
        assert_eq!(snippet.chars().count(), SNIPPET_CHARS + 3);
        assert!(snippet.ends_with("..."));
    }

    #[test]
    fn exact_length_content_is_not_truncated() {
        let content = "y".repeat(SNIPPET_CHARS);
        assert_eq!(make_snippet(&content), content);
    }
}
