// src/checker/html.rs
// =============================================================================
// This module extracts links from HTML pages.
//
// We use the `scraper` crate which parses HTML into a DOM and supports CSS
// selectors for finding elements.
//
// Only the raw href values are returned. Resolving them against the page URL
// and deciding where they go is the crawl task's job.
// =============================================================================

use std::sync::OnceLock;

use scraper::{Html, Selector};

fn anchor_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    // "a[href]" is a constant, known-valid selector
    SELECTOR.get_or_init(|| Selector::parse("a[href]").expect("a[href] is a valid selector"))
}

// Returns the href attribute of every <a> tag, in document order
//
// Empty hrefs are skipped.
//
// Example:
//   html = "<a href='/docs'>Docs</a><a href='https://b.org'>B</a>"
//   result = ["/docs", "https://b.org"]
pub fn extract_hrefs(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);

    document
        .select(anchor_selector())
        .filter_map(|element| element.value().attr("href"))
        .map(str::trim)
        .filter(|href| !href.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_single_href() {
        let html = r#"<a href="https://www.rust-lang.org">Rust</a>"#;
        assert_eq!(extract_hrefs(html), vec!["https://www.rust-lang.org"]);
    }

    #[test]
    fn test_hrefs_are_returned_raw() {
        let html = r##"
            <a href="/docs">Docs</a>
            <a href="../about">About</a>
            <a href="#top">Top</a>
            <a href="mailto:test@example.com">Email</a>
        "##;
        assert_eq!(
            extract_hrefs(html),
            vec!["/docs", "../about", "#top", "mailto:test@example.com"]
        );
    }

    #[test]
    fn test_skip_anchors_without_href() {
        let html = r#"<a name="x">No link</a><a href="">Empty</a><a href=" /x ">X</a>"#;
        assert_eq!(extract_hrefs(html), vec!["/x"]);
    }
}
