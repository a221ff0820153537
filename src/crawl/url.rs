// src/crawl/url.rs
// =============================================================================
// URL helpers for the crawl path.
//
// - normalize: removes dot segments ("./", "../", "/./", "/../") and drops the
//   fragment, following the remove_dot_segments steps of RFC 3986 section 5.2.4
// - resolve: turns an href into an absolute, normalized URL relative to the
//   page it was found on
// - domain_key: the host (plus explicit port) that identifies a node's domain
// - is_local_href: decides whether a link stays on this node or is forwarded
// =============================================================================

use url::Url;

// Schemes that never point at a crawlable page
const SKIPPED_SCHEMES: [&str; 4] = ["mailto:", "tel:", "javascript:", "data:"];

/// Normalizes the path of `url` and drops any fragment.
///
/// Works on absolute URLs ("http://host/a/../b") and on bare relative paths
/// ("a/./b"). The scheme, authority and query are left untouched.
///
/// Example:
///   normalize("http://a.org/x/./y/../z#top") -> "http://a.org/x/z"
pub fn normalize(url: &str) -> String {
    // Everything after '#' is dropped
    let url = url.split('#').next().unwrap_or_default();

    // Split off "scheme://authority" so only the path is rewritten
    let path_start = match url.find("://") {
        Some(scheme_end) => {
            let authority_start = scheme_end + 3;
            url[authority_start..]
                .find(['/', '?'])
                .map(|i| authority_start + i)
                .unwrap_or(url.len())
        }
        None => 0,
    };
    let query_start = url[path_start..]
        .find('?')
        .map(|i| path_start + i)
        .unwrap_or(url.len());

    let prefix = &url[..path_start];
    let path = &url[path_start..query_start];
    let query = &url[query_start..];

    format!("{}{}{}", prefix, remove_dot_segments(path), query)
}

fn remove_dot_segments(path: &str) -> String {
    let mut input = path.to_string();
    let mut output = String::with_capacity(path.len());

    while !input.is_empty() {
        if input.starts_with("../") {
            input.drain(..3);
        } else if input.starts_with("./") {
            input.drain(..2);
        } else if input.starts_with("/./") {
            input.replace_range(..3, "/");
        } else if input == "/." {
            input = "/".to_string();
        } else if input.starts_with("/../") {
            input.replace_range(..4, "/");
            pop_segment(&mut output);
        } else if input == "/.." {
            input = "/".to_string();
            pop_segment(&mut output);
        } else if input == "." || input == ".." {
            input.clear();
        } else {
            // Move the first segment (with its leading '/', if any) to output
            let skip = usize::from(input.starts_with('/'));
            let end = input[skip..]
                .find('/')
                .map(|i| i + skip)
                .unwrap_or(input.len());
            output.push_str(&input[..end]);
            input.drain(..end);
        }
    }

    output
}

// Removes the last segment and its preceding '/' from the output buffer
fn pop_segment(output: &mut String) {
    match output.rfind('/') {
        Some(i) => output.truncate(i),
        None => output.clear(),
    }
}

/// Resolves `href` against `base` into an absolute, normalized http(s) URL.
///
/// Returns None for non-web schemes (mailto:, javascript:, ...) and for
/// anything that does not parse.
///
/// Examples:
///   base = "http://a.org/docs/index.html"
///   href = "../about"      -> Some("http://a.org/about")
///   href = "#section"      -> Some("http://a.org/docs/index.html")
///   href = "mailto:x@a.org" -> None
pub fn resolve(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    let lowered = href.to_ascii_lowercase();
    if SKIPPED_SCHEMES.iter().any(|scheme| lowered.starts_with(scheme)) {
        return None;
    }

    let base = Url::parse(base).ok()?;
    let mut absolute = base.join(href).ok()?;

    if absolute.scheme() != "http" && absolute.scheme() != "https" {
        return None;
    }

    absolute.set_fragment(None);
    Some(normalize(absolute.as_str()))
}

/// The key that identifies which node owns a URL: its host, plus ":port" when
/// the URL names a non-default port.
///
/// Examples:
///   "http://www.a.org/x"       -> Some("www.a.org")
///   "http://127.0.0.1:8080/"   -> Some("127.0.0.1:8080")
pub fn domain_key(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;

    Some(match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Decides whether a link found on one of our pages is crawled by this node.
///
/// `href` is the raw attribute value, `resolved` the absolute URL it resolved
/// to and `home` this node's domain key. Relative links ("/x", "./x", "#x")
/// are always local. Protocol-relative links ("//host/x") are judged by the
/// host they resolve to.
pub fn is_local_href(href: &str, resolved: &str, home: &str) -> bool {
    let href = href.trim();
    let relative = (href.starts_with('/') && !href.starts_with("//"))
        || href.starts_with("./")
        || href.starts_with('#');

    relative || domain_key(resolved).as_deref() == Some(home)
}
