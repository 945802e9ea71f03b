//! URL helpers for scope handling and cache busting.

/// Append the cache-bust query parameter to a URL.
///
/// Uses `?` when the URL has no query string, `&` otherwise.
pub fn cache_bust(url: &str, nonce: &str) -> String {
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{url}{sep}{}={nonce}", crate::CACHE_BUST_PARAM)
}

/// Resolve a request URL to a path relative to the worker's scope origin.
///
/// Path-absolute URLs are in scope by definition. Absolute URLs are in scope
/// only when they start with `scope_origin`; anything else (another origin)
/// is not ours to handle.
pub fn scope_relative<'a>(url: &'a str, scope_origin: &str) -> Option<&'a str> {
    if url.starts_with('/') {
        return Some(url);
    }
    if scope_origin.is_empty() {
        return None;
    }
    let rest = url.strip_prefix(scope_origin)?;
    if rest.is_empty() {
        Some("/")
    } else if rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

/// Strip the query string (and fragment) from a URL path.
pub fn path_only(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

/// Whether the scope origin refers to a localhost development server.
pub fn is_localhost_scope(scope_origin: &str) -> bool {
    let host = scope_origin
        .strip_prefix("http://")
        .or_else(|| scope_origin.strip_prefix("https://"))
        .unwrap_or(scope_origin);
    let host = host.split([':', '/']).next().unwrap_or("");
    host == "localhost" || host == "127.0.0.1" || host == "[::1]"
}
