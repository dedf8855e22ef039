use url::Url;

use crate::html;

/// Base URL against which a page's relative document links resolve.
///
/// An absolute `<base href>` wins verbatim; a relative one is resolved against
/// the request URL. Without a `<base>` element the request URL's origin is used.
/// Never fails: an unparseable request URL is returned as-is.
pub fn resolve_base_url(page_html: &str, request_url: &str) -> String {
    let request = Url::parse(request_url).ok();

    if let Some(href) = html::base_href(page_html) {
        if Url::parse(&href).is_ok() {
            return href;
        }
        if let Some(joined) = request.as_ref().and_then(|r| r.join(&href).ok()) {
            return joined.to_string();
        }
    }

    match request {
        Some(url) if url.has_host() => origin_of(&url),
        _ => request_url.to_string(),
    }
}

/// `scheme://host[:port]`. Schemes without a tuple origin (`file:` and
/// custom ones) serialize their origin as `null`, so build it by hand.
fn origin_of(url: &Url) -> String {
    let origin = url.origin();
    if origin.is_tuple() {
        return origin.ascii_serialization();
    }
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    }
}

/// Resolve a possibly-relative document URL against `base`.
///
/// Absolute URLs are returned untouched, so normalizing twice is a no-op.
/// `None` when the value is empty or cannot be made absolute.
pub fn normalize_url(raw: &str, base: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if Url::parse(raw).is_ok() {
        return Some(raw.to_string());
    }
    let base = Url::parse(base).ok()?;
    base.join(raw).ok().map(String::from)
}

/// URL of page `page` for a section template.
///
/// `{page}` is substituted when present; otherwise a `page` query parameter
/// is set on the template URL.
pub fn page_url(template: &str, page: u32) -> String {
    if template.contains("{page}") {
        return template.replace("{page}", &page.to_string());
    }
    match Url::parse(template) {
        Ok(mut url) => {
            let kept: Vec<(String, String)> = url
                .query_pairs()
                .filter(|(k, _)| k != "page")
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            url.query_pairs_mut()
                .clear()
                .extend_pairs(kept)
                .append_pair("page", &page.to_string());
            url.to_string()
        }
        Err(_) => {
            let sep = if template.contains('?') { '&' } else { '?' };
            format!("{}{}page={}", template, sep, page)
        }
    }
}
