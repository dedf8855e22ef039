//! Thin helpers over `scraper` for the few HTML questions the pipeline asks.

use scraper::{ElementRef, Html, Node, Selector};

const HIDDEN_TAGS: &[&str] = &["script", "style", "noscript", "template"];

/// `href` of the first `<base>` element, if the page declares one.
pub fn base_href(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let selector = Selector::parse("base[href]").ok()?;
    doc.select(&selector)
        .filter_map(|el| el.value().attr("href"))
        .map(str::trim)
        .find(|href| !href.is_empty())
        .map(str::to_string)
}

/// Outer HTML of every element matching `css_selector`, in document order.
///
/// Returns `None` when the selector does not parse. An empty string means
/// the selector parsed but matched nothing.
pub fn select_region(html: &str, css_selector: &str) -> Option<String> {
    let selector = Selector::parse(css_selector).ok()?;
    let doc = Html::parse_document(html);
    let parts: Vec<String> = doc.select(&selector).map(|el| el.html()).collect();
    Some(parts.join("\n"))
}

/// Visible text of the page with whitespace runs collapsed.
pub fn visible_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let mut out = String::new();
    collect_text(doc.root_element(), &mut out);
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn collect_text(el: ElementRef, out: &mut String) {
    if HIDDEN_TAGS.contains(&el.value().name()) {
        return;
    }
    for child in el.children() {
        match child.value() {
            Node::Text(text) => {
                out.push_str(text);
                out.push(' ');
            }
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_text(child_el, out);
                }
            }
            _ => {}
        }
    }
}
