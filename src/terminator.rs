use crate::html;

pub const DEFAULT_MARKER: &str = "No Results Found";

/// True when the page's visible text carries the end-of-results marker.
pub fn has_no_results_marker(page_html: &str, marker: &str) -> bool {
    !marker.is_empty() && html::visible_text(page_html).contains(marker)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_marker_in_text() {
        let page = std::fs::read_to_string("tests/fixtures/listing_empty.html").unwrap();
        assert!(has_no_results_marker(&page, DEFAULT_MARKER));
    }

    #[test]
    fn ignores_marker_in_scripts() {
        let page = std::fs::read_to_string("tests/fixtures/listing_page1.html").unwrap();
        assert!(!has_no_results_marker(&page, DEFAULT_MARKER));
    }

    #[test]
    fn marker_spread_over_markup() {
        let page = "<div><span>No</span>\n  <span>Results Found</span></div>";
        assert!(has_no_results_marker(page, DEFAULT_MARKER));
        assert!(!has_no_results_marker(page, "no results found"));
        assert!(!has_no_results_marker(page, ""));
    }
}
