//! Internal-link extraction from a rendered or fetched page.

use scraper::{Html, Selector};
use url::Url;

/// Extract same-origin links with their anchor text. Drops `mailto:`,
/// `tel:`, fragment-only hrefs and anything outside the parish origin;
/// fragments are stripped so variants dedupe.
pub fn extract_links(html: &str, base: &Url) -> Vec<(Url, String)> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").expect("static selector");

    let mut out: Vec<(Url, String)> = Vec::new();
    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') {
            continue;
        }
        let lower = href.to_ascii_lowercase();
        if lower.starts_with("mailto:") || lower.starts_with("tel:") || lower.starts_with("javascript:") {
            continue;
        }
        let Ok(mut resolved) = base.join(href) else {
            continue;
        };
        if !matches!(resolved.scheme(), "http" | "https") {
            continue;
        }
        if resolved.host_str() != base.host_str() {
            continue;
        }
        resolved.set_fragment(None);
        let anchor = element.text().collect::<String>().trim().to_string();
        out.push((resolved, anchor));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r##"<html><body>
        <a href="/mass-times">Mass Times</a>
        <a href="about.html">About Us</a>
        <a href="https://p.example/events#june">Events</a>
        <a href="https://other.example/away">Elsewhere</a>
        <a href="mailto:office@p.example">Email</a>
        <a href="tel:+15551234">Call</a>
        <a href="#top">Top</a>
    </body></html>"##;

    #[test]
    fn keeps_internal_links_with_anchor_text() {
        let base = Url::parse("https://p.example/home/").unwrap();
        let links = extract_links(PAGE, &base);
        let urls: Vec<&str> = links.iter().map(|(u, _)| u.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://p.example/mass-times",
                "https://p.example/home/about.html",
                "https://p.example/events",
            ]
        );
        assert_eq!(links[0].1, "Mass Times");
    }

    #[test]
    fn strips_fragments_for_dedupe() {
        let base = Url::parse("https://p.example/").unwrap();
        let links = extract_links(PAGE, &base);
        assert!(links.iter().all(|(u, _)| u.fragment().is_none()));
    }

    #[test]
    fn offsite_and_non_http_links_are_dropped() {
        let base = Url::parse("https://p.example/").unwrap();
        let links = extract_links(PAGE, &base);
        assert!(links.iter().all(|(u, _)| u.host_str() == Some("p.example")));
        assert_eq!(links.len(), 3);
    }
}
