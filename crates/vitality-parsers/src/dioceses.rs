//! Diocese registry parsing: the national index page listing every diocese
//! with a link to its website.

use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// One diocese entry lifted from the registry page.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryDiocese {
    pub name: String,
    pub website_url: String,
}

const NAME_MARKERS: [&str; 4] = ["archdiocese of", "diocese of", "eparchy of", "ordinariate"];

/// Collect diocese links from a registry page. A qualifying link has a
/// diocese-shaped anchor text and points off the registry's own host (links
/// back into the registry are detail pages, not diocese sites). One entry
/// per diocese host.
pub fn parse_diocese_registry(html: &str, base: &Url) -> Vec<RegistryDiocese> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").expect("static selector");

    let mut seen_hosts: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for anchor in document.select(&selector) {
        let name = anchor
            .text()
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        let lower = name.to_ascii_lowercase();
        if !NAME_MARKERS.iter().any(|m| lower.contains(m)) {
            continue;
        }
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Ok(url) = base.join(href.trim()) else {
            continue;
        };
        if !matches!(url.scheme(), "http" | "https") {
            continue;
        }
        let Some(host) = url.host_str() else { continue };
        if url.host_str() == base.host_str() {
            continue;
        }
        if seen_hosts.insert(host.to_ascii_lowercase()) {
            out.push(RegistryDiocese {
                name,
                website_url: url.to_string(),
            });
        }
    }
    out
}
