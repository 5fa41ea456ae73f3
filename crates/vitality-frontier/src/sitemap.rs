//! Sitemap fetching targets and XML parsing.

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use vitality_core::{PipelineError, Result};

/// Well-known sitemap locations, probed in order.
pub const SITEMAP_CANDIDATES: [&str; 7] = [
    "/sitemap.xml",
    "/sitemap_index.xml",
    "/sitemaps.xml",
    "/sitemap/sitemap.xml",
    "/wp-sitemap.xml",
    "/site-map.xml",
    "/sitemap1.xml",
];

/// A parsed sitemap: either page URLs or nested sitemap references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SitemapDocument {
    UrlSet(Vec<String>),
    Index(Vec<String>),
}

/// Parse a sitemap or sitemap-index document, collecting `<loc>` entries.
pub fn parse_sitemap(xml: &str) -> Result<SitemapDocument> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();

    let mut is_index = false;
    let mut saw_root = false;
    let mut in_loc = false;
    let mut locs: Vec<String> = Vec::new();

    loop {
        buf.clear();
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                let name = name.as_ref();
                if !saw_root {
                    saw_root = true;
                    match name {
                        b"sitemapindex" => is_index = true,
                        b"urlset" => is_index = false,
                        _ => {
                            return Err(PipelineError::InvalidOutput(format!(
                                "unexpected sitemap root element: {}",
                                String::from_utf8_lossy(name)
                            )))
                        }
                    }
                } else if name == b"loc" {
                    in_loc = true;
                }
            }
            Ok(Event::Text(t)) if in_loc => {
                if let Ok(text) = t.unescape() {
                    let text = text.trim().to_string();
                    if !text.is_empty() {
                        locs.push(text);
                    }
                }
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"loc" {
                    in_loc = false;
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(PipelineError::InvalidOutput(format!(
                    "sitemap parse error: {e}"
                )))
            }
        }
    }

    if !saw_root {
        return Err(PipelineError::InvalidOutput(
            "document has no sitemap root".to_string(),
        ));
    }
    Ok(if is_index {
        SitemapDocument::Index(locs)
    } else {
        SitemapDocument::UrlSet(locs)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_urlset() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>https://p.example/mass-times</loc><lastmod>2024-01-01</lastmod></url>
  <url><loc>https://p.example/events</loc></url>
</urlset>"#;
        assert_eq!(
            parse_sitemap(xml).unwrap(),
            SitemapDocument::UrlSet(vec![
                "https://p.example/mass-times".to_string(),
                "https://p.example/events".to_string(),
            ])
        );
    }

    #[test]
    fn parses_a_sitemap_index() {
        let xml = r#"<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap><loc>https://p.example/sitemap-pages.xml</loc></sitemap>
  <sitemap><loc>https://p.example/sitemap-posts.xml</loc></sitemap>
</sitemapindex>"#;
        assert_eq!(
            parse_sitemap(xml).unwrap(),
            SitemapDocument::Index(vec![
                "https://p.example/sitemap-pages.xml".to_string(),
                "https://p.example/sitemap-posts.xml".to_string(),
            ])
        );
    }

    #[test]
    fn entities_are_unescaped() {
        let xml = r#"<urlset><url><loc>https://p.example/a&amp;b</loc></url></urlset>"#;
        assert_eq!(
            parse_sitemap(xml).unwrap(),
            SitemapDocument::UrlSet(vec!["https://p.example/a&b".to_string()])
        );
    }

    #[test]
    fn html_error_pages_are_rejected() {
        let html = "<html><body>404 not found</body></html>";
        assert!(parse_sitemap(html).is_err());
        assert!(parse_sitemap("").is_err());
    }
}
