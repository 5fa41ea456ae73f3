//! Parser strategy trait and the built-in platform parsers.

use scraper::{ElementRef, Html, Selector};
use url::Url;

use vitality_core::Result;

use crate::signals::PageSignals;

/// A parish extracted from a directory page. IDs are assigned at persist
/// time; this is raw page data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedParish {
    pub name: String,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub website_url: Option<String>,
    pub phone: Option<String>,
}

/// One parsing strategy. `can_handle` is a pure function of page signals;
/// `parse` never fetches.
pub trait ParishListParser: Send + Sync {
    fn name(&self) -> &'static str;
    fn can_handle(&self, signals: &PageSignals) -> bool;
    fn parse(&self, html: &str, base_url: &Url) -> Result<Vec<ParsedParish>>;
}

// ---------------------------------------------------------------------------
// Built-in strategies
// ---------------------------------------------------------------------------

/// eCatholic directory pages: card markup with name/address blocks.
pub struct EcatholicParser;

impl ParishListParser for EcatholicParser {
    fn name(&self) -> &'static str {
        "ecatholic"
    }

    fn can_handle(&self, signals: &PageSignals) -> bool {
        signals.any_asset_host_contains("ecatholic") || signals.generator_contains("ecatholic")
    }

    fn parse(&self, html: &str, base_url: &Url) -> Result<Vec<ParsedParish>> {
        let document = Html::parse_document(html);
        let card = Selector::parse(".parish, .parishCard, li.directory-item").expect("static");
        let name_sel = Selector::parse(".name, h3, h4").expect("static");
        let addr_sel = Selector::parse(".address, address").expect("static");
        let link_sel = Selector::parse("a[href]").expect("static");

        let mut out = Vec::new();
        for element in document.select(&card) {
            let Some(name) = first_text(&element, &name_sel) else {
                continue;
            };
            let mut parish = ParsedParish {
                name,
                ..ParsedParish::default()
            };
            if let Some(addr) = first_text(&element, &addr_sel) {
                apply_address(&mut parish, &addr);
            }
            parish.website_url = element
                .select(&link_sel)
                .filter_map(|a| a.value().attr("href"))
                .filter_map(|href| base_url.join(href).ok())
                .map(|u| u.to_string())
                .next();
            out.push(parish);
        }
        Ok(out)
    }
}

/// WordPress directories: article/list markup with linked headings.
pub struct WordpressParser;

impl ParishListParser for WordpressParser {
    fn name(&self) -> &'static str {
        "wordpress"
    }

    fn can_handle(&self, signals: &PageSignals) -> bool {
        signals.generator_contains("wordpress") || signals.any_asset_host_contains("wp-content")
    }

    fn parse(&self, html: &str, base_url: &Url) -> Result<Vec<ParsedParish>> {
        let document = Html::parse_document(html);
        let entry = Selector::parse("article, li.parish, .entry-content li").expect("static");
        let heading_link = Selector::parse("h1 a[href], h2 a[href], h3 a[href], a[href]")
            .expect("static");

        let mut out = Vec::new();
        for element in document.select(&entry) {
            let Some(link) = element.select(&heading_link).next() else {
                continue;
            };
            let name = link.text().collect::<String>().trim().to_string();
            if !looks_like_parish_name(&name) {
                continue;
            }
            out.push(ParsedParish {
                name,
                website_url: link
                    .value()
                    .attr("href")
                    .and_then(|href| base_url.join(href).ok())
                    .map(|u| u.to_string()),
                ..ParsedParish::default()
            });
        }
        Ok(out)
    }
}

/// Squarespace directories: content blocks with linked headings.
pub struct SquarespaceParser;

impl ParishListParser for SquarespaceParser {
    fn name(&self) -> &'static str {
        "squarespace"
    }

    fn can_handle(&self, signals: &PageSignals) -> bool {
        signals.any_asset_host_contains("squarespace") || signals.has_body_class("squarespace")
    }

    fn parse(&self, html: &str, base_url: &Url) -> Result<Vec<ParsedParish>> {
        let document = Html::parse_document(html);
        let block = Selector::parse(".sqs-block-content, .summary-item").expect("static");
        let link = Selector::parse("h2 a[href], h3 a[href], a.summary-title-link[href]")
            .expect("static");

        let mut out = Vec::new();
        for element in document.select(&block) {
            for anchor in element.select(&link) {
                let name = anchor.text().collect::<String>().trim().to_string();
                if !looks_like_parish_name(&name) {
                    continue;
                }
                out.push(ParsedParish {
                    name,
                    website_url: anchor
                        .value()
                        .attr("href")
                        .and_then(|href| base_url.join(href).ok())
                        .map(|u| u.to_string()),
                    ..ParsedParish::default()
                });
            }
        }
        Ok(out)
    }
}

/// Fallback: any link whose anchor text reads like a parish name.
pub struct GenericListParser;

impl ParishListParser for GenericListParser {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn can_handle(&self, _signals: &PageSignals) -> bool {
        true
    }

    fn parse(&self, html: &str, base_url: &Url) -> Result<Vec<ParsedParish>> {
        let document = Html::parse_document(html);
        let link = Selector::parse("a[href]").expect("static");

        let mut out = Vec::new();
        for anchor in document.select(&link) {
            let name = anchor.text().collect::<String>().trim().to_string();
            if !looks_like_parish_name(&name) {
                continue;
            }
            let website_url = anchor
                .value()
                .attr("href")
                .and_then(|href| base_url.join(href).ok())
                .filter(|u| matches!(u.scheme(), "http" | "https"))
                .map(|u| u.to_string());
            out.push(ParsedParish {
                name,
                website_url,
                ..ParsedParish::default()
            });
        }
        Ok(out)
    }
}

fn looks_like_parish_name(name: &str) -> bool {
    if name.len() < 4 || name.len() > 120 {
        return false;
    }
    const MARKERS: [&str; 12] = [
        "st.", "st ", "saint", "our lady", "holy", "sacred", "blessed", "cathedral", "basilica",
        "parish", "church", "immaculate",
    ];
    let lower = name.to_ascii_lowercase();
    MARKERS.iter().any(|m| lower.contains(m))
}

fn first_text(element: &ElementRef, selector: &Selector) -> Option<String> {
    element
        .select(selector)
        .map(|e| e.text().collect::<String>().trim().to_string())
        .find(|t| !t.is_empty())
}

/// Split "123 Main St, Springfield, IL 62701" into address fields, leaving
/// whatever does not fit in `street`.
fn apply_address(parish: &mut ParsedParish, address: &str) {
    let parts: Vec<&str> = address.split(',').map(|p| p.trim()).collect();
    match parts.as_slice() {
        [street, city, state_zip, ..] => {
            parish.street = Some((*street).to_string());
            parish.city = Some((*city).to_string());
            let mut state_zip = state_zip.split_whitespace();
            parish.state = state_zip.next().map(|s| s.to_string());
            parish.postal_code = state_zip.next().map(|z| z.to_string());
        }
        [street, city] => {
            parish.street = Some((*street).to_string());
            parish.city = Some((*city).to_string());
        }
        [street] if !street.is_empty() => {
            parish.street = Some((*street).to_string());
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://diocese.example/parishes").unwrap()
    }

    #[test]
    fn generic_parser_picks_parish_looking_links() {
        let html = r#"<ul>
            <li><a href="/p/st-mary">St. Mary Parish</a></li>
            <li><a href="/p/holy-cross">Holy Cross</a></li>
            <li><a href="/contact">Contact Us</a></li>
        </ul>"#;
        let parishes = GenericListParser.parse(html, &base()).unwrap();
        assert_eq!(parishes.len(), 2);
        assert_eq!(parishes[0].name, "St. Mary Parish");
        assert_eq!(
            parishes[0].website_url.as_deref(),
            Some("https://diocese.example/p/st-mary")
        );
    }

    #[test]
    fn ecatholic_parser_reads_cards_with_addresses() {
        let html = r#"<div>
          <div class="parish">
            <h3 class="name">Sacred Heart</h3>
            <div class="address">12 Oak Ave, Springfield, IL 62701</div>
            <a href="https://sacredheart.example">site</a>
          </div>
        </div>"#;
        let parishes = EcatholicParser.parse(html, &base()).unwrap();
        assert_eq!(parishes.len(), 1);
        let parish = &parishes[0];
        assert_eq!(parish.name, "Sacred Heart");
        assert_eq!(parish.street.as_deref(), Some("12 Oak Ave"));
        assert_eq!(parish.city.as_deref(), Some("Springfield"));
        assert_eq!(parish.state.as_deref(), Some("IL"));
        assert_eq!(parish.postal_code.as_deref(), Some("62701"));
    }

    #[test]
    fn wordpress_parser_requires_parish_names() {
        let html = r#"<article><h2><a href="/blog/post">Weekly Update</a></h2></article>
                      <article><h2><a href="/p/st-ann">St. Ann Church</a></h2></article>"#;
        let parishes = WordpressParser.parse(html, &base()).unwrap();
        assert_eq!(parishes.len(), 1);
        assert_eq!(parishes[0].name, "St. Ann Church");
    }

    #[test]
    fn name_heuristic_bounds() {
        assert!(looks_like_parish_name("St. Jude"));
        assert!(looks_like_parish_name("Cathedral of the Assumption"));
        assert!(!looks_like_parish_name("Map"));
        assert!(!looks_like_parish_name("Read more"));
    }
}
