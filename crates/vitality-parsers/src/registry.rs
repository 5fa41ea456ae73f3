//! Ordered registry of parser strategies; first capable parser wins.

use tracing::debug;
use url::Url;

use vitality_core::Result;

use crate::signals::PageSignals;
use crate::strategies::{
    EcatholicParser, GenericListParser, ParishListParser, ParsedParish, SquarespaceParser,
    WordpressParser,
};

pub struct ParserRegistry {
    parsers: Vec<Box<dyn ParishListParser>>,
}

impl ParserRegistry {
    pub fn new(parsers: Vec<Box<dyn ParishListParser>>) -> Self {
        Self { parsers }
    }

    /// Detect page signals and parse with the first strategy that claims the
    /// page. Returns the winning strategy's name alongside the parishes.
    pub fn parse_directory(
        &self,
        html: &str,
        base_url: &Url,
    ) -> Result<(&'static str, Vec<ParsedParish>)> {
        let signals = PageSignals::detect(html);
        for parser in &self.parsers {
            if parser.can_handle(&signals) {
                debug!("directory {} handled by '{}' parser", base_url, parser.name());
                let parishes = parser.parse(html, base_url)?;
                return Ok((parser.name(), parishes));
            }
        }
        // default_registry always ends with the generic fallback.
        Ok(("generic", Vec::new()))
    }
}

/// Build the default registry: platform parsers first, generic fallback last.
pub fn default_registry() -> ParserRegistry {
    ParserRegistry::new(vec![
        Box::new(EcatholicParser),
        Box::new(WordpressParser),
        Box::new(SquarespaceParser),
        Box::new(GenericListParser),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://diocese.example/parishes").unwrap()
    }

    #[test]
    fn platform_parser_wins_over_generic() {
        let html = r#"<html><head>
            <script src="https://cdn.ecatholic.com/widgets.js"></script>
        </head><body>
            <div class="parish"><h3 class="name">St. Patrick</h3></div>
            <a href="/p/other">Holy Family Parish</a>
        </body></html>"#;
        let (name, parishes) = default_registry().parse_directory(html, &base()).unwrap();
        assert_eq!(name, "ecatholic");
        assert_eq!(parishes.len(), 1);
        assert_eq!(parishes[0].name, "St. Patrick");
    }

    #[test]
    fn unknown_platform_falls_back_to_generic() {
        let html = r#"<ul><li><a href="/p/a">St. Augustine Parish</a></li></ul>"#;
        let (name, parishes) = default_registry().parse_directory(html, &base()).unwrap();
        assert_eq!(name, "generic");
        assert_eq!(parishes.len(), 1);
    }

    #[test]
    fn registry_respects_insertion_order() {
        // A page with both WordPress and Squarespace markers goes to the
        // parser registered first.
        let html = r#"<html><head>
            <meta name="generator" content="WordPress 6.2">
            <script src="https://assets.squarespace.com/u.js"></script>
        </head><body><article><h2><a href="/p/x">St. Luke Parish</a></h2></article></body></html>"#;
        let (name, _) = default_registry().parse_directory(html, &base()).unwrap();
        assert_eq!(name, "wordpress");
    }
}
