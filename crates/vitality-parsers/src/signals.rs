//! Platform detection signals, extracted once per directory page.

use scraper::{Html, Selector};
use url::Url;

/// What the directory page tells us about the platform serving it.
#[derive(Debug, Clone, Default)]
pub struct PageSignals {
    pub generator: Option<String>,
    pub script_hosts: Vec<String>,
    pub stylesheet_hosts: Vec<String>,
    pub body_classes: Vec<String>,
}

impl PageSignals {
    pub fn detect(html: &str) -> Self {
        let document = Html::parse_document(html);

        let meta_generator = Selector::parse(r#"meta[name="generator"]"#).expect("static selector");
        let generator = document
            .select(&meta_generator)
            .filter_map(|m| m.value().attr("content"))
            .next()
            .map(|g| g.to_string());

        let script = Selector::parse("script[src]").expect("static selector");
        let script_hosts = hosts_of(document.select(&script).filter_map(|s| s.value().attr("src")));

        let stylesheet =
            Selector::parse(r#"link[rel="stylesheet"][href]"#).expect("static selector");
        let stylesheet_hosts =
            hosts_of(document.select(&stylesheet).filter_map(|l| l.value().attr("href")));

        let body = Selector::parse("body").expect("static selector");
        let body_classes = document
            .select(&body)
            .filter_map(|b| b.value().attr("class"))
            .flat_map(|c| c.split_whitespace())
            .map(|c| c.to_ascii_lowercase())
            .collect();

        Self {
            generator,
            script_hosts,
            stylesheet_hosts,
            body_classes,
        }
    }

    pub fn generator_contains(&self, token: &str) -> bool {
        self.generator
            .as_deref()
            .map(|g| g.to_ascii_lowercase().contains(&token.to_ascii_lowercase()))
            .unwrap_or(false)
    }

    pub fn any_asset_host_contains(&self, token: &str) -> bool {
        let token = token.to_ascii_lowercase();
        self.script_hosts
            .iter()
            .chain(self.stylesheet_hosts.iter())
            .any(|h| h.contains(&token))
    }

    pub fn has_body_class(&self, class: &str) -> bool {
        let class = class.to_ascii_lowercase();
        self.body_classes.iter().any(|c| c.contains(&class))
    }
}

fn hosts_of<'a>(srcs: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut hosts: Vec<String> = srcs
        .filter_map(|src| Url::parse(src).ok())
        .filter_map(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        .collect();
    hosts.sort();
    hosts.dedup();
    hosts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_generator_scripts_and_body_classes() {
        let html = r#"<html><head>
            <meta name="generator" content="WordPress 6.4">
            <script src="https://assets.squarespace.com/universal.js"></script>
            <link rel="stylesheet" href="https://cdn.example.com/site.css">
        </head><body class="home page-directory">ok</body></html>"#;
        let signals = PageSignals::detect(html);
        assert!(signals.generator_contains("wordpress"));
        assert!(signals.any_asset_host_contains("squarespace"));
        assert!(signals.has_body_class("page-directory"));
        assert!(!signals.any_asset_host_contains("wix"));
    }

    #[test]
    fn relative_script_srcs_are_ignored_for_hosts() {
        let html = r#"<script src="/js/app.js"></script>"#;
        let signals = PageSignals::detect(html);
        assert!(signals.script_hosts.is_empty());
    }
}
