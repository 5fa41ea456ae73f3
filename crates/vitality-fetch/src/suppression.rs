//! Suppression list: origins and URLs the fetcher must never touch.
//! Read-mostly; replaced atomically on refresh.

use std::collections::HashSet;
use std::sync::RwLock;
use url::Url;

use vitality_core::SuppressionUrl;

#[derive(Debug, Default)]
struct Entries {
    hosts: HashSet<String>,
    urls: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct SuppressionList {
    entries: RwLock<Entries>,
}

impl SuppressionList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole list. Entries that parse as URLs suppress that
    /// exact URL and, when they have no path, the whole host; bare strings
    /// suppress the host.
    pub fn reload(&self, rows: &[SuppressionUrl]) {
        let mut next = Entries::default();
        for row in rows {
            let value = row.url.trim();
            if value.is_empty() {
                continue;
            }
            match Url::parse(value) {
                Ok(parsed) => {
                    if parsed.path() == "/" || parsed.path().is_empty() {
                        if let Some(host) = parsed.host_str() {
                            next.hosts.insert(host.to_ascii_lowercase());
                        }
                    } else {
                        next.urls.insert(value.trim_end_matches('/').to_string());
                    }
                }
                Err(_) => {
                    next.hosts.insert(value.to_ascii_lowercase());
                }
            }
        }
        *self.entries.write().unwrap() = next;
    }

    pub fn is_suppressed(&self, url: &Url) -> bool {
        let entries = self.entries.read().unwrap();
        if let Some(host) = url.host_str() {
            if entries.hosts.contains(&host.to_ascii_lowercase()) {
                return true;
            }
        }
        entries
            .urls
            .contains(url.as_str().trim_end_matches('/'))
    }

    /// Host-level check used by the parish prioritizer.
    pub fn is_host_suppressed(&self, host: &str) -> bool {
        self.entries
            .read()
            .unwrap()
            .hosts
            .contains(&host.to_ascii_lowercase())
    }

    /// The suppressed hosts, for SQL-side filtering.
    pub fn hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.entries.read().unwrap().hosts.iter().cloned().collect();
        hosts.sort();
        hosts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn row(url: &str) -> SuppressionUrl {
        SuppressionUrl {
            url: url.to_string(),
            reason: None,
            added_at: Utc::now(),
        }
    }

    #[test]
    fn host_entries_suppress_every_url_on_the_host() {
        let list = SuppressionList::new();
        list.reload(&[row("https://bad.example")]);
        assert!(list.is_suppressed(&Url::parse("https://bad.example/any/page").unwrap()));
        assert!(!list.is_suppressed(&Url::parse("https://good.example/").unwrap()));
    }

    #[test]
    fn url_entries_suppress_only_that_url() {
        let list = SuppressionList::new();
        list.reload(&[row("https://mixed.example/private/report")]);
        assert!(list.is_suppressed(&Url::parse("https://mixed.example/private/report").unwrap()));
        assert!(!list.is_suppressed(&Url::parse("https://mixed.example/public").unwrap()));
    }

    #[test]
    fn bare_hostnames_are_accepted() {
        let list = SuppressionList::new();
        list.reload(&[row("legacy.example")]);
        assert!(list.is_host_suppressed("legacy.example"));
        assert!(list.is_host_suppressed("LEGACY.example"));
    }

    #[test]
    fn reload_replaces_previous_entries() {
        let list = SuppressionList::new();
        list.reload(&[row("https://old.example")]);
        list.reload(&[row("https://new.example")]);
        assert!(!list.is_host_suppressed("old.example"));
        assert!(list.is_host_suppressed("new.example"));
    }
}
