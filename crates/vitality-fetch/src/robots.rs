//! robots.txt parsing and the per-origin robots cache.
//!
//! Standard robots semantics for our user-agent token: the most specific
//! matching group wins, longest path rule wins, `Crawl-delay` is honored as
//! a lower bound on the origin's base delay, `Sitemap:` hints are surfaced
//! to the frontier.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Parsed rules for one origin, reduced to the group that applies to us.
#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    /// `(allow, pattern)` in file order.
    rules: Vec<(bool, String)>,
    pub crawl_delay: Option<Duration>,
    pub sitemaps: Vec<String>,
}

impl RobotsRules {
    /// Permissive rules used when robots.txt is absent or unreadable.
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn parse(content: &str, user_agent_token: &str) -> Self {
        struct Group {
            agents: Vec<String>,
            rules: Vec<(bool, String)>,
            crawl_delay: Option<Duration>,
        }

        let mut groups: Vec<Group> = Vec::new();
        let mut sitemaps = Vec::new();
        let mut in_agent_run = false;

        for raw in content.lines() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let directive = directive.trim().to_ascii_lowercase();
            let value = value.trim();

            match directive.as_str() {
                "user-agent" => {
                    if !in_agent_run {
                        groups.push(Group {
                            agents: Vec::new(),
                            rules: Vec::new(),
                            crawl_delay: None,
                        });
                        in_agent_run = true;
                    }
                    if let Some(group) = groups.last_mut() {
                        group.agents.push(value.to_ascii_lowercase());
                    }
                }
                "allow" | "disallow" => {
                    in_agent_run = false;
                    if let Some(group) = groups.last_mut() {
                        if !value.is_empty() {
                            group.rules.push((directive == "allow", value.to_string()));
                        }
                    }
                }
                "crawl-delay" => {
                    in_agent_run = false;
                    if let Some(group) = groups.last_mut() {
                        if let Ok(secs) = value.parse::<f64>() {
                            if secs > 0.0 {
                                group.crawl_delay = Some(Duration::from_secs_f64(secs));
                            }
                        }
                    }
                }
                "sitemap" => {
                    if !value.is_empty() {
                        sitemaps.push(value.to_string());
                    }
                }
                _ => in_agent_run = false,
            }
        }

        // Most specific agent match wins; "*" is the fallback.
        let token = user_agent_token.to_ascii_lowercase();
        let mut best: Option<(usize, &Group)> = None;
        for group in &groups {
            for agent in &group.agents {
                let specificity = if agent == "*" {
                    Some(0)
                } else if token.contains(agent.as_str()) {
                    Some(agent.len())
                } else {
                    None
                };
                if let Some(s) = specificity {
                    if best.map(|(b, _)| s > b).unwrap_or(true) {
                        best = Some((s, group));
                    }
                }
            }
        }

        match best {
            Some((_, group)) => Self {
                rules: group.rules.clone(),
                crawl_delay: group.crawl_delay,
                sitemaps,
            },
            None => Self {
                rules: Vec::new(),
                crawl_delay: None,
                sitemaps,
            },
        }
    }

    /// Longest matching pattern decides; no match means allowed.
    pub fn is_allowed(&self, path: &str) -> bool {
        let mut decision = true;
        let mut best_len = 0usize;
        for (allow, pattern) in &self.rules {
            if pattern_matches(pattern, path) && pattern.len() >= best_len {
                // On equal length prefer Allow, per common robots practice.
                if pattern.len() > best_len || *allow {
                    decision = *allow;
                }
                best_len = pattern.len();
            }
        }
        decision
    }
}

/// Prefix matching with `*` wildcards and a `$` end anchor.
fn pattern_matches(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };
    let mut remaining = path;
    let mut first = true;
    for segment in pattern.split('*') {
        if segment.is_empty() {
            first = false;
            continue;
        }
        match if first {
            remaining.starts_with(segment).then_some(0)
        } else {
            remaining.find(segment)
        } {
            Some(idx) => remaining = &remaining[idx + segment.len()..],
            None => return false,
        }
        first = false;
    }
    if anchored {
        // A trailing `*` already consumed the tail.
        pattern.ends_with('*') || remaining.is_empty()
    } else {
        true
    }
}

struct CachedRobots {
    rules: Arc<RobotsRules>,
    fetched_at: Instant,
}

/// Per-origin robots cache with a TTL (default 24h).
pub struct RobotsCache {
    ttl: Duration,
    map: RwLock<HashMap<String, CachedRobots>>,
}

impl RobotsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            map: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, origin: &str) -> Option<Arc<RobotsRules>> {
        let map = self.map.read().unwrap();
        map.get(origin).and_then(|cached| {
            (cached.fetched_at.elapsed() < self.ttl).then(|| cached.rules.clone())
        })
    }

    pub fn insert(&self, origin: &str, rules: RobotsRules) -> Arc<RobotsRules> {
        let rules = Arc::new(rules);
        self.map.write().unwrap().insert(
            origin.to_string(),
            CachedRobots {
                rules: rules.clone(),
                fetched_at: Instant::now(),
            },
        );
        rules
    }
}
