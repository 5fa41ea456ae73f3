//! Per-origin fetch policy resolved through an ordered rule table:
//! exact host first, then domain suffix, then the default.

use std::time::Duration;

/// Rate, concurrency and pacing limits for one origin.
#[derive(Debug, Clone, Copy)]
pub struct OriginPolicy {
    pub rate_per_sec: f32,
    pub burst: u32,
    pub max_concurrency: usize,
    pub base_delay: Duration,
}

impl Default for OriginPolicy {
    fn default() -> Self {
        Self {
            rate_per_sec: 2.0,
            burst: 3,
            max_concurrency: 2,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl OriginPolicy {
    /// Platforms known to block aggressive crawlers get one request at a
    /// time at a lower rate.
    pub fn strict() -> Self {
        Self {
            rate_per_sec: 1.5,
            burst: 2,
            max_concurrency: 1,
            base_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub enum PolicyRule {
    Exact(String),
    Suffix(String),
}

impl PolicyRule {
    fn matches(&self, host: &str) -> bool {
        match self {
            PolicyRule::Exact(h) => host.eq_ignore_ascii_case(h),
            PolicyRule::Suffix(s) => {
                let host = host.to_ascii_lowercase();
                let s = s.to_ascii_lowercase();
                host == s || host.ends_with(&format!(".{s}"))
            }
        }
    }
}

/// Ordered policy rules; the first matching rule wins, exact rules are
/// checked before suffix rules regardless of insertion order.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    exact: Vec<(PolicyRule, OriginPolicy)>,
    suffix: Vec<(PolicyRule, OriginPolicy)>,
    default: OriginPolicy,
}

impl Default for PolicyTable {
    fn default() -> Self {
        let mut table = Self::new(OriginPolicy::default());
        for platform in ["squarespace.com", "wixsite.com", "weebly.com"] {
            table.push(PolicyRule::Suffix(platform.to_string()), OriginPolicy::strict());
        }
        table
    }
}

impl PolicyTable {
    pub fn new(default: OriginPolicy) -> Self {
        Self {
            exact: Vec::new(),
            suffix: Vec::new(),
            default,
        }
    }

    pub fn push(&mut self, rule: PolicyRule, policy: OriginPolicy) {
        match rule {
            PolicyRule::Exact(_) => self.exact.push((rule, policy)),
            PolicyRule::Suffix(_) => self.suffix.push((rule, policy)),
        }
    }

    pub fn resolve(&self, host: &str) -> OriginPolicy {
        for (rule, policy) in self.exact.iter().chain(self.suffix.iter()) {
            if rule.matches(host) {
                return *policy;
            }
        }
        self.default
    }
}
