//! Respectful fetch layer. Every outbound HTTP request in the pipeline goes
//! through [`RespectfulFetcher`]: suppression list, robots.txt, per-origin
//! rate limits and concurrency caps, jittered delays, circuit breakers,
//! blocking detection, adaptive timeouts and the visit ledger.

mod browser;
mod classify;
mod fetcher;
mod limiter;
mod policy;
mod robots;
mod suppression;
mod timing;

pub use browser::{BrowserFactory, BrowserPool, HeadlessBrowser, RemoteRenderer, RemoteRendererFactory};
pub use classify::{classify_response, ChallengeMarkers};
pub use fetcher::{FetchKind, FetchResult, FetcherConfig, RespectfulFetcher};
pub use limiter::OriginGates;
pub use policy::{OriginPolicy, PolicyRule, PolicyTable};
pub use robots::{RobotsCache, RobotsRules};
pub use suppression::SuppressionList;
pub use timing::{BlockedCooldown, ResponseTracker};
