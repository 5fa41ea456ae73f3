//! Response classification: map status codes and challenge-page bodies onto
//! the pipeline error taxonomy.

use regex::RegexSet;

use vitality_core::{BlockKind, PipelineError};

/// Markers that identify a bot challenge or rate-limit interstitial in an
/// otherwise-2xx body.
pub struct ChallengeMarkers {
    set: RegexSet,
}

impl Default for ChallengeMarkers {
    fn default() -> Self {
        // Case-insensitive markers observed on Cloudflare and common WAF
        // interstitials.
        let set = RegexSet::new([
            r"(?i)checking your browser before accessing",
            r"(?i)cf-browser-verification",
            r"(?i)cf_chl_",
            r"(?i)attention required!\s*\|\s*cloudflare",
            r"(?i)just a moment\.\.\.",
            r"(?i)verify you are a human",
            r"(?i)access denied.{0,40}permission to access",
            r"(?i)rate limit(ed)? exceeded",
            r"(?i)too many requests",
            r"(?i)captcha",
        ])
        .expect("challenge marker patterns are valid");
        Self { set }
    }
}

impl ChallengeMarkers {
    pub fn matches(&self, body: &str) -> bool {
        // Interstitials are small; cap the scan to the head of the body.
        let mut end = body.len().min(16 * 1024);
        while end > 0 && !body.is_char_boundary(end) {
            end -= 1;
        }
        self.set.is_match(&body[..end])
    }
}

/// Classify a completed HTTP exchange. `Ok(())` means the response is usable.
pub fn classify_response(
    status: u16,
    body: &str,
    markers: &ChallengeMarkers,
) -> Result<(), PipelineError> {
    match status {
        403 => Err(PipelineError::Blocked(BlockKind::Forbidden)),
        429 => Err(PipelineError::Blocked(BlockKind::RateLimited)),
        200..=299 => {
            if markers.matches(body) {
                Err(PipelineError::Blocked(BlockKind::Challenge))
            } else {
                Ok(())
            }
        }
        500..=599 => Err(PipelineError::ServerError(status)),
        _ => Err(PipelineError::ClientError(status)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_html_passes() {
        let markers = ChallengeMarkers::default();
        assert!(classify_response(200, "<html><body>Mass times</body></html>", &markers).is_ok());
    }

    #[test]
    fn status_403_and_429_are_blocked() {
        let markers = ChallengeMarkers::default();
        assert!(matches!(
            classify_response(403, "", &markers),
            Err(PipelineError::Blocked(BlockKind::Forbidden))
        ));
        assert!(matches!(
            classify_response(429, "", &markers),
            Err(PipelineError::Blocked(BlockKind::RateLimited))
        ));
    }

    #[test]
    fn cloudflare_interstitial_is_a_challenge() {
        let markers = ChallengeMarkers::default();
        let body = "<title>Just a moment...</title><div id=cf-browser-verification>";
        assert!(matches!(
            classify_response(200, body, &markers),
            Err(PipelineError::Blocked(BlockKind::Challenge))
        ));
    }

    #[test]
    fn server_errors_and_client_errors_split() {
        let markers = ChallengeMarkers::default();
        assert!(matches!(
            classify_response(502, "", &markers),
            Err(PipelineError::ServerError(502))
        ));
        assert!(matches!(
            classify_response(404, "", &markers),
            Err(PipelineError::ClientError(404))
        ));
    }

    #[test]
    fn marker_scan_is_utf8_safe_on_large_bodies() {
        let markers = ChallengeMarkers::default();
        let body = "é".repeat(16 * 1024);
        assert!(classify_response(200, &body, &markers).is_ok());
    }
}
