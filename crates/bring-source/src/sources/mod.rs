pub mod git_repo;
pub mod github_files;
pub mod github_release;
pub mod gitlab_files;
pub mod template_url;

use crate::{RateLimitedError, SourceError};

pub(crate) fn header_as_u64(response: &reqwest::Response, name: &str) -> u64 {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

/// Check an API response for a rate-limit rejection before the caller
/// treats any other non-success status as a generic HTTP error. GitHub and
/// GitLab name their rate-limit headers differently (`x-ratelimit-*` vs
/// `ratelimit-*`), so the header names are parameters rather than
/// hardcoded.
pub(crate) fn ensure_not_rate_limited(
    response: &reqwest::Response,
    limit_header: &str,
    remaining_header: &str,
    reset_header: &str,
    has_credentials: bool,
) -> Result<(), SourceError> {
    if response.status().is_success() {
        return Ok(());
    }
    let remaining = header_as_u64(response, remaining_header);
    if remaining == 0 {
        let limit = header_as_u64(response, limit_header);
        let reset_epoch = header_as_u64(response, reset_header) as i64;
        let reset = chrono::DateTime::from_timestamp(reset_epoch, 0).unwrap_or_else(chrono::Utc::now);
        return Err(SourceError::RateLimited(RateLimitedError::new(
            limit,
            remaining,
            reset,
            has_credentials,
        )));
    }
    Ok(())
}
