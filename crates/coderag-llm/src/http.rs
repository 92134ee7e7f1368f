//! Shared HTTP client construction.

use std::time::Duration;

/// Build the HTTP client used by the OpenAI-compatible backend.
///
/// 30s connect timeout, `request_timeout` overall, `coderag/{version}` user-agent.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialised.
pub fn build_client(request_timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .timeout(request_timeout)
        .user_agent(concat!("coderag/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_builds_with_custom_timeout() {
        assert!(build_client(Duration::from_secs(5)).is_ok());
    }
}
