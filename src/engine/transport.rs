//! The HTTP transport shared by every worker.

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::redirect::Policy;
use std::time::Duration;

/// Transport settings that are not part of the request template.
#[derive(Clone, Debug)]
pub struct TransportSettings {
    pub follow_redirect: usize,
    pub insecure: bool,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub proxy: Option<String>,
}

/// Build the one client (and connection pool) the whole run shares.
///
/// Redirects are followed while fewer than `follow_redirect + 1` requests have been made;
/// after that the redirect response itself is returned instead of an error.
pub fn build_client(settings: &TransportSettings) -> Result<Client> {
    let follow = settings.follow_redirect;
    let policy = Policy::custom(move |attempt| {
        // previous() includes the original request.
        if attempt.previous().len() <= follow {
            attempt.follow()
        } else {
            attempt.stop()
        }
    });

    let mut builder = Client::builder()
        .redirect(policy)
        .timeout(settings.request_timeout)
        .connect_timeout(settings.connect_timeout)
        .danger_accept_invalid_certs(settings.insecure);

    builder = match settings.proxy.as_deref() {
        Some(url) => builder.proxy(
            reqwest::Proxy::all(url).with_context(|| format!("invalid proxy URL {url:?}"))?,
        ),
        None => builder.no_proxy(),
    };

    builder.build().context("build HTTP client")
}
