use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info};

use super::url_norm::normalize_url;

const REDIRECT_USER_AGENT: &str = "Mozilla/5.0 (compatible; DedupBackend/1.0)";

/// Follow a URL's redirect chain with a HEAD request.
///
/// Returns `(final_url, was_redirected)`. `was_redirected` is only true when
/// the final URL differs from the input *after normalization*, so trailing
/// slashes or scheme changes do not count. Any failure (unsupported scheme,
/// timeout, transport error) degrades to `(None, false)`.
pub async fn resolve_redirect(client: &Client, url: &str, timeout: Duration) -> (Option<String>, bool) {
    let url = url.trim();
    if url.is_empty() {
        return (None, false);
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        return (None, false);
    }

    let response = match client
        .head(url)
        .header(reqwest::header::USER_AGENT, REDIRECT_USER_AGENT)
        .timeout(timeout)
        .send()
        .await
    {
        Ok(response) => response,
        Err(err) => {
            debug!(error = %err, url, "redirect resolution failed");
            return (None, false);
        }
    };

    let final_url = response.url().to_string();
    let was_redirected = final_url != url && normalize_url(&final_url) != normalize_url(url);

    if was_redirected {
        info!(from = url, to = %final_url, "url redirect detected");
    }

    (Some(final_url), was_redirected)
}
