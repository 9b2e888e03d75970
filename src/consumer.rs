//! The server action exercised by the end-to-end tests.
//!
//! It fetches `GET {API_URL}/test` and hands the body back as a JSON string.
//! Failures never escape: they are folded into
//! `{"error": "An error occurred: <details>"}` so the page can always render
//! what it receives.

use std::time::Duration;

use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, warn};

/// Environment variable holding the base URL of the API
pub const API_URL_ENV: &str = "API_URL";

/// Path fetched below the base URL
pub const EXAMPLE_PATH: &str = "/test";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetch the example endpoint below `base_url` and return its body as JSON text
pub async fn fetch_example_body(base_url: &str) -> String {
    match try_fetch(base_url).await {
        Ok(body) => body.to_string(),
        Err(details) => {
            warn!(base_url, error = %details, "Fetching example body failed");
            error_body(&details)
        }
    }
}

/// Same as [`fetch_example_body`], reading the base URL from `API_URL`
pub async fn fetch_example_body_from_env() -> String {
    match std::env::var(API_URL_ENV) {
        Ok(base_url) => fetch_example_body(&base_url).await,
        Err(e) => error_body(&format!("{API_URL_ENV}: {e}")),
    }
}

/// The JSON error object returned in place of a body
pub fn error_body(details: &str) -> String {
    json!({ "error": format!("An error occurred: {details}") }).to_string()
}

async fn try_fetch(base_url: &str) -> Result<Value, String> {
    let url = format!("{}{EXAMPLE_PATH}", base_url.trim_end_matches('/'));
    debug!(url = %url, "Fetching example body");

    let client = Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| e.to_string())?;

    let response = client.get(&url).send().await.map_err(|e| {
        if e.is_connect() {
            format!("Connection failed to {url} - check if the server is running and the URL is correct")
        } else if e.is_timeout() {
            format!("Request to {url} timed out")
        } else {
            e.to_string()
        }
    })?;

    response
        .json::<Value>()
        .await
        .map_err(|e| format!("Invalid JSON from {url}: {e}"))
}
