//! Live-endpoint build verification.
//!
//! After the agent halts, one bounded probe against the app's root URL
//! catches runtime failures the agent's own tooling never saw. The
//! classification is deliberately asymmetric: HTTP 500 is a real runtime
//! error, but any other status or a network failure is inconclusive — the
//! sandbox may simply still be booting — and must not fail the run.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::agent::run_state::RunState;

pub async fn verify(http: &reqwest::Client, url: &str, timeout: Duration, state: &mut RunState) {
    let response = match http.post(url).timeout(timeout).send().await {
        Ok(response) => response,
        Err(e) => {
            debug!(url, error = %e, "Probe inconclusive (network failure)");
            return;
        }
    };

    let status = response.status();
    if status.as_u16() == 500 {
        let body = response.text().await.unwrap_or_default();
        let message = extract_error_message(&body)
            .unwrap_or_else(|| "Application returned HTTP 500".to_string());
        warn!(url, %message, "Runtime error detected by probe");
        state.record_error(format!("Build Error: {}", message));
    } else if status.is_success() {
        debug!(url, "Probe healthy");
    } else {
        debug!(url, status = status.as_u16(), "Probe inconclusive (non-500 status)");
    }
}

/// Pull a human-readable error message out of a 500 response body.
///
/// Dev-server error pages embed a JSON payload somewhere in the HTML;
/// scan for object starts and take the first `message` field found in a
/// parseable object.
fn extract_error_message(body: &str) -> Option<String> {
    for (index, _) in body.match_indices('{') {
        let mut stream = serde_json::Deserializer::from_str(&body[index..]).into_iter::<Value>();
        if let Some(Ok(value)) = stream.next() {
            if let Some(message) = find_message(&value) {
                return Some(message);
            }
        }
    }
    None
}

fn find_message(value: &Value) -> Option<String> {
    let object = value.as_object()?;
    if let Some(Value::String(message)) = object.get("message") {
        return Some(message.clone());
    }
    object.values().find_map(find_message)
}
