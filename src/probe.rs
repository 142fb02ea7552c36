//! legacy scale probe.
//!
//! some scales expose their own tiny http server that answers `/peso` with a
//! raw telegram. this walks the candidate endpoints in order and reports the
//! first one that answers. misses and timeouts become a soft error payload,
//! never an `Err` to the caller.

use std::time::Duration;

use crate::config::ProbeTarget;
use crate::domain::ProbeResponse;
use crate::telegram;

pub async fn probe(
    client: &reqwest::Client,
    candidates: &[ProbeTarget],
    timeout: Duration,
) -> ProbeResponse {
    for target in candidates {
        let url = target.url();
        tracing::debug!("[PROBE] trying {}", url);

        let body = match fetch_text(client, &url, timeout).await {
            Some(body) => body,
            None => continue,
        };

        return match telegram::decode_text(&body) {
            Some(peso) => ProbeResponse { peso, raw: body, error: None },
            None => ProbeResponse {
                peso: 0.0,
                raw: body,
                error: Some("unrecognized weight format".to_string()),
            },
        };
    }

    let tried: Vec<String> = candidates.iter().map(ProbeTarget::url).collect();
    ProbeResponse {
        peso: 0.0,
        raw: String::new(),
        error: Some(format!(
            "not connected to scale at {}; check the address, port and that the scale server is running",
            if tried.is_empty() { "<no candidates>".to_string() } else { tried.join(", ") }
        )),
    }
}

/// body of a successful response, `None` on any failure or timeout
async fn fetch_text(client: &reqwest::Client, url: &str, timeout: Duration) -> Option<String> {
    let request = async {
        let response = client.get(url).send().await?.error_for_status()?;
        response.text().await
    };
    match tokio::time::timeout(timeout, request).await {
        Ok(Ok(body)) => Some(body),
        Ok(Err(e)) => {
            tracing::debug!("[PROBE] {} failed: {}", url, e);
            None
        }
        Err(_) => {
            tracing::debug!("[PROBE] {} timed out after {:?}", url, timeout);
            None
        }
    }
}
