use std::time::Duration;

use tracing::debug;

use crate::registry::{ProviderId, Registry};

const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Health-check URL for a local provider, derived from its chat endpoint.
fn probe_url(id: ProviderId, endpoint: &str) -> Option<String> {
    match id {
        ProviderId::LmStudio => Some(endpoint.replace("/chat/completions", "/models")),
        ProviderId::Ollama => Some(endpoint.replace("/api/chat", "/api/tags")),
        _ => None,
    }
}

/// Checks whether a local server answers on its well-known endpoint.
/// Unreachable means excluded from the selectable set, never a hard failure.
pub async fn probe_local(id: ProviderId, endpoint: &str) -> bool {
    let Some(url) = probe_url(id, endpoint) else {
        return false;
    };
    let client = reqwest::Client::builder()
        .timeout(PROBE_TIMEOUT)
        .build()
        .unwrap_or_default();
    match client.get(&url).send().await {
        Ok(resp) => resp.status().is_success(),
        Err(e) => {
            debug!(provider = %id, error = %e, "local endpoint not reachable");
            false
        }
    }
}

/// Probes every local provider in the registry and records the results.
pub async fn refresh_registry(registry: &mut Registry) {
    for id in ProviderId::ALL {
        if !id.is_local() {
            continue;
        }
        let Some(endpoint) = registry.settings(id).map(|s| s.endpoint.clone()) else {
            continue;
        };
        let up = probe_local(id, &endpoint).await;
        registry.set_reachable(id, up);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_urls_follow_provider_conventions() {
        assert_eq!(
            probe_url(
                ProviderId::LmStudio,
                "http://localhost:1234/v1/chat/completions"
            )
            .as_deref(),
            Some("http://localhost:1234/v1/models")
        );
        assert_eq!(
            probe_url(ProviderId::Ollama, "http://localhost:11434/api/chat").as_deref(),
            Some("http://localhost:11434/api/tags")
        );
        assert!(probe_url(ProviderId::OpenAi, "https://api.openai.com/v1/chat/completions").is_none());
    }
}
