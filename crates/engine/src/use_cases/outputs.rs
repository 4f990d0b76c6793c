//! Output Image Resolver
//!
//! Turns the backend history of a prompt into the node id to proxied URL map
//! shown by the browser. History is written a moment after the backend
//! reports success, so both "no outputs yet" and failed requests are retried
//! with a fixed delay.

use std::sync::Arc;
use std::time::Duration;

use comfyui_mini_domain::{OutputImageMap, PromptId};
use comfyui_mini_shared::{build_output_map, extract_outputs};

use crate::infrastructure::ports::{BackendError, BackendPort};

/// Configuration for history retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = single attempt)
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(1),
        }
    }
}

pub struct OutputImageResolver {
    backend: Arc<dyn BackendPort>,
    proxy_prefix: String,
    retry: RetryPolicy,
}

impl OutputImageResolver {
    pub fn new(backend: Arc<dyn BackendPort>, proxy_prefix: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            backend,
            proxy_prefix: proxy_prefix.into(),
            retry,
        }
    }

    /// Resolve the outputs of `prompt_id`.
    ///
    /// Returns an empty map when the history still has no outputs after every
    /// retry. Request errors are returned once retries are exhausted.
    pub async fn resolve(&self, prompt_id: &PromptId) -> Result<OutputImageMap, BackendError> {
        for attempt in 0..=self.retry.max_retries {
            let retries_left = attempt < self.retry.max_retries;

            match self.backend.get_history(prompt_id).await {
                Ok(history) => {
                    if let Some(outputs) = extract_outputs(&history, prompt_id.as_str()) {
                        let map = build_output_map(outputs, &self.proxy_prefix);
                        tracing::debug!(
                            prompt_id = %prompt_id,
                            attempt = attempt + 1,
                            files = map.total_count(),
                            "Resolved output images"
                        );
                        return Ok(map);
                    }
                    if !retries_left {
                        break;
                    }
                    tracing::debug!(
                        prompt_id = %prompt_id,
                        attempt = attempt + 1,
                        "History has no outputs yet, retrying"
                    );
                }
                Err(e) => {
                    if !retries_left {
                        tracing::error!(
                            prompt_id = %prompt_id,
                            attempts = attempt + 1,
                            error = %e,
                            "History request failed after all retry attempts"
                        );
                        return Err(e);
                    }
                    tracing::warn!(
                        prompt_id = %prompt_id,
                        attempt = attempt + 1,
                        max_retries = self.retry.max_retries,
                        error = %e,
                        "History request failed, retrying..."
                    );
                }
            }

            tokio::time::sleep(self.retry.delay).await;
        }

        tracing::info!(prompt_id = %prompt_id, "No outputs recorded for prompt");
        Ok(OutputImageMap::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::ports::MockBackendPort;
    use mockall::Sequence;
    use serde_json::json;

    fn no_delay() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            delay: Duration::ZERO,
        }
    }

    fn history(prompt_id: &str) -> serde_json::Value {
        let mut root = serde_json::Map::new();
        root.insert(
            prompt_id.to_string(),
            json!({
                "outputs": {
                    "9": {"images": [{"filename": "ComfyUI_00001_.png", "subfolder": "", "type": "output"}]}
                }
            }),
        );
        serde_json::Value::Object(root)
    }

    #[tokio::test]
    async fn missing_outputs_are_retried_then_empty() {
        let mut backend = MockBackendPort::new();
        backend
            .expect_get_history()
            .times(4)
            .returning(|_| Ok(json!({})));

        let resolver = OutputImageResolver::new(Arc::new(backend), "comfyui", no_delay());
        let map = resolver.resolve(&PromptId::from("p1")).await.unwrap();
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn outputs_found_on_a_later_attempt() {
        let mut seq = Sequence::new();
        let mut backend = MockBackendPort::new();
        backend
            .expect_get_history()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(json!({"p1": {"status": {"completed": false}}})));
        backend
            .expect_get_history()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(history("p1")));

        let resolver = OutputImageResolver::new(Arc::new(backend), "comfyui", no_delay());
        let map = resolver.resolve(&PromptId::from("p1")).await.unwrap();
        assert_eq!(
            map.get("9").unwrap(),
            ["/comfyui/image?filename=ComfyUI_00001_.png&type=output"]
        );
    }

    #[tokio::test]
    async fn request_errors_are_retried() {
        let mut seq = Sequence::new();
        let mut backend = MockBackendPort::new();
        backend
            .expect_get_history()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Err(BackendError::Unavailable));
        backend
            .expect_get_history()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(json!({"outputs": {"9": {"images": []}}})));

        let resolver = OutputImageResolver::new(Arc::new(backend), "comfyui", no_delay());
        let map = resolver.resolve(&PromptId::from("p1")).await.unwrap();
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn persistent_request_errors_propagate() {
        let mut backend = MockBackendPort::new();
        backend
            .expect_get_history()
            .times(4)
            .returning(|_| {
                Err(BackendError::Status {
                    status: 500,
                    body: "boom".to_string(),
                })
            });

        let resolver = OutputImageResolver::new(Arc::new(backend), "comfyui", no_delay());
        let err = resolver.resolve(&PromptId::from("p1")).await.unwrap_err();
        assert!(matches!(err, BackendError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn zero_retries_means_one_attempt() {
        let mut backend = MockBackendPort::new();
        backend
            .expect_get_history()
            .times(1)
            .returning(|_| Ok(json!({})));

        let policy = RetryPolicy {
            max_retries: 0,
            delay: Duration::ZERO,
        };
        let resolver = OutputImageResolver::new(Arc::new(backend), "comfyui", policy);
        assert!(resolver.resolve(&PromptId::from("p1")).await.unwrap().is_empty());
    }
}
