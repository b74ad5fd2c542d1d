use nutrilens_types::ai::{AiChatRequest, AiChatResponse, AiPredictRequest};
use nutrilens_types::api::VisionAnalyzeResponse;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("AI gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("AI gateway returned status {0}")]
    Status(reqwest::StatusCode),
}

/// Seam between the chat orchestrator and the AI Gateway, so the orchestration
/// flow can be exercised against a stub in tests.
pub trait ChatCompleter: Send + Sync {
    fn chat(
        &self,
        request: &AiChatRequest,
    ) -> impl Future<Output = Result<AiChatResponse, GatewayError>> + Send;
}

/// HTTP client for the external AI Gateway service.
#[derive(Clone)]
pub struct AiGateway {
    http: reqwest::Client,
    base_url: String,
}

impl AiGateway {
    pub fn new(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Send a food photo reference for nutrition analysis.
    pub async fn predict_image(
        &self,
        user_id: &str,
        image_id: &str,
    ) -> Result<VisionAnalyzeResponse, GatewayError> {
        debug!("Sending image {} to AI gateway for analysis", image_id);
        let response = self
            .http
            .post(format!("{}/api/predict_img", self.base_url))
            .json(&AiPredictRequest {
                user_id: user_id.to_string(),
                image: image_id.to_string(),
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GatewayError::Status(response.status()));
        }
        Ok(response.json().await?)
    }
}

impl ChatCompleter for AiGateway {
    async fn chat(&self, request: &AiChatRequest) -> Result<AiChatResponse, GatewayError> {
        debug!(
            "Sending chat request to AI gateway ({} history entries)",
            request.history.len()
        );
        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GatewayError::Status(response.status()));
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let gw = AiGateway::new("http://localhost:8000/".into());
        assert_eq!(gw.base_url, "http://localhost:8000");
    }
}
