use serde::{Deserialize, Serialize};

/// Request body for the AI Gateway's chat-completion endpoint (`/api/chat`).
#[derive(Debug, Clone, Serialize)]
pub struct AiChatRequest {
    pub user_id: Option<String>,
    pub message: String,
    pub image: Option<String>,
    pub history: Vec<HistoryEntry>,
}

/// One prior exchange line sent as context to the gateway.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiChatResponse {
    pub reply: String,
}

/// Request body for the gateway's image analysis endpoint (`/api/predict_img`).
#[derive(Debug, Clone, Serialize)]
pub struct AiPredictRequest {
    pub user_id: String,
    pub image: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_wire_format() {
        let req = AiChatRequest {
            user_id: Some("u1".into()),
            message: "what should I eat".into(),
            image: None,
            history: vec![HistoryEntry {
                role: "user".into(),
                content: "hi".into(),
            }],
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["user_id"], "u1");
        assert!(json["image"].is_null());
        assert_eq!(json["history"][0]["role"], "user");
    }
}
