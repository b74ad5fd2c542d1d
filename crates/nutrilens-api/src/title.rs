use std::sync::Arc;

use anyhow::Result;
use nutrilens_db::Database;
use nutrilens_gateway::ChatCompleter;
use nutrilens_types::ai::AiChatRequest;
use tracing::{info, warn};
use uuid::Uuid;

/// Title every conversation starts with; replaced once by the retitler.
pub const DEFAULT_TITLE: &str = "New Chat";

/// Kick off title generation for a freshly started conversation. Detached:
/// the calling request never waits on it, and failures are only logged.
pub fn spawn_retitle<C>(
    db: Arc<Database>,
    gateway: C,
    conversation_id: Uuid,
    user_id: Option<String>,
    seed_message: String,
) where
    C: ChatCompleter + 'static,
{
    tokio::spawn(async move {
        match generate_title(&db, &gateway, conversation_id, user_id, &seed_message).await {
            Ok(Some(title)) => info!("Generated chat title for {}: {}", conversation_id, title),
            Ok(None) => info!("Gateway produced no usable title for {}", conversation_id),
            Err(e) => warn!("Failed to generate chat title for {}: {}", conversation_id, e),
        }
    });
}

/// Ask the gateway for a short conversation title seeded by the user's first
/// message. Returns the persisted title, or None when the sanitized reply was
/// empty (in which case the conversation keeps its current name).
pub async fn generate_title<C: ChatCompleter>(
    db: &Arc<Database>,
    gateway: &C,
    conversation_id: Uuid,
    user_id: Option<String>,
    seed_message: &str,
) -> Result<Option<String>> {
    let prompt = format!(
        "You are a system that generates short, simple chat titles.\n\
         - Only output a concise title (maximum 3-6 words).\n\
         - Do NOT explain.\n\
         - Do NOT translate.\n\
         - Do NOT include punctuation like \".\", \"\\\"\", or \"-\".\n\
         - Do NOT include greeting phrases.\n\
         - Just return the title only.\n\
         - Please answer in English.\n\
         User message: \"{}\"",
        seed_message
    );

    let request = AiChatRequest {
        user_id,
        message: prompt,
        image: None,
        history: vec![],
    };

    let response = gateway.chat(&request).await?;
    let title = sanitize_title(&response.reply);
    if title.is_empty() {
        return Ok(None);
    }

    let db = db.clone();
    let (cid, persisted) = (conversation_id.to_string(), title.clone());
    let now = chrono::Utc::now().to_rfc3339();
    tokio::task::spawn_blocking(move || db.update_title(&cid, &persisted, &now)).await??;

    Ok(Some(title))
}

/// Strip quotes, newlines and periods, trim, and capitalize the first
/// character. Idempotent.
pub fn sanitize_title(raw: &str) -> String {
    let stripped: String = raw
        .chars()
        .filter(|c| !matches!(c, '"' | '\n' | '.'))
        .collect();
    let trimmed = stripped.trim();

    let mut chars = trimmed.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
    }
}
