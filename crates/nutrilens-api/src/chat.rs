use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Multipart, Path, State},
};
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use nutrilens_db::Database;
use nutrilens_db::models::ConversationRow;
use nutrilens_gateway::ChatCompleter;
use nutrilens_storage::ObjectStore;
use nutrilens_types::ai::{AiChatRequest, HistoryEntry};
use nutrilens_types::api::{
    ChatResponse, Claims, ConversationDetail, ConversationPreview, MessageView, Role,
};

use crate::error::ApiError;
use crate::state::AppState;
use crate::title;

/// One inbound chat turn: text and/or an attached food photo.
pub struct TurnInput {
    pub user_id: Option<Uuid>,
    pub conversation_id: Option<Uuid>,
    pub message: String,
    pub image: Option<ImageUpload>,
}

pub struct ImageUpload {
    pub filename: Option<String>,
    pub bytes: Vec<u8>,
}

/// POST /api/v1/chat — multipart fields: userId?, conversationId?, message,
/// image?. Public: conversations may be anonymous.
pub async fn handle_chat(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ChatResponse>, ApiError> {
    let mut user_id = None;
    let mut conversation_id = None;
    let mut message: Option<String> = None;
    let mut image: Option<ImageUpload> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("malformed multipart body: {}", e)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("userId") => user_id = parse_id_field(&text_field(field, "userId").await?)?,
            Some("conversationId") => {
                conversation_id = parse_id_field(&text_field(field, "conversationId").await?)?;
            }
            Some("message") => message = Some(text_field(field, "message").await?),
            Some("image") => {
                let filename = field.file_name().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::Validation(format!("unreadable image field: {}", e)))?;
                image = Some(ImageUpload {
                    filename,
                    bytes: bytes.to_vec(),
                });
            }
            _ => {}
        }
    }

    if message.is_none() && image.is_none() {
        return Err(ApiError::Validation(
            "a message or an image is required".into(),
        ));
    }

    let input = TurnInput {
        user_id,
        conversation_id,
        message: message.unwrap_or_default(),
        image,
    };

    let response = process_turn(
        state.db.clone(),
        state.storage.clone(),
        &state.gateway,
        input,
    )
    .await?;
    Ok(Json(response))
}

/// The chat orchestration flow: resolve the conversation, store the optional
/// photo, call the AI gateway with prior history, persist both sides of the
/// exchange atomically, and kick off retitling for brand-new conversations.
///
/// All-or-nothing per turn: a failed gateway call leaves no new messages
/// behind (the uploaded image record, if any, is kept — storage side effects
/// are not rolled back).
pub async fn process_turn<C>(
    db: Arc<Database>,
    storage: Arc<ObjectStore>,
    gateway: &C,
    input: TurnInput,
) -> Result<ChatResponse, ApiError>
where
    C: ChatCompleter + Clone + 'static,
{
    let conversation = resolve_conversation(&db, input.user_id, input.conversation_id).await?;
    let conversation_id = parse_id(&conversation.id, "conversation");

    // Store the attached photo, if any, before talking to the gateway so the
    // request can reference it.
    let mut image_id: Option<String> = None;
    if let Some(upload) = &input.image {
        if !upload.bytes.is_empty() {
            let key = ObjectStore::unique_key(upload.filename.as_deref());
            storage.put(&key, &upload.bytes).await.map_err(|e| {
                error!("Image upload to object store failed: {:#}", e);
                ApiError::UpstreamUnavailable
            })?;

            let id = Uuid::new_v4().to_string();
            let db2 = db.clone();
            let (iid, owner, bucket, object_key) = (
                id.clone(),
                conversation.user_id.clone(),
                storage.bucket().to_string(),
                key.clone(),
            );
            let now = Utc::now().to_rfc3339();
            tokio::task::spawn_blocking(move || {
                db2.insert_image(&iid, owner.as_deref(), &bucket, &object_key, &now)
            })
            .await
            .map_err(anyhow::Error::from)??;

            info!("Stored chat image {} as object {}", id, key);
            image_id = Some(id);
        }
    }

    // Prior transcript, oldest first, becomes the gateway's context.
    let db2 = db.clone();
    let cid = conversation.id.clone();
    let history: Vec<HistoryEntry> = tokio::task::spawn_blocking(move || db2.list_messages(&cid))
        .await
        .map_err(anyhow::Error::from)??
        .into_iter()
        .map(|m| HistoryEntry {
            role: m.role,
            content: m.content,
        })
        .collect();

    let request = AiChatRequest {
        user_id: conversation.user_id.clone(),
        message: input.message.clone(),
        image: image_id.clone(),
        history,
    };
    let reply = gateway.chat(&request).await?.reply;

    // Both messages commit together or not at all.
    let db2 = db.clone();
    let cid = conversation.id.clone();
    let user_message_id = Uuid::new_v4().to_string();
    let assistant_message_id = Uuid::new_v4().to_string();
    let (content, image_ref, reply_text) = (input.message.clone(), image_id, reply.clone());
    let now = Utc::now().to_rfc3339();
    tokio::task::spawn_blocking(move || {
        db2.insert_turn(
            &cid,
            &user_message_id,
            &content,
            image_ref.as_deref(),
            &assistant_message_id,
            &reply_text,
            &now,
        )
    })
    .await
    .map_err(anyhow::Error::from)??;

    // First exchange of a new conversation: name it in the background. The
    // response below still carries the current title ("New Chat").
    if conversation.chat_name == title::DEFAULT_TITLE {
        title::spawn_retitle(
            db.clone(),
            gateway.clone(),
            conversation_id,
            conversation.user_id.clone(),
            input.message,
        );
    }

    Ok(ChatResponse {
        conversation_id,
        reply,
        chat_name: conversation.chat_name,
    })
}

async fn resolve_conversation(
    db: &Arc<Database>,
    user_id: Option<Uuid>,
    conversation_id: Option<Uuid>,
) -> Result<ConversationRow, ApiError> {
    let db = db.clone();
    tokio::task::spawn_blocking(move || -> Result<ConversationRow, ApiError> {
        if let Some(cid) = conversation_id {
            return db
                .get_conversation(&cid.to_string())
                .map_err(ApiError::from)?
                .ok_or(ApiError::NotFound);
        }

        // New conversation, owned by the given user or anonymous.
        let owner = match user_id {
            Some(uid) => {
                let user = db
                    .get_user_by_id(&uid.to_string())
                    .map_err(ApiError::from)?
                    .ok_or(ApiError::NotFound)?;
                Some(user.id)
            }
            None => None,
        };

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        db.create_conversation(&id, owner.as_deref(), title::DEFAULT_TITLE, &now)
            .map_err(ApiError::from)?;
        db.get_conversation(&id)
            .map_err(ApiError::from)?
            .ok_or_else(|| anyhow::anyhow!("conversation {} vanished after create", id).into())
    })
    .await
    .map_err(anyhow::Error::from)?
}

/// GET /api/v1/chat/conversations — the caller's conversations, most recent
/// activity first.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<ConversationPreview>>, ApiError> {
    fetch_previews(state.db.clone(), claims.sub).await.map(Json)
}

pub async fn fetch_previews(
    db: Arc<Database>,
    user_id: Uuid,
) -> Result<Vec<ConversationPreview>, ApiError> {
    let uid = user_id.to_string();
    let rows = tokio::task::spawn_blocking(move || db.list_conversations_for_user(&uid))
        .await
        .map_err(anyhow::Error::from)??;

    Ok(rows
        .into_iter()
        .map(|row| ConversationPreview {
            id: parse_id(&row.id, "conversation"),
            chat_name: row.chat_name,
            last_activity: parse_timestamp(&row.last_activity, &row.id),
        })
        .collect())
}

/// GET /api/v1/chat/conversations/{conversationId} — full transcript, owner
/// only.
pub async fn get_conversation_detail(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ConversationDetail>, ApiError> {
    fetch_conversation_detail(state.db.clone(), conversation_id, claims.sub)
        .await
        .map(Json)
}

pub async fn fetch_conversation_detail(
    db: Arc<Database>,
    conversation_id: Uuid,
    caller: Uuid,
) -> Result<ConversationDetail, ApiError> {
    let db2 = db.clone();
    let cid = conversation_id.to_string();
    let conversation = tokio::task::spawn_blocking(move || db2.get_conversation(&cid))
        .await
        .map_err(anyhow::Error::from)??
        .ok_or(ApiError::NotFound)?;

    // Anonymous conversations have no owner and are not readable here.
    if conversation.user_id.as_deref() != Some(caller.to_string().as_str()) {
        return Err(ApiError::Forbidden);
    }

    let cid = conversation_id.to_string();
    let rows = tokio::task::spawn_blocking(move || db.list_messages(&cid))
        .await
        .map_err(anyhow::Error::from)??;

    let messages = rows
        .into_iter()
        .map(|row| MessageView {
            id: parse_id(&row.id, "message"),
            role: Role::parse(&row.role).unwrap_or_else(|| {
                warn!("Corrupt role '{}' on message '{}'", row.role, row.id);
                Role::Assistant
            }),
            content: row.content,
            image_url: row.image_key.map(|key| format!("/api/v1/images/{}", key)),
            timestamp: parse_timestamp(&row.timestamp, &row.id),
        })
        .collect();

    Ok(ConversationDetail {
        id: conversation_id,
        chat_name: conversation.chat_name,
        messages,
    })
}

async fn text_field(field: axum::extract::multipart::Field<'_>, name: &str) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::Validation(format!("unreadable field '{}': {}", name, e)))
}

/// Empty strings count as absent; anything else must be a UUID.
fn parse_id_field(raw: &str) -> Result<Option<Uuid>, ApiError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<Uuid>()
        .map(Some)
        .map_err(|_| ApiError::Validation(format!("malformed identifier '{}'", trimmed)))
}

fn parse_id(raw: &str, context: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} id '{}': {}", context, raw, e);
        Uuid::default()
    })
}

fn parse_timestamp(raw: &str, context: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite's datetime('now') format has no timezone; treat as UTC.
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}' on '{}': {}", raw, context, e);
            DateTime::default()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use nutrilens_gateway::GatewayError;
    use nutrilens_types::ai::AiChatResponse;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct StubGateway {
        reply: String,
        fail: bool,
        // All requests seen, in order. The detached retitle task may add a
        // second entry at any point, so assertions only look at the first.
        requests: Arc<Mutex<Vec<AiChatRequest>>>,
    }

    impl StubGateway {
        fn replying(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                ..Default::default()
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }
    }

    impl ChatCompleter for StubGateway {
        async fn chat(&self, request: &AiChatRequest) -> Result<AiChatResponse, GatewayError> {
            self.requests.lock().unwrap().push(request.clone());
            if self.fail {
                return Err(GatewayError::Status(StatusCode::BAD_GATEWAY));
            }
            Ok(AiChatResponse {
                reply: self.reply.clone(),
            })
        }
    }

    async fn setup() -> (Arc<Database>, Arc<ObjectStore>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let root = std::env::temp_dir().join(format!("nutrilens-chat-test-{}", Uuid::new_v4()));
        let storage = Arc::new(ObjectStore::new(root, "nutrilens".into()).await.unwrap());
        (db, storage)
    }

    fn seed_user(db: &Database) -> Uuid {
        let id = Uuid::new_v4();
        db.create_user(&id.to_string(), "u@example.com", "tester", "hash")
            .unwrap();
        id
    }

    fn message_count(db: &Database, conversation_id: &str) -> usize {
        db.list_messages(conversation_id).unwrap().len()
    }

    fn image_count(db: &Database) -> i64 {
        db.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM images", [], |r| r.get(0))?)
        })
        .unwrap()
    }

    fn turn(message: &str) -> TurnInput {
        TurnInput {
            user_id: None,
            conversation_id: None,
            message: message.to_string(),
            image: None,
        }
    }

    #[tokio::test]
    async fn new_owned_conversation_records_both_sides() {
        let (db, storage) = setup().await;
        let user = seed_user(&db);
        let gateway = StubGateway::replying("eat more greens");

        let mut input = turn("hi");
        input.user_id = Some(user);
        let resp = process_turn(db.clone(), storage, &gateway, input)
            .await
            .unwrap();

        assert_eq!(resp.reply, "eat more greens");
        assert_eq!(resp.chat_name, "New Chat");

        let conv = db
            .get_conversation(&resp.conversation_id.to_string())
            .unwrap()
            .unwrap();
        assert_eq!(conv.user_id.as_deref(), Some(user.to_string().as_str()));

        let messages = db.list_messages(&conv.id).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!((messages[0].role.as_str(), messages[0].content.as_str()), ("user", "hi"));
        assert_eq!(
            (messages[1].role.as_str(), messages[1].content.as_str()),
            ("assistant", "eat more greens")
        );
    }

    #[tokio::test]
    async fn anonymous_turn_creates_ownerless_conversation() {
        let (db, storage) = setup().await;
        let gateway = StubGateway::replying("hello");

        let resp = process_turn(db.clone(), storage, &gateway, turn("hey"))
            .await
            .unwrap();

        let conv = db
            .get_conversation(&resp.conversation_id.to_string())
            .unwrap()
            .unwrap();
        assert!(conv.user_id.is_none());
        assert_eq!(message_count(&db, &conv.id), 2);
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let (db, storage) = setup().await;
        let gateway = StubGateway::replying("hello");

        let mut input = turn("hi");
        input.user_id = Some(Uuid::new_v4());
        let res = process_turn(db, storage, &gateway, input).await;
        assert!(matches!(res, Err(ApiError::NotFound)));
    }

    #[tokio::test]
    async fn unknown_conversation_is_not_found() {
        let (db, storage) = setup().await;
        let gateway = StubGateway::replying("hello");

        let mut input = turn("hi");
        input.conversation_id = Some(Uuid::new_v4());
        let res = process_turn(db, storage, &gateway, input).await;
        assert!(matches!(res, Err(ApiError::NotFound)));
    }

    #[tokio::test]
    async fn existing_conversation_appends_and_keeps_title() {
        let (db, storage) = setup().await;
        let user = seed_user(&db);
        let cid = Uuid::new_v4();
        db.create_conversation(
            &cid.to_string(),
            Some(&user.to_string()),
            "Meal Prep",
            &Utc::now().to_rfc3339(),
        )
        .unwrap();
        db.insert_turn(&cid.to_string(), "m1", "q1", None, "m2", "a1", &Utc::now().to_rfc3339())
            .unwrap();
        db.insert_turn(&cid.to_string(), "m3", "q2", None, "m4", "a2", &Utc::now().to_rfc3339())
            .unwrap();

        let gateway = StubGateway::replying("a3");
        let mut input = turn("q3");
        input.conversation_id = Some(cid);
        let resp = process_turn(db.clone(), storage, &gateway, input)
            .await
            .unwrap();
        assert_eq!(resp.chat_name, "Meal Prep");

        let messages = db.list_messages(&cid.to_string()).unwrap();
        assert_eq!(messages.len(), 6);
        assert_eq!(messages[4].content, "q3");
        assert_eq!(messages[5].content, "a3");

        // Retitling only runs for conversations still called "New Chat".
        let conv = db.get_conversation(&cid.to_string()).unwrap().unwrap();
        assert_eq!(conv.chat_name, "Meal Prep");

        // The gateway saw the four prior messages as history.
        let requests = gateway.requests.lock().unwrap();
        assert_eq!(requests[0].history.len(), 4);
        assert_eq!(requests[0].history[0].content, "q1");
    }

    #[tokio::test]
    async fn image_turn_links_the_stored_photo() {
        let (db, storage) = setup().await;
        let user = seed_user(&db);
        let gateway = StubGateway::replying("looks like a salad");

        let input = TurnInput {
            user_id: Some(user),
            conversation_id: None,
            message: String::new(), // image with no text is allowed
            image: Some(ImageUpload {
                filename: Some("lunch.jpg".into()),
                bytes: b"jpegbytes".to_vec(),
            }),
        };
        let resp = process_turn(db.clone(), storage.clone(), &gateway, input)
            .await
            .unwrap();

        let messages = db.list_messages(&resp.conversation_id.to_string()).unwrap();
        assert_eq!(messages.len(), 2);
        let image_id = messages[0].image_id.clone().expect("user message references image");
        assert!(messages[1].image_id.is_none());

        // Image record and stored object line up.
        let image = db.get_image(&image_id).unwrap().unwrap();
        assert_eq!(image.user_id.as_deref(), Some(user.to_string().as_str()));
        assert_eq!(image.bucket, "nutrilens");
        let stored = storage.get(&image.object_key).await.unwrap().unwrap();
        assert_eq!(stored, b"jpegbytes");

        // The gateway request referenced the image record.
        let requests = gateway.requests.lock().unwrap();
        assert_eq!(requests[0].image.as_deref(), Some(image_id.as_str()));
    }

    #[tokio::test]
    async fn failed_gateway_leaves_no_messages_but_keeps_image() {
        let (db, storage) = setup().await;
        let user = seed_user(&db);
        let gateway = StubGateway::failing();

        let input = TurnInput {
            user_id: Some(user),
            conversation_id: None,
            message: "what is this".into(),
            image: Some(ImageUpload {
                filename: Some("dinner.jpg".into()),
                bytes: b"jpegbytes".to_vec(),
            }),
        };
        let res = process_turn(db.clone(), storage, &gateway, input).await;
        assert!(matches!(res, Err(ApiError::UpstreamUnavailable)));

        // Storage side effect survives, the turn itself leaves no trace.
        assert_eq!(image_count(&db), 1);
        let total_messages: i64 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(total_messages, 0);
    }

    #[tokio::test]
    async fn failed_gateway_adds_nothing_to_existing_transcript() {
        let (db, storage) = setup().await;
        let cid = Uuid::new_v4();
        db.create_conversation(&cid.to_string(), None, "New Chat", &Utc::now().to_rfc3339())
            .unwrap();
        db.insert_turn(&cid.to_string(), "m1", "q1", None, "m2", "a1", &Utc::now().to_rfc3339())
            .unwrap();

        let gateway = StubGateway::failing();
        let mut input = turn("q2");
        input.conversation_id = Some(cid);
        let res = process_turn(db.clone(), storage, &gateway, input).await;

        assert!(matches!(res, Err(ApiError::UpstreamUnavailable)));
        assert_eq!(message_count(&db, &cid.to_string()), 2);
    }

    #[tokio::test]
    async fn detail_is_owner_only() {
        let (db, storage) = setup().await;
        let owner = seed_user(&db);
        let gateway = StubGateway::replying("hello");

        let mut input = turn("hi");
        input.user_id = Some(owner);
        let resp = process_turn(db.clone(), storage, &gateway, input)
            .await
            .unwrap();

        let detail = fetch_conversation_detail(db.clone(), resp.conversation_id, owner)
            .await
            .unwrap();
        assert_eq!(detail.messages.len(), 2);
        assert_eq!(detail.messages[0].role, Role::User);

        let stranger = Uuid::new_v4();
        let res = fetch_conversation_detail(db.clone(), resp.conversation_id, stranger).await;
        assert!(matches!(res, Err(ApiError::Forbidden)));

        let res = fetch_conversation_detail(db, Uuid::new_v4(), owner).await;
        assert!(matches!(res, Err(ApiError::NotFound)));
    }

    #[tokio::test]
    async fn previews_come_back_most_recent_first() {
        let (db, _storage) = setup().await;
        let user = seed_user(&db);
        db.create_conversation(
            &Uuid::new_v4().to_string(),
            Some(&user.to_string()),
            "Older",
            "2026-08-29T10:00:00+00:00",
        )
        .unwrap();
        db.create_conversation(
            &Uuid::new_v4().to_string(),
            Some(&user.to_string()),
            "Newer",
            "2026-08-30T10:00:00+00:00",
        )
        .unwrap();

        let previews = fetch_previews(db, user).await.unwrap();
        let names: Vec<&str> = previews.iter().map(|p| p.chat_name.as_str()).collect();
        assert_eq!(names, vec!["Newer", "Older"]);
        assert!(previews[0].last_activity > previews[1].last_activity);
    }

    #[test]
    fn id_fields_tolerate_empty_reject_garbage() {
        assert_eq!(parse_id_field("").unwrap(), None);
        assert_eq!(parse_id_field("  ").unwrap(), None);
        assert!(parse_id_field("not-a-uuid").is_err());
        let id = Uuid::new_v4();
        assert_eq!(parse_id_field(&id.to_string()).unwrap(), Some(id));
    }

    #[test]
    fn timestamps_parse_both_formats() {
        let rfc = parse_timestamp("2026-08-30T10:00:00+00:00", "t");
        let sqlite = parse_timestamp("2026-08-30 10:00:00", "t");
        assert_eq!(rfc, sqlite);
    }
}
