/// Database row types — these map directly to SQLite rows.
/// Distinct from nutrilens-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub email: String,
    pub username: String,
    pub password: String,
    pub age: Option<i64>,
    pub gender: Option<String>,
    pub height: Option<f64>,
    pub weight: Option<f64>,
    pub calorie_goal: Option<i64>,
    pub special_diet: Option<String>,
    pub cuisine: Option<String>,
    pub created_at: String,
}

pub struct ConversationRow {
    pub id: String,
    pub user_id: Option<String>,
    pub chat_name: String,
    pub summary: Option<String>,
    pub created_at: String,
    pub updated_at: Option<String>,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    pub image_id: Option<String>,
    /// Object key of the referenced image, joined in from the images table.
    pub image_key: Option<String>,
    pub timestamp: String,
}

pub struct ImageRow {
    pub id: String,
    pub user_id: Option<String>,
    pub bucket: String,
    pub object_key: String,
    pub upload_time: String,
}

pub struct ConversationPreviewRow {
    pub id: String,
    pub chat_name: String,
    pub last_activity: String,
}
