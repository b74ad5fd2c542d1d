use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id           TEXT PRIMARY KEY,
            email        TEXT NOT NULL UNIQUE,
            username     TEXT NOT NULL,
            password     TEXT NOT NULL,
            age          INTEGER,
            gender       TEXT,
            height       REAL,
            weight       REAL,
            calorie_goal INTEGER,
            special_diet TEXT,
            cuisine      TEXT,
            created_at   TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS conversations (
            id          TEXT PRIMARY KEY,
            user_id     TEXT REFERENCES users(id),
            chat_name   TEXT NOT NULL DEFAULT 'New Chat',
            summary     TEXT,
            created_at  TEXT NOT NULL,
            updated_at  TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_user
            ON conversations(user_id, created_at);

        CREATE TABLE IF NOT EXISTS images (
            id          TEXT PRIMARY KEY,
            user_id     TEXT REFERENCES users(id),
            bucket      TEXT NOT NULL,
            object_key  TEXT NOT NULL,
            upload_time TEXT NOT NULL,
            UNIQUE(bucket, object_key)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            role            TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
            content         TEXT NOT NULL,
            image_id        TEXT REFERENCES images(id),
            timestamp       TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, timestamp);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
