use crate::Database;
use crate::models::{ConversationPreviewRow, ConversationRow, ImageRow, MessageRow, UserRow};
use anyhow::Result;
use nutrilens_types::api::UpdateProfileRequest;
use rusqlite::Connection;

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        email: &str,
        username: &str,
        password_hash: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, email, username, password) VALUES (?1, ?2, ?3, ?4)",
                (id, email, username, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    /// Partial profile update: absent fields keep their current value.
    /// Returns the row after the update, or None if the user does not exist.
    pub fn update_user_profile(
        &self,
        id: &str,
        changes: &UpdateProfileRequest,
    ) -> Result<Option<UserRow>> {
        self.with_conn_mut(|conn| {
            let updated = conn.execute(
                "UPDATE users SET
                    username     = COALESCE(?2, username),
                    age          = COALESCE(?3, age),
                    gender       = COALESCE(?4, gender),
                    height       = COALESCE(?5, height),
                    weight       = COALESCE(?6, weight),
                    calorie_goal = COALESCE(?7, calorie_goal),
                    special_diet = COALESCE(?8, special_diet),
                    cuisine      = COALESCE(?9, cuisine)
                 WHERE id = ?1",
                rusqlite::params![
                    id,
                    changes.username,
                    changes.age,
                    changes.gender,
                    changes.height,
                    changes.weight,
                    changes.calorie_goal,
                    changes.special_diet,
                    changes.cuisine,
                ],
            )?;
            if updated == 0 {
                return Ok(None);
            }
            query_user(conn, "id", id)
        })
    }

    // -- Conversations --

    pub fn create_conversation(
        &self,
        id: &str,
        user_id: Option<&str>,
        chat_name: &str,
        now: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, user_id, chat_name, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, user_id, chat_name, now],
            )?;
            Ok(())
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, chat_name, summary, created_at, updated_at
                 FROM conversations WHERE id = ?1",
            )?;
            let row = stmt
                .query_row([id], |row| {
                    Ok(ConversationRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        chat_name: row.get(2)?,
                        summary: row.get(3)?,
                        created_at: row.get(4)?,
                        updated_at: row.get(5)?,
                    })
                })
                .optional()?;
            Ok(row)
        })
    }

    pub fn update_title(&self, id: &str, chat_name: &str, now: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE conversations SET chat_name = ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![id, chat_name, now],
            )?;
            Ok(())
        })
    }

    /// Previews for a user's conversations, most recent activity first.
    /// Last activity is the update timestamp if present, else creation.
    pub fn list_conversations_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ConversationPreviewRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, chat_name, COALESCE(updated_at, created_at) AS last_activity
                 FROM conversations
                 WHERE user_id = ?1
                 ORDER BY last_activity DESC",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(ConversationPreviewRow {
                        id: row.get(0)?,
                        chat_name: row.get(1)?,
                        last_activity: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    /// Full transcript in timestamp order; equal timestamps keep insertion
    /// order (rowid tie-break) so repeated reads are deterministic.
    pub fn list_messages(&self, conversation_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            // JOIN images to fetch the object key in a single query
            let mut stmt = conn.prepare(
                "SELECT m.id, m.conversation_id, m.role, m.content, m.image_id, i.object_key, m.timestamp
                 FROM messages m
                 LEFT JOIN images i ON m.image_id = i.id
                 WHERE m.conversation_id = ?1
                 ORDER BY m.timestamp ASC, m.rowid ASC",
            )?;
            let rows = stmt
                .query_map([conversation_id], |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        conversation_id: row.get(1)?,
                        role: row.get(2)?,
                        content: row.get(3)?,
                        image_id: row.get(4)?,
                        image_key: row.get(5)?,
                        timestamp: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Append one full turn: the user's message then the assistant's reply,
    /// committed together or not at all. Also bumps the conversation's
    /// updated_at so it sorts first in the preview list.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_turn(
        &self,
        conversation_id: &str,
        user_message_id: &str,
        user_content: &str,
        user_image_id: Option<&str>,
        assistant_message_id: &str,
        assistant_content: &str,
        now: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages (id, conversation_id, role, content, image_id, timestamp)
                 VALUES (?1, ?2, 'user', ?3, ?4, ?5)",
                rusqlite::params![user_message_id, conversation_id, user_content, user_image_id, now],
            )?;
            tx.execute(
                "INSERT INTO messages (id, conversation_id, role, content, image_id, timestamp)
                 VALUES (?1, ?2, 'assistant', ?3, NULL, ?4)",
                rusqlite::params![assistant_message_id, conversation_id, assistant_content, now],
            )?;
            tx.execute(
                "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
                rusqlite::params![conversation_id, now],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    // -- Images --

    pub fn insert_image(
        &self,
        id: &str,
        user_id: Option<&str>,
        bucket: &str,
        object_key: &str,
        now: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO images (id, user_id, bucket, object_key, upload_time)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, user_id, bucket, object_key, now],
            )?;
            Ok(())
        })
    }

    pub fn get_image(&self, id: &str) -> Result<Option<ImageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, bucket, object_key, upload_time FROM images WHERE id = ?1",
            )?;
            let row = stmt
                .query_row([id], |row| {
                    Ok(ImageRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        bucket: row.get(2)?,
                        object_key: row.get(3)?,
                        upload_time: row.get(4)?,
                    })
                })
                .optional()?;
            Ok(row)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    // column is a compile-time constant ("id" or "email"), never user input
    let sql = format!(
        "SELECT id, email, username, password, age, gender, height, weight,
                calorie_goal, special_diet, cuisine, created_at
         FROM users WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                email: row.get(1)?,
                username: row.get(2)?,
                password: row.get(3)?,
                age: row.get(4)?,
                gender: row.get(5)?,
                height: row.get(6)?,
                weight: row.get(7)?,
                calorie_goal: row.get(8)?,
                special_diet: row.get(9)?,
                cuisine: row.get(10)?,
                created_at: row.get(11)?,
            })
        })
        .optional()?;

    Ok(row)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
