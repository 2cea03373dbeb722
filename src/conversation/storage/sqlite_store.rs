//! `SQLite` implementation of the conversation store.

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use crate::conversation::core::errors::{ConversationError, ConversationResult};
use crate::conversation::core::ids::{ConversationId, MessageId};
use crate::conversation::core::model::{
    Attachment, AuditAction, AuditEntry, Conversation, ConversationStatus, IntakeBrief, Message,
    MessageRole,
};
use crate::conversation::storage::conversation_store::{ConversationStore, StoreFuture};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS conversations (
        id TEXT PRIMARY KEY,
        status TEXT NOT NULL,
        participant_name TEXT,
        participant_email TEXT,
        intake_brief TEXT,
        notes TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        ended_at INTEGER
    );
    CREATE TABLE IF NOT EXISTS conversation_messages (
        id TEXT PRIMARY KEY,
        conversation_id TEXT NOT NULL REFERENCES conversations (id),
        sequence INTEGER NOT NULL,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        attachments TEXT,
        created_at INTEGER NOT NULL,
        UNIQUE (conversation_id, sequence)
    );
    CREATE TABLE IF NOT EXISTS conversation_audit (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        conversation_id TEXT NOT NULL,
        action TEXT NOT NULL,
        details TEXT NOT NULL,
        recorded_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_conversation_audit_conversation
        ON conversation_audit (conversation_id);";

/// Raw conversation header as read from `SQLite`.
struct ConversationRow {
    status: String,
    participant_name: Option<String>,
    participant_email: Option<String>,
    intake_brief: Option<String>,
    notes: Option<String>,
    created_at: i64,
    updated_at: i64,
    ended_at: Option<i64>,
}

/// Raw message as read from or written to `SQLite`.
struct MessageRow {
    id: MessageId,
    sequence: i64,
    role: String,
    content: String,
    attachments: Option<String>,
    created_at: i64,
}

impl MessageRow {
    fn encode(message: &Message) -> ConversationResult<Self> {
        let attachments = if message.attachments.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&message.attachments)?)
        };
        Ok(Self {
            id: message.id,
            sequence: i64::try_from(message.sequence).map_err(|_| {
                ConversationError::CorruptRecord("message sequence exceeds i64".to_string())
            })?,
            role: message.role.to_string(),
            content: message.content.clone(),
            attachments,
            created_at: message.created_at.timestamp_millis(),
        })
    }

    fn decode(self, conversation_id: ConversationId) -> ConversationResult<Message> {
        let attachments: Vec<Attachment> = match self.attachments {
            Some(json) => serde_json::from_str(&json)?,
            None => Vec::new(),
        };
        Ok(Message {
            id: self.id,
            conversation_id,
            sequence: u64::try_from(self.sequence).map_err(|_| {
                ConversationError::CorruptRecord("negative message sequence".to_string())
            })?,
            role: MessageRole::from_str(&self.role)
                .map_err(|role| ConversationError::CorruptRecord(format!("invalid role: {role}")))?,
            content: self.content,
            attachments,
            created_at: from_millis(self.created_at)?,
        })
    }
}

fn from_millis(ms: i64) -> ConversationResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| ConversationError::CorruptRecord(format!("invalid timestamp {ms}")))
}

/// `SQLite`-backed conversation store.
pub struct SqliteConversationStore {
    conn: Connection,
}

impl SqliteConversationStore {
    /// Open (and migrate) a database file.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn open(path: impl AsRef<Path>) -> ConversationResult<Self> {
        let conn = Connection::open(path.as_ref().to_path_buf()).await?;
        Self::init(conn).await
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    /// Returns an error if the database cannot be created.
    pub async fn open_in_memory() -> ConversationResult<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> ConversationResult<Self> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

impl ConversationStore for SqliteConversationStore {
    fn get(&self, id: ConversationId) -> StoreFuture<'_, ConversationResult<Option<Conversation>>> {
        Box::pin(async move {
            let rows = self
                .conn
                .call(move |conn| {
                    let header = conn
                        .query_row(
                            "SELECT status, participant_name, participant_email, intake_brief,
                                    notes, created_at, updated_at, ended_at
                             FROM conversations WHERE id = ?1",
                            rusqlite::params![id],
                            |row| {
                                Ok(ConversationRow {
                                    status: row.get(0)?,
                                    participant_name: row.get(1)?,
                                    participant_email: row.get(2)?,
                                    intake_brief: row.get(3)?,
                                    notes: row.get(4)?,
                                    created_at: row.get(5)?,
                                    updated_at: row.get(6)?,
                                    ended_at: row.get(7)?,
                                })
                            },
                        )
                        .optional()?;
                    let Some(header) = header else {
                        return Ok(None);
                    };

                    let mut stmt = conn.prepare(
                        "SELECT id, sequence, role, content, attachments, created_at
                         FROM conversation_messages
                         WHERE conversation_id = ?1
                         ORDER BY sequence ASC",
                    )?;
                    let messages = stmt
                        .query_map(rusqlite::params![id], |row| {
                            Ok(MessageRow {
                                id: row.get(0)?,
                                sequence: row.get(1)?,
                                role: row.get(2)?,
                                content: row.get(3)?,
                                attachments: row.get(4)?,
                                created_at: row.get(5)?,
                            })
                        })?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                    Ok(Some((header, messages)))
                })
                .await?;

            let Some((header, message_rows)) = rows else {
                return Ok(None);
            };

            let status = ConversationStatus::from_str(&header.status).map_err(|status| {
                ConversationError::CorruptRecord(format!("invalid status: {status}"))
            })?;
            let intake_brief: Option<IntakeBrief> = match header.intake_brief {
                Some(json) => Some(serde_json::from_str(&json)?),
                None => None,
            };
            let messages = message_rows
                .into_iter()
                .map(|row| row.decode(id))
                .collect::<ConversationResult<Vec<_>>>()?;

            Ok(Some(Conversation {
                id,
                status,
                participant_name: header.participant_name,
                participant_email: header.participant_email,
                intake_brief,
                notes: header.notes,
                messages,
                created_at: from_millis(header.created_at)?,
                updated_at: from_millis(header.updated_at)?,
                ended_at: header.ended_at.map(from_millis).transpose()?,
            }))
        })
    }

    fn put(&self, conversation: Conversation) -> StoreFuture<'_, ConversationResult<()>> {
        Box::pin(async move {
            let brief = conversation
                .intake_brief
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            let messages = conversation
                .messages
                .iter()
                .map(MessageRow::encode)
                .collect::<ConversationResult<Vec<_>>>()?;
            let id = conversation.id;
            let status = conversation.status.to_string();
            let name = conversation.participant_name;
            let email = conversation.participant_email;
            let notes = conversation.notes;
            let created_at = conversation.created_at.timestamp_millis();
            let updated_at = conversation.updated_at.timestamp_millis();
            let ended_at = conversation.ended_at.map(|ts| ts.timestamp_millis());

            self.conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    tx.execute(
                        "INSERT INTO conversations
                            (id, status, participant_name, participant_email, intake_brief,
                             notes, created_at, updated_at, ended_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                         ON CONFLICT (id) DO UPDATE SET
                            status = excluded.status,
                            participant_name = excluded.participant_name,
                            participant_email = excluded.participant_email,
                            intake_brief = excluded.intake_brief,
                            notes = excluded.notes,
                            updated_at = excluded.updated_at,
                            ended_at = excluded.ended_at",
                        rusqlite::params![
                            id, status, name, email, brief, notes, created_at, updated_at, ended_at
                        ],
                    )?;
                    {
                        let mut stmt = tx.prepare(
                            "INSERT OR IGNORE INTO conversation_messages
                                (id, conversation_id, sequence, role, content, attachments, created_at)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                        )?;
                        for row in messages {
                            stmt.execute(rusqlite::params![
                                row.id,
                                id,
                                row.sequence,
                                row.role,
                                row.content,
                                row.attachments,
                                row.created_at
                            ])?;
                        }
                    }
                    tx.commit()?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }

    fn append_message(&self, message: Message) -> StoreFuture<'_, ConversationResult<()>> {
        Box::pin(async move {
            let conversation_id = message.conversation_id;
            let row = MessageRow::encode(&message)?;

            let found = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let updated = tx.execute(
                        "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
                        rusqlite::params![conversation_id, row.created_at],
                    )?;
                    if updated == 0 {
                        return Ok(false);
                    }
                    tx.execute(
                        "INSERT INTO conversation_messages
                            (id, conversation_id, sequence, role, content, attachments, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                        rusqlite::params![
                            row.id,
                            conversation_id,
                            row.sequence,
                            row.role,
                            row.content,
                            row.attachments,
                            row.created_at
                        ],
                    )?;
                    tx.commit()?;
                    Ok(true)
                })
                .await?;

            if found {
                Ok(())
            } else {
                Err(ConversationError::NotFound(conversation_id))
            }
        })
    }

    fn append_audit(&self, entry: AuditEntry) -> StoreFuture<'_, ConversationResult<()>> {
        Box::pin(async move {
            let details = serde_json::to_string(&entry.details)?;
            let conversation_id = entry.conversation_id;
            let action = entry.action.as_str();
            let recorded_at = entry.recorded_at.timestamp_millis();

            self.conn
                .call(move |conn| {
                    conn.execute(
                        "INSERT INTO conversation_audit
                            (conversation_id, action, details, recorded_at)
                         VALUES (?1, ?2, ?3, ?4)",
                        rusqlite::params![conversation_id, action, details, recorded_at],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }

    fn audit_log(&self, id: ConversationId) -> StoreFuture<'_, ConversationResult<Vec<AuditEntry>>> {
        Box::pin(async move {
            let rows = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(
                        "SELECT action, details, recorded_at
                         FROM conversation_audit
                         WHERE conversation_id = ?1
                         ORDER BY id ASC",
                    )?;
                    let rows = stmt
                        .query_map(rusqlite::params![id], |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, i64>(2)?,
                            ))
                        })?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                    Ok(rows)
                })
                .await?;

            rows.into_iter()
                .map(|(action, details, recorded_at)| -> ConversationResult<AuditEntry> {
                    Ok(AuditEntry {
                        conversation_id: id,
                        action: AuditAction::from_str(&action).map_err(|action| {
                            ConversationError::CorruptRecord(format!("invalid audit action: {action}"))
                        })?,
                        details: serde_json::from_str(&details)?,
                        recorded_at: from_millis(recorded_at)?,
                    })
                })
                .collect()
        })
    }
}
