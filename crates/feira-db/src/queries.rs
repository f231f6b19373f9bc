use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use feira_types::api::OutgoingMessage;
use feira_types::models::{Conversation, Location, Message};

use crate::Database;
use crate::models::{ConversationRow, MessageRow};

/// Fixed-width UTC timestamps so that text order equals time order.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, ad_id, content, image_url, \
     latitude, longitude, address, read, created_at";

/// Result of a receiver marking one of their messages as read.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    /// This call flipped `read` from false to true.
    Transitioned(Message),
    /// The message was already read; nothing changed.
    AlreadyRead,
    /// No message with that id was addressed to the reader.
    NotFound,
}

impl Database {
    // -- Messages --

    /// Store a new unread message. Id and timestamp are assigned here, inside
    /// the writer lock, so commit order and timestamp order agree.
    pub fn insert_message(&self, sender_id: &str, msg: &OutgoingMessage) -> Result<Message> {
        self.with_conn_mut(|conn| {
            let id = Uuid::now_v7();
            let created_at = next_timestamp(conn)?;
            let (latitude, longitude, address) = match &msg.location {
                Some(loc) => (Some(loc.lat), Some(loc.lng), loc.address.clone()),
                None => (None, None, None),
            };

            conn.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, ad_id, content, image_url,
                                       latitude, longitude, address, read, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10)",
                rusqlite::params![
                    id.to_string(),
                    sender_id,
                    msg.receiver_id,
                    msg.ad_id,
                    msg.content,
                    msg.image_url,
                    latitude,
                    longitude,
                    address,
                    created_at.format(TIMESTAMP_FORMAT).to_string(),
                ],
            )?;

            Ok(Message {
                id,
                sender_id: sender_id.to_string(),
                receiver_id: msg.receiver_id.clone(),
                ad_id: msg.ad_id.clone(),
                content: msg.content.clone(),
                image_url: msg.image_url.clone(),
                location: msg.location.clone(),
                read: false,
                created_at,
            })
        })
    }

    pub fn get_message_by_id(&self, id: Uuid) -> Result<Option<Message>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    /// Flip `read` to true. Returns true only if this call changed it.
    pub fn set_message_read(&self, id: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET read = 1 WHERE id = ?1 AND read = 0",
                [id.to_string()],
            )?;
            Ok(changed == 1)
        })
    }

    /// Compare-and-set of the read flag, scoped to the receiver. Concurrent
    /// callers are serialized by the writer lock, so exactly one of them
    /// observes `Transitioned`.
    pub fn mark_read_by_receiver(&self, id: Uuid, reader_id: &str) -> Result<ReadOutcome> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET read = 1 WHERE id = ?1 AND receiver_id = ?2 AND read = 0",
                rusqlite::params![id.to_string(), reader_id],
            )?;

            if changed == 1 {
                let message = query_message(conn, id)?
                    .ok_or_else(|| anyhow!("Message {} vanished after update", id))?;
                return Ok(ReadOutcome::Transitioned(message));
            }

            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM messages WHERE id = ?1 AND receiver_id = ?2)",
                rusqlite::params![id.to_string(), reader_id],
                |row| row.get(0),
            )?;

            Ok(if exists {
                ReadOutcome::AlreadyRead
            } else {
                ReadOutcome::NotFound
            })
        })
    }

    /// History between two users, newest first. `before` is the id of the
    /// oldest message of the previous page; rows strictly older than it in
    /// `(created_at, seq)` order are returned. An unknown cursor yields an
    /// empty page.
    pub fn get_messages_between(
        &self,
        user_id: &str,
        counterpart_id: &str,
        limit: u32,
        before: Option<Uuid>,
    ) -> Result<Vec<Message>> {
        let before = before.map(|id| id.to_string());
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages m
                 WHERE ((m.sender_id = ?1 AND m.receiver_id = ?2)
                        OR (m.sender_id = ?2 AND m.receiver_id = ?1))
                   AND (?3 IS NULL OR EXISTS (
                        SELECT 1 FROM messages c
                        WHERE c.id = ?3
                          AND (m.created_at < c.created_at
                               OR (m.created_at = c.created_at AND m.seq < c.seq))))
                 ORDER BY m.created_at DESC, m.seq DESC
                 LIMIT ?4"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![user_id, counterpart_id, before, limit],
                    |row| message_row(row),
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter().map(MessageRow::into_message).collect()
        })
    }

    // -- Conversations --

    /// One entry per counterpart, most recent conversation first.
    pub fn list_conversations_for(&self, user_id: &str) -> Result<Vec<Conversation>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "WITH ranked AS (
                     SELECT m.*,
                            CASE WHEN m.sender_id = ?1 THEN m.receiver_id ELSE m.sender_id END
                                AS counterpart_id,
                            ROW_NUMBER() OVER (
                                PARTITION BY CASE WHEN m.sender_id = ?1
                                                  THEN m.receiver_id ELSE m.sender_id END
                                ORDER BY m.created_at DESC, m.seq DESC
                            ) AS rn
                     FROM messages m
                     WHERE m.sender_id = ?1 OR m.receiver_id = ?1
                 )
                 SELECT r.id, r.sender_id, r.receiver_id, r.ad_id, r.content, r.image_url,
                        r.latitude, r.longitude, r.address, r.read, r.created_at,
                        r.counterpart_id,
                        (SELECT COUNT(*) FROM messages u
                          WHERE u.receiver_id = ?1
                            AND u.sender_id = r.counterpart_id
                            AND u.read = 0) AS unread_count
                 FROM ranked r
                 WHERE r.rn = 1
                 ORDER BY r.created_at DESC, r.seq DESC",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(ConversationRow {
                        last_message: message_row(row)?,
                        counterpart_id: row.get(11)?,
                        unread_count: row.get(12)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|row| {
                    Ok(Conversation {
                        counterpart_id: row.counterpart_id,
                        last_message: row.last_message.into_message()?,
                        unread_count: u64::try_from(row.unread_count)?,
                    })
                })
                .collect()
        })
    }

    /// Unread messages sent by `counterpart_id` to `user_id`.
    pub fn count_unread(&self, user_id: &str, counterpart_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE receiver_id = ?1 AND sender_id = ?2 AND read = 0",
                rusqlite::params![user_id, counterpart_id],
                |row| row.get(0),
            )?;
            Ok(u64::try_from(count)?)
        })
    }

    /// Everyone this user has exchanged at least one message with.
    pub fn list_counterparts(&self, user_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT receiver_id FROM messages WHERE sender_id = ?1
                 UNION
                 SELECT sender_id FROM messages WHERE receiver_id = ?1",
            )?;
            let ids = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(ids)
        })
    }
}

impl MessageRow {
    pub fn into_message(self) -> Result<Message> {
        let id: Uuid = self
            .id
            .parse()
            .with_context(|| format!("Corrupt message id '{}'", self.id))?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .with_context(|| format!("Corrupt created_at '{}' on message {}", self.created_at, id))?
            .with_timezone(&Utc);
        let location = match (self.latitude, self.longitude) {
            (Some(lat), Some(lng)) => Some(Location {
                lat,
                lng,
                address: self.address,
            }),
            _ => None,
        };

        Ok(Message {
            id,
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            ad_id: self.ad_id,
            content: self.content,
            image_url: self.image_url,
            location,
            read: self.read,
            created_at,
        })
    }
}

fn query_message(conn: &Connection, id: Uuid) -> Result<Option<Message>> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
    let row = conn
        .query_row(&sql, [id.to_string()], |row| message_row(row))
        .optional()?;

    row.map(MessageRow::into_message).transpose()
}

fn message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        ad_id: row.get(3)?,
        content: row.get(4)?,
        image_url: row.get(5)?,
        latitude: row.get(6)?,
        longitude: row.get(7)?,
        address: row.get(8)?,
        read: row.get(9)?,
        created_at: row.get(10)?,
    })
}

/// Server time of acceptance, never earlier than the last stored message
/// (guards against the wall clock stepping backwards).
fn next_timestamp(conn: &Connection) -> Result<DateTime<Utc>> {
    let now = Utc::now().trunc_subsecs(6);
    let last: Option<String> = conn
        .query_row(
            "SELECT created_at FROM messages ORDER BY seq DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;

    let last = match last {
        Some(ts) => Some(DateTime::parse_from_rfc3339(&ts)?.with_timezone(&Utc)),
        None => None,
    };

    Ok(match last {
        Some(last) if last > now => last,
        _ => now,
    })
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
