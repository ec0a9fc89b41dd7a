use crate::models::{MessageRow, NewUser, UserRow};
use crate::Database;
use anyhow::Result;
use rusqlite::{Connection, Row};

const USER_COLUMNS: &str = "id, username, email, password, verify_code, verify_code_expires_at, \
                            is_verified, is_accepting_messages, created_at";

impl Database {
    // -- Users --

    pub fn create_user(&self, user: &NewUser<'_>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, email, password,
                                    verify_code, verify_code_expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    user.id,
                    user.username,
                    user.email,
                    user.password_hash,
                    user.verify_code,
                    user.verify_code_expires_at,
                    user.created_at,
                ],
            )?;
            Ok(())
        })
    }

    /// Repurpose an unverified account for a new registration attempt:
    /// new username, password and verification code on the same row.
    /// Returns false if the row has since been verified or removed.
    pub fn update_pending_user(
        &self,
        id: &str,
        username: &str,
        password_hash: &str,
        verify_code: &str,
        verify_code_expires_at: &str,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE users
                 SET username = ?2, password = ?3, verify_code = ?4, verify_code_expires_at = ?5
                 WHERE id = ?1 AND is_verified = 0",
                rusqlite::params![id, username, password_hash, verify_code, verify_code_expires_at],
            )?;
            Ok(updated > 0)
        })
    }

    /// Remove an account that never completed verification.
    /// Returns false if the row is gone or has since been verified.
    pub fn delete_unverified_user(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed =
                conn.execute("DELETE FROM users WHERE id = ?1 AND is_verified = 0", [id])?;
            Ok(removed > 0)
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id = ?1", id))
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username = ?1", username))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email = lower(?1)", email))
    }

    /// Sign-in lookup: the identifier may be either a username or an email.
    pub fn get_user_by_identifier(&self, identifier: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username = ?1 OR email = lower(?1)", identifier))
    }

    /// Flip a pending account to verified. Returns false if the row is gone
    /// or was already verified.
    pub fn mark_verified(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE users SET is_verified = 1 WHERE id = ?1 AND is_verified = 0",
                [id],
            )?;
            Ok(updated > 0)
        })
    }

    pub fn set_accepting_messages(&self, id: &str, accepting: bool) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE users SET is_accepting_messages = ?2 WHERE id = ?1",
                rusqlite::params![id, accepting],
            )?;
            Ok(updated > 0)
        })
    }

    pub fn get_accepting_messages(&self, id: &str) -> Result<Option<bool>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT is_accepting_messages FROM users WHERE id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        id: &str,
        recipient_id: &str,
        sender_id: Option<&str>,
        content: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, recipient_id, sender_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, recipient_id, sender_id, content, created_at],
            )?;
            Ok(())
        })
    }

    /// All messages received by `recipient_id`, newest first.
    pub fn get_messages_for_recipient(&self, recipient_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages(conn, recipient_id))
    }

    /// Delete a message only if it belongs to `recipient_id`.
    pub fn delete_message(&self, id: &str, recipient_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM messages WHERE id = ?1 AND recipient_id = ?2",
                [id, recipient_id],
            )?;
            Ok(removed > 0)
        })
    }

    pub fn count_messages_for_recipient(&self, recipient_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE recipient_id = ?1",
                [recipient_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        verify_code: row.get(4)?,
        verify_code_expires_at: row.get(5)?,
        is_verified: row.get(6)?,
        is_accepting_messages: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn query_user(conn: &Connection, predicate: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {predicate} LIMIT 1");
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_row([value], user_from_row).optional()
}

fn query_messages(conn: &Connection, recipient_id: &str) -> Result<Vec<MessageRow>> {
    // JOIN users to fetch the sender's username in a single query
    let mut stmt = conn.prepare(
        "SELECT m.id, m.recipient_id, m.sender_id, u.username, m.content, m.created_at
         FROM messages m
         LEFT JOIN users u ON m.sender_id = u.id
         WHERE m.recipient_id = ?1
         ORDER BY m.created_at DESC, m.rowid DESC",
    )?;

    let rows = stmt
        .query_map([recipient_id], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                recipient_id: row.get(1)?,
                sender_id: row.get(2)?,
                sender_username: row.get(3)?,
                content: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp;
    use chrono::{Duration, TimeZone, Utc};
    use uuid::Uuid;

    fn seed_user(db: &Database, username: &str, email: &str) -> String {
        let id = Uuid::new_v4().to_string();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        db.create_user(&NewUser {
            id: &id,
            username,
            email,
            password_hash: "hash",
            verify_code: "123456",
            verify_code_expires_at: &timestamp(now + Duration::hours(1)),
            created_at: &timestamp(now),
        })
        .unwrap();
        id
    }

    #[test]
    fn new_users_are_unverified_and_accepting() {
        let db = Database::open_in_memory().unwrap();
        let id = seed_user(&db, "alice", "alice@x.com");

        let user = db.get_user_by_id(&id).unwrap().unwrap();
        assert!(!user.is_verified);
        assert!(user.is_accepting_messages);
        assert_eq!(user.verify_code, "123456");
    }

    #[test]
    fn identifier_matches_username_or_email() {
        let db = Database::open_in_memory().unwrap();
        let id = seed_user(&db, "alice", "alice@x.com");

        assert_eq!(db.get_user_by_identifier("alice").unwrap().unwrap().id, id);
        assert_eq!(db.get_user_by_identifier("Alice@X.com").unwrap().unwrap().id, id);
        assert!(db.get_user_by_identifier("bob").unwrap().is_none());
    }

    #[test]
    fn duplicate_username_is_rejected_by_the_store() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "alice", "alice@x.com");

        let now = timestamp(Utc::now());
        let result = db.create_user(&NewUser {
            id: "other",
            username: "alice",
            email: "someone@else.com",
            password_hash: "hash",
            verify_code: "654321",
            verify_code_expires_at: &now,
            created_at: &now,
        });
        assert!(result.is_err());
    }

    #[test]
    fn verified_users_are_not_repurposed_or_deleted() {
        let db = Database::open_in_memory().unwrap();
        let id = seed_user(&db, "alice", "alice@x.com");
        assert!(db.mark_verified(&id).unwrap());
        assert!(!db.mark_verified(&id).unwrap());

        assert!(!db.update_pending_user(&id, "mallory", "hash2", "000000", "later").unwrap());
        assert!(!db.delete_unverified_user(&id).unwrap());

        let user = db.get_user_by_id(&id).unwrap().unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.verify_code, "123456");
    }

    #[test]
    fn messages_list_newest_first_with_sender() {
        let db = Database::open_in_memory().unwrap();
        let bob = seed_user(&db, "bob", "bob@x.com");
        let carol = seed_user(&db, "carol", "carol@x.com");
        let base = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();

        db.insert_message("m1", &bob, None, "first", &timestamp(base)).unwrap();
        let later = timestamp(base + Duration::seconds(5));
        db.insert_message("m2", &bob, Some(&carol), "second", &later).unwrap();
        db.insert_message("m3", &carol, None, "not bob's", &timestamp(base)).unwrap();

        let rows = db.get_messages_for_recipient(&bob).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "m2");
        assert_eq!(rows[0].sender_username.as_deref(), Some("carol"));
        assert_eq!(rows[1].id, "m1");
        assert!(rows[1].sender_username.is_none());
    }

    #[test]
    fn delete_requires_ownership() {
        let db = Database::open_in_memory().unwrap();
        let bob = seed_user(&db, "bob", "bob@x.com");
        let carol = seed_user(&db, "carol", "carol@x.com");
        db.insert_message("m1", &bob, None, "hi", &timestamp(Utc::now())).unwrap();

        assert!(!db.delete_message("m1", &carol).unwrap());
        assert_eq!(db.count_messages_for_recipient(&bob).unwrap(), 1);

        assert!(db.delete_message("m1", &bob).unwrap());
        assert!(!db.delete_message("m1", &bob).unwrap());
        assert_eq!(db.count_messages_for_recipient(&bob).unwrap(), 0);
    }

    #[test]
    fn accepting_flag_round_trips() {
        let db = Database::open_in_memory().unwrap();
        let id = seed_user(&db, "bob", "bob@x.com");

        assert!(db.set_accepting_messages(&id, false).unwrap());
        assert_eq!(db.get_accepting_messages(&id).unwrap(), Some(false));
        assert!(db.set_accepting_messages(&id, true).unwrap());
        assert_eq!(db.get_accepting_messages(&id).unwrap(), Some(true));
        assert_eq!(db.get_accepting_messages("missing").unwrap(), None);
    }
}
