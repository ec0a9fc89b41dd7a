use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (users, messages)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id                      TEXT PRIMARY KEY,
                username                TEXT NOT NULL UNIQUE,
                email                   TEXT NOT NULL UNIQUE,
                password                TEXT NOT NULL,
                verify_code             TEXT NOT NULL,
                verify_code_expires_at  TEXT NOT NULL,
                is_verified             INTEGER NOT NULL DEFAULT 0,
                is_accepting_messages   INTEGER NOT NULL DEFAULT 1,
                created_at              TEXT NOT NULL
            );

            CREATE TABLE messages (
                id              TEXT PRIMARY KEY,
                recipient_id    TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                sender_id       TEXT REFERENCES users(id) ON DELETE SET NULL,
                content         TEXT NOT NULL,
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_messages_recipient
                ON messages(recipient_id, created_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
