use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);"
    )?;

    let version: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            BEGIN;

            CREATE TABLE users (
                user_id         TEXT PRIMARY KEY,
                display_name    TEXT NOT NULL DEFAULT '',
                avatar_url      TEXT,
                created_at      TEXT NOT NULL
            );

            CREATE TABLE messages (
                message_id      INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id         TEXT NOT NULL REFERENCES users(user_id),
                channel_id      TEXT NOT NULL,
                display_name    TEXT NOT NULL DEFAULT '',
                avatar_url      TEXT,
                content         TEXT NOT NULL,
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_messages_channel
                ON messages(channel_id, created_at);

            CREATE TABLE polls (
                poll_id         INTEGER PRIMARY KEY AUTOINCREMENT,
                question        TEXT NOT NULL,
                created_by      TEXT NOT NULL REFERENCES users(user_id),
                created_at      TEXT NOT NULL
            );

            CREATE TABLE poll_options (
                option_id       INTEGER PRIMARY KEY AUTOINCREMENT,
                poll_id         INTEGER NOT NULL REFERENCES polls(poll_id) ON DELETE CASCADE,
                option_text     TEXT NOT NULL,
                UNIQUE(poll_id, option_text)
            );

            CREATE TABLE poll_votes (
                vote_id         INTEGER PRIMARY KEY AUTOINCREMENT,
                poll_id         INTEGER NOT NULL REFERENCES polls(poll_id) ON DELETE CASCADE,
                option_id       INTEGER NOT NULL REFERENCES poll_options(option_id) ON DELETE CASCADE,
                user_id         TEXT NOT NULL REFERENCES users(user_id),
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_poll_votes_poll
                ON poll_votes(poll_id, user_id);

            INSERT INTO schema_version (version) VALUES (1);

            COMMIT;
            "
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
