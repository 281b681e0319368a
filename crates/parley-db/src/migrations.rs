use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- Channel context: socket-event auth, content encrypted at rest.
        CREATE TABLE IF NOT EXISTS channel_users (
            username    TEXT PRIMARY KEY,
            password    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS channel_messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            username    TEXT NOT NULL,
            ciphertext  BLOB NOT NULL,
            nonce       BLOB NOT NULL,
            created_at  TEXT NOT NULL
        );

        -- Direct context: REST auth, plaintext body, seen flags.
        CREATE TABLE IF NOT EXISTS direct_users (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            username    TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS direct_messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            sender      TEXT NOT NULL,
            recipient   TEXT NOT NULL,
            body        TEXT NOT NULL,
            kind        TEXT NOT NULL DEFAULT 'text',
            timestamp   REAL NOT NULL,
            seen        INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_direct_pair
            ON direct_messages(sender, recipient, timestamp);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
