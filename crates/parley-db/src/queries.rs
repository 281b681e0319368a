use crate::Database;
use crate::models::{ChannelMessageRow, ChannelUserRow, DirectMessageRow, DirectUserRow};
use anyhow::Result;
use rusqlite::Connection;

impl Database {
    // -- Channel users --

    pub fn create_channel_user(&self, username: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO channel_users (username, password) VALUES (?1, ?2)",
                (username, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn get_channel_user(&self, username: &str) -> Result<Option<ChannelUserRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT username, password FROM channel_users WHERE username = ?1")?;
            let row = stmt
                .query_row([username], |row| {
                    Ok(ChannelUserRow {
                        username: row.get(0)?,
                        password: row.get(1)?,
                    })
                })
                .optional()?;
            Ok(row)
        })
    }

    // -- Channel messages --

    pub fn append_channel_message(
        &self,
        username: &str,
        ciphertext: &[u8],
        nonce: &[u8],
        created_at: &str,
    ) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO channel_messages (username, ciphertext, nonce, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![username, ciphertext, nonce, created_at],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Full channel history in append order (ascending id).
    pub fn channel_history(&self) -> Result<Vec<ChannelMessageRow>> {
        self.with_conn(|conn| query_channel_history(conn))
    }

    // -- Direct users --

    pub fn create_direct_user(&self, username: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO direct_users (username, password) VALUES (?1, ?2)",
                (username, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn get_direct_user(&self, username: &str) -> Result<Option<DirectUserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, username, password FROM direct_users WHERE username = ?1")?;
            let row = stmt
                .query_row([username], |row| {
                    Ok(DirectUserRow {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        password: row.get(2)?,
                    })
                })
                .optional()?;
            Ok(row)
        })
    }

    /// Every registered direct user except `exclude` (the caller).
    pub fn list_direct_usernames(&self, exclude: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT username FROM direct_users WHERE username != ?1 ORDER BY username",
            )?;
            let rows = stmt
                .query_map([exclude], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(rows)
        })
    }

    // -- Direct messages --

    pub fn append_direct_message(
        &self,
        sender: &str,
        recipient: &str,
        body: &str,
        kind: &str,
        timestamp: f64,
    ) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO direct_messages (sender, recipient, body, kind, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![sender, recipient, body, kind, timestamp],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// History between `a` and `b`, both directions, ascending timestamp.
    pub fn direct_history(&self, a: &str, b: &str) -> Result<Vec<DirectMessageRow>> {
        self.with_conn(|conn| query_direct_history(conn, a, b))
    }

    /// Flip seen=1 for every message `sender` -> `recipient`. One direction
    /// only; the reverse leg is untouched. Returns the number of rows changed.
    pub fn mark_seen(&self, sender: &str, recipient: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE direct_messages SET seen = 1 WHERE sender = ?1 AND recipient = ?2",
                (sender, recipient),
            )?;
            Ok(changed)
        })
    }
}

fn query_channel_history(conn: &Connection) -> Result<Vec<ChannelMessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, username, ciphertext, nonce, created_at
         FROM channel_messages
         ORDER BY id ASC",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok(ChannelMessageRow {
                id: row.get(0)?,
                username: row.get(1)?,
                ciphertext: row.get(2)?,
                nonce: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_direct_history(conn: &Connection, a: &str, b: &str) -> Result<Vec<DirectMessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, sender, recipient, body, kind, timestamp, seen
         FROM direct_messages
         WHERE (sender = ?1 AND recipient = ?2) OR (sender = ?2 AND recipient = ?1)
         ORDER BY timestamp ASC",
    )?;

    let rows = stmt
        .query_map([a, b], |row| {
            Ok(DirectMessageRow {
                id: row.get(0)?,
                sender: row.get(1)?,
                recipient: row.get(2)?,
                body: row.get(3)?,
                kind: row.get(4)?,
                timestamp: row.get(5)?,
                seen: row.get::<_, i64>(6)? != 0,
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
    use crate::{Database, unique_violation};

    #[test]
    fn duplicate_channel_username_is_unique_violation() {
        let db = Database::open_in_memory().unwrap();
        db.create_channel_user("alice", "digest-1").unwrap();

        let err = db.create_channel_user("alice", "digest-2").unwrap_err();
        assert!(unique_violation(&err));

        // First credential row is unchanged.
        let row = db.get_channel_user("alice").unwrap().unwrap();
        assert_eq!(row.password, "digest-1");
    }

    #[test]
    fn duplicate_direct_username_is_unique_violation() {
        let db = Database::open_in_memory().unwrap();
        db.create_direct_user("bob", "digest-1").unwrap();

        let err = db.create_direct_user("bob", "digest-2").unwrap_err();
        assert!(unique_violation(&err));
    }

    #[test]
    fn direct_history_is_pair_scoped_and_ascending() {
        let db = Database::open_in_memory().unwrap();
        db.append_direct_message("alice", "bob", "second", "text", 20.0)
            .unwrap();
        db.append_direct_message("bob", "alice", "first", "text", 10.0)
            .unwrap();
        db.append_direct_message("alice", "carol", "other pair", "text", 15.0)
            .unwrap();

        let history = db.direct_history("alice", "bob").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].body, "first");
        assert_eq!(history[1].body, "second");
        assert!(history.iter().all(|m| {
            (m.sender == "alice" && m.recipient == "bob")
                || (m.sender == "bob" && m.recipient == "alice")
        }));
    }

    #[test]
    fn mark_seen_is_one_directional() {
        let db = Database::open_in_memory().unwrap();
        db.append_direct_message("partner", "me", "hi", "text", 1.0)
            .unwrap();
        db.append_direct_message("partner", "me", "there", "text", 2.0)
            .unwrap();
        db.append_direct_message("me", "partner", "hello back", "text", 3.0)
            .unwrap();

        let changed = db.mark_seen("partner", "me").unwrap();
        assert_eq!(changed, 2);

        let history = db.direct_history("me", "partner").unwrap();
        for m in &history {
            if m.sender == "partner" {
                assert!(m.seen, "partner -> me messages must be seen");
            } else {
                assert!(!m.seen, "me -> partner messages must be untouched");
            }
        }
    }

    #[test]
    fn mark_seen_never_reverses() {
        let db = Database::open_in_memory().unwrap();
        db.append_direct_message("a", "b", "x", "text", 1.0).unwrap();
        db.mark_seen("a", "b").unwrap();
        // A second pass (e.g. reloading history) keeps the flag set.
        db.mark_seen("a", "b").unwrap();
        let history = db.direct_history("a", "b").unwrap();
        assert!(history[0].seen);
    }

    #[test]
    fn channel_history_preserves_append_order() {
        let db = Database::open_in_memory().unwrap();
        for i in 0..3 {
            db.append_channel_message("alice", &[i], &[0u8; 12], "2026-01-01T00:00:00Z")
                .unwrap();
        }
        let rows = db.channel_history().unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[test]
    fn list_direct_usernames_excludes_caller() {
        let db = Database::open_in_memory().unwrap();
        db.create_direct_user("alice", "d").unwrap();
        db.create_direct_user("bob", "d").unwrap();

        let users = db.list_direct_usernames("alice").unwrap();
        assert_eq!(users, vec!["bob".to_string()]);
    }
}
