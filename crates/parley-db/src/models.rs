/// Database row types — these map directly to SQLite rows.
/// Distinct from parley-types wire models to keep the DB layer independent.

pub struct ChannelUserRow {
    pub username: String,
    pub password: String,
}

pub struct ChannelMessageRow {
    pub id: i64,
    pub username: String,
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    pub created_at: String,
}

pub struct DirectUserRow {
    pub id: i64,
    pub username: String,
    pub password: String,
}

pub struct DirectMessageRow {
    pub id: i64,
    pub sender: String,
    pub recipient: String,
    pub body: String,
    pub kind: String,
    pub timestamp: f64,
    pub seen: bool,
}
