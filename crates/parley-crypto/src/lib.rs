/// Parley crypto helpers.
///
/// Channel message content is encrypted at rest with a single symmetric key
/// (AES-256-GCM) held in a key file next to the database. Direct messages
/// are deliberately NOT encrypted at rest — the two subsystems diverge and
/// the divergence is preserved on purpose (see DESIGN.md).
pub mod encrypt;
pub mod keys;
pub mod password;
