use thiserror::Error;

/// Error taxonomy shared by the REST handlers and both gateway variants.
///
/// Authentication and registration failures are reported only to the
/// originating connection; `DecryptionFailure` is skip-and-continue during
/// history replay and never aborts a load.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("invalid username or password")]
    InvalidCredentials,

    /// Source address is locked out; carries the remaining seconds.
    #[error("too many failed attempts, locked for {0}s")]
    RateLimited(u64),

    #[error("username already taken")]
    UsernameTaken,

    /// Stored ciphertext could not be decrypted (malformed or legacy row).
    #[error("could not decrypt stored message")]
    DecryptionFailure,

    #[error("upload rejected: {0}")]
    UploadRejected(&'static str),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
