//! Wire-protocol error taxonomy: framing/signing failures that never occur
//! in [`gokernel_core::errors`], since that crate knows nothing about the
//! message bus. Composed with the core crate's errors at the top level so
//! the kernel loop has one `Result` to reason about.

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] gokernel_core::Error),

    #[error("zmq error: {0}")]
    Zmq(#[from] zmq::Error),

    #[error("malformed frame sequence: {0}")]
    MalformedFrame(String),

    #[error("invalid HMAC signature on incoming frame")]
    InvalidSignature,

    #[error("connection file error: {0}")]
    Connection(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
