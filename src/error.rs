//! Structured error taxonomy for the surveillance engine.
//!
//! Most internal code propagates with `anyhow::Result` the way the reference
//! backend does; `EngineError` exists at the seams (subscription client, REST
//! client) where a caller needs to match on the failure kind rather than just
//! log and move on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: malformed payload: {0}")]
    Protocol(String),

    #[error("rate limited after {attempts} attempts")]
    RateLimit { attempts: u32 },

    #[error("upstream returned {status}: {body}")]
    UpstreamHttp { status: u16, body: String },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("persistence error: {0}")]
    Persistence(String),
}
