//! Worker error taxonomy.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WorkerError>;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("failed to connect to broker at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: zeromq::ZmqError,
    },

    #[error("send to broker failed: {0}")]
    Send(#[source] zeromq::ZmqError),

    #[error("recv from broker failed: {0}")]
    Recv(#[source] zeromq::ZmqError),

    #[error("protocol error: {0}")]
    Protocol(#[from] remus_protocol::ProtocolError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("job assignment carried no submission payload")]
    MissingSubmission,
}
