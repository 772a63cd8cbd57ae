//! Client error taxonomy.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("failed to connect to broker at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: zeromq::ZmqError,
    },

    #[error("send to broker failed: {0}")]
    Send(#[source] zeromq::ZmqError),

    #[error("recv from broker timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("recv from broker failed: {0}")]
    Recv(#[source] zeromq::ZmqError),

    #[error("broker response was empty")]
    EmptyResponse,

    #[error("protocol error: {0}")]
    Protocol(#[from] remus_protocol::ProtocolError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected response body for this request")]
    UnexpectedResponse,
}
