//! Broker error taxonomy.
//!
//! Most peer-facing error conditions (malformed frames, unknown jobs, status
//! regressions) are not represented here at all — they are logged and
//! swallowed at the point of detection, per the "never abort on a peer
//! error" rule. [`BrokerError`] is reserved for the conditions that should
//! actually stop `run()` and surface to `main`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrokerError>;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("failed to bind {socket} socket to {addr}: {source}")]
    Bind {
        socket: &'static str,
        addr: String,
        #[source]
        source: zmq::Error,
    },

    #[error("poll error: {0}")]
    Poll(#[source] zmq::Error),

    #[error("send error on {socket} socket: {source}")]
    Send {
        socket: &'static str,
        #[source]
        source: zmq::Error,
    },
}
