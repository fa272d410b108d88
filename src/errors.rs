use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("can't bind listener socket: {source}")]
    Bind {
        #[source]
        source: io::Error,
    },
    #[error("can't accept incoming connection: {source}")]
    Accept {
        #[source]
        source: io::Error,
    },
    #[error("can't send on socket: {source}")]
    Send {
        #[source]
        source: io::Error,
    },
    #[error("can't allocate {0} bytes for the descriptor pool")]
    NoMemory(usize),
    #[error("bad option: {0}")]
    Config(String),
    #[error("stale descriptor token")]
    StaleToken,
    #[error("{0}")]
    Generic(#[from] io::Error),
}
