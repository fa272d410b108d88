pub mod api;
pub mod bridge;
pub mod errors;
pub mod pool;
mod sock;
pub mod types;

pub use api::{Bridge, MsgToken, Result};
pub use bridge::SocketBridge;
pub use errors::Error;
pub use types::{
    BridgeConfig, Interrupt, MsgFlags, PktHeader, PoolInfo, Proto, RecvStatus, Side, Stats,
    Verdict,
};
