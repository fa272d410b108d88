use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use crate::errors::Error;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_POOL_SIZE: usize = 16;
pub const DEFAULT_SNAPLEN: usize = 65535;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// One side of the bridged connection.
///
/// `A` is the client-facing peer (the first to be accepted), `B` the
/// server-facing one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

/// Transport protocol stamped into packet headers.
///
/// Metadata only: the bridge itself always speaks TCP, `proto` selects the
/// protocol number reported to the consumer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Proto {
    #[default]
    Tcp,
    Udp,
}

impl Proto {
    /// The IP protocol number for this transport.
    pub fn number(self) -> u8 {
        match self {
            Proto::Tcp => libc::IPPROTO_TCP as u8,
            Proto::Udp => libc::IPPROTO_UDP as u8,
        }
    }
}

impl FromStr for Proto {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "tcp" => Ok(Proto::Tcp),
            "udp" => Ok(Proto::Udp),
            _ => Err(Error::Config(format!("bad proto ({s})"))),
        }
    }
}

/// Forwarding decision attached to a packet at finalize time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum Verdict {
    Pass,
    Block,
    Replace,
    Allowlist,
    Denylist,
    Ignore,
}

// forward all but drops and denylists
const FORWARD: [bool; Verdict::COUNT] = [true, false, true, true, false, true];

impl Verdict {
    pub const COUNT: usize = 6;

    /// Whether this verdict relays the payload to the opposite peer.
    pub fn forwards(self) -> bool {
        FORWARD[self as usize]
    }
}

/// Outcome of a [`receive`](crate::api::Bridge::receive) call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecvStatus {
    /// The batch is complete, or no more data was immediately available.
    Ok,
    /// An interrupt was observed; the flag has been cleared.
    Interrupted,
    /// The descriptor pool is exhausted; no read was attempted.
    NoBuffer,
}

/// Per-packet flow flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MsgFlags {
    /// The peer connection carrying this packet was just accepted.
    pub start_of_flow: bool,
    /// The peer closed or reset; its recorded address has been cleared.
    pub end_of_flow: bool,
    /// The packet travels from the client-facing peer toward the server.
    pub to_server: bool,
}

/// Header stamped onto every descriptor when a message is read.
///
/// All fields are overwritten on each read; nothing is inherited from a
/// prior use of the descriptor.
#[derive(Clone, Debug)]
pub struct PktHeader {
    /// Capture timestamp.
    pub ts: SystemTime,
    /// Payload length in bytes.
    pub pktlen: usize,
    /// Address of the peer the packet came from, if still connected.
    pub src: Option<SocketAddr>,
    /// Address of the peer the packet is headed to, if connected.
    pub dst: Option<SocketAddr>,
    /// IP protocol number from the `proto` option.
    pub ip_proto: u8,
    /// Which peer the packet arrived on.
    pub ingress: Side,
    pub flags: MsgFlags,
}

impl Default for PktHeader {
    fn default() -> Self {
        Self {
            ts: SystemTime::UNIX_EPOCH,
            pktlen: 0,
            src: None,
            dst: None,
            ip_proto: 0,
            ingress: Side::A,
            flags: MsgFlags::default(),
        }
    }
}

/// Running counters owned by one bridge.
#[derive(Clone, Debug, Default)]
pub struct Stats {
    pub packets_received: u64,
    pub packets_injected: u64,
    /// Finalize counts indexed by `Verdict as usize`.
    pub verdicts: [u64; Verdict::COUNT],
}

/// Descriptor pool occupancy report.
#[derive(Clone, Copy, Debug)]
pub struct PoolInfo {
    pub size: usize,
    pub available: usize,
    pub mem_size: usize,
}

/// Cloneable handle that requests early return from a blocked receive.
#[derive(Clone, Debug, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Consumes a pending interrupt, if any.
    pub(crate) fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// Bridge configuration.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// Listening TCP port; 0 picks an ephemeral port.
    pub port: u16,
    /// Protocol number stamped into headers (the transport is always TCP).
    pub proto: Proto,
    /// Per-descriptor buffer capacity in bytes.
    pub snaplen: usize,
    /// Poll timeout; bounds how quickly an interrupt is observed.
    pub timeout: Duration,
    /// Number of preallocated descriptors.
    pub pool_size: usize,
    /// Replicate traffic to the opposite peer regardless of verdict.
    pub passive: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            proto: Proto::Tcp,
            snaplen: DEFAULT_SNAPLEN,
            timeout: DEFAULT_TIMEOUT,
            pool_size: DEFAULT_POOL_SIZE,
            passive: false,
        }
    }
}

impl BridgeConfig {
    /// Builds a configuration from `(key, value)` string pairs.
    ///
    /// Recognized keys: `port`, `proto`, `size`, `snaplen`, `timeout`
    /// (milliseconds). Unknown keys and out-of-range values are rejected.
    pub fn from_vars<'a, I>(vars: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut cfg = Self::default();
        for (key, value) in vars {
            match key {
                "port" => {
                    cfg.port = value
                        .parse::<u16>()
                        .ok()
                        .filter(|p| *p > 0)
                        .ok_or_else(|| Error::Config(format!("bad port ({value})")))?;
                }
                "proto" => cfg.proto = value.parse()?,
                "size" => {
                    cfg.pool_size = value
                        .parse::<usize>()
                        .ok()
                        .filter(|s| *s > 0)
                        .ok_or_else(|| Error::Config(format!("bad pool size ({value})")))?;
                }
                "snaplen" => {
                    cfg.snaplen = value
                        .parse::<usize>()
                        .ok()
                        .filter(|s| *s > 0)
                        .ok_or_else(|| Error::Config(format!("bad snaplen ({value})")))?;
                }
                "timeout" => {
                    let ms = value
                        .parse::<u64>()
                        .map_err(|_| Error::Config(format!("bad timeout ({value})")))?;
                    cfg.timeout = Duration::from_millis(ms);
                }
                _ => return Err(Error::Config(format!("unknown variable name: '{key}'"))),
            }
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_table_forwards_all_but_drops() {
        assert!(Verdict::Pass.forwards());
        assert!(!Verdict::Block.forwards());
        assert!(Verdict::Replace.forwards());
        assert!(Verdict::Allowlist.forwards());
        assert!(!Verdict::Denylist.forwards());
        assert!(Verdict::Ignore.forwards());
    }

    #[test]
    fn config_defaults() {
        let cfg = BridgeConfig::from_vars([]).unwrap();
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.proto, Proto::Tcp);
        assert_eq!(cfg.pool_size, DEFAULT_POOL_SIZE);
        assert_eq!(cfg.snaplen, DEFAULT_SNAPLEN);
        assert_eq!(cfg.timeout, DEFAULT_TIMEOUT);
        assert!(!cfg.passive);
    }

    #[test]
    fn config_parses_vars() {
        let cfg =
            BridgeConfig::from_vars([("port", "9000"), ("proto", "udp"), ("size", "32")]).unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.proto, Proto::Udp);
        assert_eq!(cfg.proto.number(), libc::IPPROTO_UDP as u8);
        assert_eq!(cfg.pool_size, 32);
    }

    #[test]
    fn config_rejects_bad_values() {
        assert!(BridgeConfig::from_vars([("port", "0")]).is_err());
        assert!(BridgeConfig::from_vars([("port", "70000")]).is_err());
        assert!(BridgeConfig::from_vars([("port", "nope")]).is_err());
        assert!(BridgeConfig::from_vars([("proto", "sctp")]).is_err());
        assert!(BridgeConfig::from_vars([("mtu", "1500")]).is_err());
    }
}
