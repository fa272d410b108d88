//! The acquisition context: two bridged peers, one descriptor pool, one
//! verdict-driven relay loop.

use std::time::SystemTime;

use tracing::{debug, warn};

use crate::api::{Bridge, MsgToken, Result};
use crate::pool::DescriptorPool;
use crate::sock::{PollEvent, RecvOutcome, SockPair};
use crate::types::{
    BridgeConfig, DEFAULT_POOL_SIZE, DEFAULT_SNAPLEN, Interrupt, MsgFlags, PktHeader, PoolInfo,
    RecvStatus, Side, Stats, Verdict,
};

/// Bridges a client-facing and a server-facing TCP peer.
///
/// Owns the listener, both peer endpoints, the descriptor pool and the
/// statistics. One thread drives the whole context; nothing here is shared
/// except the [`Interrupt`] handle.
pub struct SocketBridge {
    config: BridgeConfig,
    socks: SockPair,
    pool: DescriptorPool,
    /// Which side the next read goes to; `true` selects the client side.
    use_a: bool,
    interrupted: Interrupt,
    stats: Stats,
    local_port: Option<u16>,
}

impl SocketBridge {
    /// The port the listener actually bound, once started.
    pub fn local_port(&self) -> Option<u16> {
        self.local_port
    }

    /// Reads one message for the currently active side.
    ///
    /// Runs one poll cycle: receive from the active peer if it is connected,
    /// otherwise complete a pending connection for it. Afterwards the active
    /// side flips, but only while at least one peer is connected, so the
    /// client side is always served first on a fresh or fully reconnected
    /// bridge. The descriptor header is restamped whatever happened.
    fn read_message(&mut self, token: &MsgToken) -> usize {
        let side = if self.use_a { Side::A } else { Side::B };
        let mut flags = MsgFlags::default();
        let mut size = 0;

        match self.socks.poll_active(side, self.config.timeout) {
            PollEvent::PeerReadable => {
                let buf = self.pool.buffer_mut(token);
                match self.socks.recv(side, buf) {
                    RecvOutcome::Data(n) => size = n,
                    RecvOutcome::EndOfFlow => flags.end_of_flow = true,
                    RecvOutcome::Nothing => {}
                }
            }
            PollEvent::Pending => match self.socks.accept(side) {
                Ok(addr) => {
                    debug!(?side, %addr, "peer connected");
                    flags.start_of_flow = true;
                }
                Err(e) => warn!("accept failed: {e}"),
            },
            PollEvent::Idle => {}
        }

        if self.socks.any_connected() {
            self.use_a = !self.use_a;
        } else {
            self.use_a = true;
        }

        self.stamp_header(token, size, flags);
        size
    }

    /// Stamps the descriptor header from the post-toggle orientation, so the
    /// source is the side the bytes were just read from.
    fn stamp_header(&mut self, token: &MsgToken, size: usize, mut flags: MsgFlags) {
        let (src, dst, ingress) = if self.use_a {
            (
                self.socks.endpoint(Side::B).addr(),
                self.socks.endpoint(Side::A).addr(),
                Side::B,
            )
        } else {
            (
                self.socks.endpoint(Side::A).addr(),
                self.socks.endpoint(Side::B).addr(),
                Side::A,
            )
        };
        flags.to_server = ingress == Side::A;
        let ip_proto = self.config.proto.number();

        let hdr = self.pool.header_mut(token);
        *hdr = PktHeader {
            ts: SystemTime::now(),
            pktlen: size,
            src,
            dst,
            ip_proto,
            ingress,
            flags,
        };

        if flags.end_of_flow {
            self.socks.clear_stale_addrs();
        }
    }

    fn egress(&self) -> Side {
        if self.use_a { Side::A } else { Side::B }
    }
}

impl Bridge for SocketBridge {
    fn create(mut config: BridgeConfig) -> Result<Self> {
        if config.pool_size == 0 {
            config.pool_size = DEFAULT_POOL_SIZE;
        }
        if config.snaplen == 0 {
            config.snaplen = DEFAULT_SNAPLEN;
        }
        let pool = DescriptorPool::new(config.pool_size, config.snaplen)?;
        Ok(Self {
            config,
            socks: SockPair::new(),
            pool,
            use_a: true,
            interrupted: Interrupt::default(),
            stats: Stats::default(),
            local_port: None,
        })
    }

    fn start(&mut self) -> Result<()> {
        let port = self.socks.listen(self.config.port)?;
        debug!(port, "listening");
        self.local_port = Some(port);
        self.use_a = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.socks.close_all();
        self.local_port = None;
    }

    fn receive(&mut self, max_count: usize, batch: &mut Vec<MsgToken>) -> RecvStatus {
        let mut collected = 0;
        let mut miss = 0;

        loop {
            if collected >= max_count {
                break;
            }
            miss += 1;
            if miss >= 2 {
                break;
            }
            if self.interrupted.take() {
                return RecvStatus::Interrupted;
            }
            let Some(token) = self.pool.acquire() else {
                return RecvStatus::NoBuffer;
            };
            let size = self.read_message(&token);
            if size > 0 {
                self.stats.packets_received += 1;
                batch.push(token);
                collected += 1;
                miss = 0;
            } else {
                self.pool
                    .release(token)
                    .expect("freshly acquired token went stale");
            }
        }
        RecvStatus::Ok
    }

    fn finalize(&mut self, token: MsgToken, verdict: Verdict) -> Result<()> {
        self.stats.verdicts[verdict as usize] += 1;

        let sent = if self.config.passive || verdict.forwards() {
            let egress = self.pool.header(&token).ingress.other();
            self.socks.send(egress, self.pool.payload(&token))
        } else {
            Ok(())
        };

        // the descriptor goes back exactly once, send failure or not
        self.pool.release(token)?;
        sent
    }

    fn inject(&mut self, payload: &[u8]) -> Result<()> {
        self.socks.send(self.egress(), payload)?;
        self.stats.packets_injected += 1;
        Ok(())
    }

    fn inject_reverse(&mut self, payload: &[u8]) -> Result<()> {
        self.socks.send(self.egress().other(), payload)?;
        self.stats.packets_injected += 1;
        Ok(())
    }

    fn payload(&self, token: &MsgToken) -> &[u8] {
        self.pool.payload(token)
    }

    fn header(&self, token: &MsgToken) -> &PktHeader {
        self.pool.header(token)
    }

    fn interrupt(&self) {
        self.interrupted.trigger();
    }

    fn interrupt_handle(&self) -> Interrupt {
        self.interrupted.clone()
    }

    fn stats(&self) -> Stats {
        self.stats.clone()
    }

    fn reset_stats(&mut self) {
        self.stats = Stats::default();
    }

    fn snaplen(&self) -> usize {
        self.config.snaplen
    }

    fn pool_info(&self) -> PoolInfo {
        self.pool.info()
    }
}
