//! Public acquisition contract and related types.

mod hint;
mod token;

pub(crate) use hint::unlikely;
pub use token::MsgToken;

use crate::errors::Error;
use crate::types::{BridgeConfig, Interrupt, PktHeader, PoolInfo, RecvStatus, Stats, Verdict};

pub type Result<T> = std::result::Result<T, Error>;

/// A packet bridge that acquires traffic from two peers and relays it
/// according to caller-supplied verdicts.
///
/// The intended loop is: [`receive`](Bridge::receive) a batch of tokens,
/// inspect each packet through [`payload`](Bridge::payload) and
/// [`header`](Bridge::header), then return every token through
/// [`finalize`](Bridge::finalize) with a [`Verdict`]. Descriptors are pooled;
/// a token that is never finalized starves the pool.
pub trait Bridge: Sized {
    /// Creates a bridge from the given configuration.
    ///
    /// Allocates the whole descriptor pool up front; an allocation failure
    /// here is fatal and nothing is leaked.
    fn create(config: BridgeConfig) -> Result<Self>;

    /// Binds and starts listening on the configured port.
    fn start(&mut self) -> Result<()>;

    /// Closes the listener and both peer sockets.
    ///
    /// The descriptor pool and the statistics survive a stop; a subsequent
    /// [`start`](Bridge::start) reopens the sockets.
    fn stop(&mut self);

    /// Collects up to `max_count` ready packets into `batch`.
    ///
    /// Appends one token per received packet. Returns promptly with a
    /// partial batch once no more data is immediately available; see
    /// [`RecvStatus`] for the interrupt and backpressure outcomes.
    fn receive(&mut self, max_count: usize, batch: &mut Vec<MsgToken>) -> RecvStatus;

    /// Applies a verdict to a received packet and returns its descriptor to
    /// the pool.
    ///
    /// Forwarding verdicts relay the payload to the peer opposite the one it
    /// arrived on. The descriptor is released even when the forward fails;
    /// the send error is returned after the release.
    fn finalize(&mut self, token: MsgToken, verdict: Verdict) -> Result<()>;

    /// Writes raw bytes to the current egress peer.
    fn inject(&mut self, payload: &[u8]) -> Result<()>;

    /// Writes raw bytes to the peer opposite the current egress.
    fn inject_reverse(&mut self, payload: &[u8]) -> Result<()>;

    /// Returns the packet bytes lent under `token`.
    fn payload(&self, token: &MsgToken) -> &[u8];

    /// Returns the header stamped for the packet lent under `token`.
    fn header(&self, token: &MsgToken) -> &PktHeader;

    /// Requests that a blocked or upcoming [`receive`](Bridge::receive)
    /// return early with [`RecvStatus::Interrupted`].
    fn interrupt(&self);

    /// Returns a cloneable handle other threads can use to interrupt this
    /// bridge.
    fn interrupt_handle(&self) -> Interrupt;

    /// Returns a snapshot of the running statistics.
    fn stats(&self) -> Stats;

    /// Zeroes the running statistics.
    fn reset_stats(&mut self);

    /// Returns the per-descriptor buffer capacity.
    fn snaplen(&self) -> usize;

    /// Returns the descriptor pool occupancy and memory footprint.
    fn pool_info(&self) -> PoolInfo;
}
