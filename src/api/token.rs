//! Capability token lent out with each acquired packet descriptor.

/// A token representing a loan of one packet descriptor from the pool.
///
/// The token must eventually be returned, either through
/// [`Bridge::finalize`](super::Bridge::finalize) or directly via
/// [`DescriptorPool::release`](crate::pool::DescriptorPool::release). It
/// carries the slot index plus the generation the slot had when it was
/// lent; releasing bumps the generation, so a token that outlives its loan
/// is detected instead of silently corrupting the pool.
#[derive(Debug)]
#[must_use = "an acquired descriptor must be returned to the pool"]
pub struct MsgToken {
    idx: u32,
    generation: u32,
}

impl MsgToken {
    pub(crate) fn new(idx: u32, generation: u32) -> Self {
        Self { idx, generation }
    }

    /// Returns the descriptor slot index for this token.
    pub fn index(&self) -> u32 {
        self.idx
    }

    /// Returns the pool generation this token was lent under.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}
