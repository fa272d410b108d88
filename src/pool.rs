//! Fixed-capacity descriptor pool backing the acquisition hot path.

use crate::api::{MsgToken, Result, unlikely};
use crate::errors::Error;
use crate::types::{PktHeader, PoolInfo};

#[derive(Debug)]
struct Slot {
    buf: Box<[u8]>,
    header: PktHeader,
    generation: u32,
}

/// A contiguous arena of packet descriptors with an index-based free list.
///
/// Every descriptor is allocated once at construction and cycles between
/// free and in-flight for the life of the pool. Acquire and release are
/// O(1) pops and pushes on the free-index stack; no allocation happens
/// after `new` returns.
#[derive(Debug)]
pub struct DescriptorPool {
    slots: Box<[Slot]>,
    free: Vec<u32>,
    mem_size: usize,
}

impl DescriptorPool {
    /// Preallocates `capacity` descriptors of `buf_size` bytes each.
    pub fn new(capacity: usize, buf_size: usize) -> Result<Self> {
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| Error::NoMemory(capacity * size_of::<Slot>()))?;
        let mut free = Vec::new();
        free.try_reserve_exact(capacity)
            .map_err(|_| Error::NoMemory(capacity * size_of::<u32>()))?;

        for idx in 0..capacity {
            let mut buf = Vec::new();
            buf.try_reserve_exact(buf_size)
                .map_err(|_| Error::NoMemory(buf_size))?;
            buf.resize(buf_size, 0);
            slots.push(Slot {
                buf: buf.into_boxed_slice(),
                header: PktHeader::default(),
                generation: 0,
            });
            free.push(idx as u32);
        }

        let mem_size = capacity * (size_of::<Slot>() + buf_size);
        Ok(Self {
            slots: slots.into_boxed_slice(),
            free,
            mem_size,
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn in_flight(&self) -> usize {
        self.capacity() - self.available()
    }

    pub fn info(&self) -> PoolInfo {
        PoolInfo {
            size: self.capacity(),
            available: self.available(),
            mem_size: self.mem_size,
        }
    }

    /// Lends out a free descriptor, or `None` when the pool is exhausted.
    ///
    /// Exhaustion is backpressure, not an error: the caller is expected to
    /// finalize outstanding descriptors and try again.
    pub fn acquire(&mut self) -> Option<MsgToken> {
        let idx = self.free.pop()?;
        let generation = self.slots[idx as usize].generation;
        Some(MsgToken::new(idx, generation))
    }

    /// Returns a lent descriptor to the free list.
    ///
    /// The slot generation is bumped, so any copy of the token that escaped
    /// becomes stale. A token whose generation no longer matches is rejected
    /// with [`Error::StaleToken`] and the free list is left untouched.
    pub fn release(&mut self, token: MsgToken) -> Result<()> {
        let slot = self
            .slots
            .get_mut(token.index() as usize)
            .ok_or(Error::StaleToken)?;
        if slot.generation != token.generation() {
            return Err(Error::StaleToken);
        }
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(token.index());
        Ok(())
    }

    /// Returns the received bytes of an in-flight descriptor.
    pub fn payload(&self, token: &MsgToken) -> &[u8] {
        let slot = self.slot(token);
        &slot.buf[..slot.header.pktlen]
    }

    /// Returns the whole capture buffer of an in-flight descriptor.
    pub(crate) fn buffer_mut(&mut self, token: &MsgToken) -> &mut [u8] {
        &mut self.slot_mut(token).buf
    }

    pub fn header(&self, token: &MsgToken) -> &PktHeader {
        &self.slot(token).header
    }

    pub(crate) fn header_mut(&mut self, token: &MsgToken) -> &mut PktHeader {
        &mut self.slot_mut(token).header
    }

    fn slot(&self, token: &MsgToken) -> &Slot {
        let slot = &self.slots[token.index() as usize];
        if unlikely(slot.generation != token.generation()) {
            panic!("stale descriptor token");
        }
        slot
    }

    fn slot_mut(&mut self, token: &MsgToken) -> &mut Slot {
        let slot = &mut self.slots[token.index() as usize];
        if unlikely(slot.generation != token.generation()) {
            panic!("stale descriptor token");
        }
        slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_plus_in_flight_is_capacity() {
        let mut pool = DescriptorPool::new(4, 256).unwrap();
        assert_eq!(pool.available(), 4);

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_eq!(pool.available() + pool.in_flight(), pool.capacity());
        assert_eq!(pool.in_flight(), 2);

        pool.release(a).unwrap();
        assert_eq!(pool.available() + pool.in_flight(), pool.capacity());
        pool.release(b).unwrap();
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn never_lends_a_descriptor_twice() {
        let mut pool = DescriptorPool::new(8, 64).unwrap();
        let mut seen = Vec::new();
        while let Some(tok) = pool.acquire() {
            assert!(!seen.contains(&tok.index()));
            seen.push(tok.index());
        }
        assert_eq!(seen.len(), 8);
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut pool = DescriptorPool::new(2, 64).unwrap();
        let a = pool.acquire().unwrap();
        let _b = pool.acquire().unwrap();
        assert!(pool.acquire().is_none());

        pool.release(a).unwrap();
        assert!(pool.acquire().is_some());
    }

    #[test]
    fn release_invalidates_outstanding_tokens() {
        let mut pool = DescriptorPool::new(1, 64).unwrap();
        let tok = pool.acquire().unwrap();
        let stale = MsgToken::new(tok.index(), tok.generation());
        pool.release(tok).unwrap();

        // same slot, old generation
        assert!(matches!(pool.release(stale), Err(Error::StaleToken)));
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn out_of_range_token_is_rejected() {
        let mut pool = DescriptorPool::new(1, 64).unwrap();
        let forged = MsgToken::new(7, 0);
        assert!(matches!(pool.release(forged), Err(Error::StaleToken)));
    }

    #[test]
    fn buffers_have_snaplen_capacity() {
        let mut pool = DescriptorPool::new(1, 1234).unwrap();
        let tok = pool.acquire().unwrap();
        assert_eq!(pool.buffer_mut(&tok).len(), 1234);
        pool.release(tok).unwrap();
    }

    #[test]
    fn info_reports_occupancy() {
        let mut pool = DescriptorPool::new(3, 128).unwrap();
        let tok = pool.acquire().unwrap();
        let info = pool.info();
        assert_eq!(info.size, 3);
        assert_eq!(info.available, 2);
        assert!(info.mem_size >= 3 * 128);
        pool.release(tok).unwrap();
    }
}
