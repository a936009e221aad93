//! Ping-pong transmit-buffer allocator.
//!
//! Two logical transmit slots alternate so one frame can be staged while the other is in flight.
//! The allocator is a 2-bit busy mask over the slots: bit *i* set iff slot *i* is allocated and
//! not yet released. Locking of the underlying buffer goes through [PktBufLocks]; the busy bit is
//! set before the lock attempt, so a lock failure (a protocol violation, since each buffer has one
//! contender by construction) leaves the slot marked busy.

use crate::pkt_buf::{BufferArbiter, BufferRole, PktBufLocks};
use crate::{MacError, MacResult};

const SLOT_0: u8 = 0b01;
const SLOT_1: u8 = 0b10;
const ALL_BUSY: u8 = SLOT_0 | SLOT_1;

#[derive(Debug, Default)]
pub struct TxSlotAllocator {
    busy_mask: u8,
}

impl TxSlotAllocator {
    pub const fn new() -> Self {
        Self { busy_mask: 0 }
    }

    /// True unless both slots are busy.
    pub fn is_ready(&self) -> bool {
        self.busy_mask != ALL_BUSY
    }

    pub fn busy_mask(&self) -> u8 {
        self.busy_mask
    }

    /// Select and lock the next free transmit slot.
    pub fn allocate<A: BufferArbiter>(&mut self, locks: &PktBufLocks<'_, A>) -> MacResult<usize> {
        let slot = match self.busy_mask {
            SLOT_0 => {
                self.busy_mask |= SLOT_1;
                1
            }
            0 | SLOT_1 => {
                self.busy_mask |= SLOT_0;
                0
            }
            _ => return Err(MacError::NoFreeSlot),
        };

        if let Err(e) = locks.try_lock(BufferRole::Tx, slot) {
            error!("tx pkt buf {} lock state mismatch", slot);
            return Err(e);
        }
        Ok(slot)
    }

    /// Release a slot: clear its busy bit and unlock the buffer.
    pub fn release<A: BufferArbiter>(
        &mut self,
        locks: &PktBufLocks<'_, A>,
        slot: usize,
    ) -> MacResult<()> {
        match slot {
            0 => self.busy_mask &= !SLOT_0,
            1 => self.busy_mask &= !SLOT_1,
            _ => return Err(MacError::InvalidIndex),
        }

        if let Err(e) = locks.unlock(BufferRole::Tx, slot) {
            error!("tx pkt buf {} unlock state mismatch", slot);
            return Err(e);
        }
        Ok(())
    }

    /// Keep a slot accounted busy while its frame is in flight on the peer processor.
    pub fn mark_busy(&mut self, slot: usize) {
        if slot < 2 {
            self.busy_mask |= 1 << slot;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkt_buf::{OwnerId, SoftwareArbiter, NUM_PKT_BUF_MUTEXES};

    fn setup() -> (SoftwareArbiter<NUM_PKT_BUF_MUTEXES>, TxSlotAllocator) {
        (SoftwareArbiter::new(), TxSlotAllocator::new())
    }

    #[test]
    fn ping_pong_sequence() {
        let (arbiter, mut alloc) = setup();
        let locks = PktBufLocks::new(&arbiter, OwnerId(1));

        assert_eq!(alloc.allocate(&locks), Ok(0));
        assert_eq!(alloc.busy_mask(), 0b01);
        assert_eq!(alloc.allocate(&locks), Ok(1));
        assert_eq!(alloc.busy_mask(), 0b11);
        assert!(!alloc.is_ready());
        assert_eq!(alloc.allocate(&locks), Err(MacError::NoFreeSlot));

        assert_eq!(alloc.release(&locks, 0), Ok(()));
        assert_eq!(alloc.busy_mask(), 0b10);
        assert!(alloc.is_ready());
        assert_eq!(alloc.allocate(&locks), Ok(0));
        assert_eq!(alloc.busy_mask(), 0b11);
    }

    #[test]
    fn release_rejects_bad_index() {
        let (arbiter, mut alloc) = setup();
        let locks = PktBufLocks::new(&arbiter, OwnerId(1));
        assert_eq!(alloc.release(&locks, 2), Err(MacError::InvalidIndex));
    }

    #[test]
    fn release_of_unlocked_slot_fails() {
        let (arbiter, mut alloc) = setup();
        let locks = PktBufLocks::new(&arbiter, OwnerId(1));
        assert_eq!(alloc.release(&locks, 0), Err(MacError::NotOwner));
    }

    #[test]
    fn lock_failure_leaves_slot_marked_busy() {
        let (arbiter, mut alloc) = setup();
        let locks = PktBufLocks::new(&arbiter, OwnerId(1));
        let foreign = PktBufLocks::new(&arbiter, OwnerId(2));

        // A foreign holder on slot 0 violates the one-contender protocol.
        foreign.try_lock(BufferRole::Tx, 0).unwrap();

        assert_eq!(alloc.allocate(&locks), Err(MacError::AlreadyLocked));
        // The busy bit stays set even though the lock was never acquired.
        assert_eq!(alloc.busy_mask(), 0b01);
        assert_eq!(alloc.allocate(&locks), Ok(1));
        assert_eq!(alloc.busy_mask(), 0b11);
    }
}
