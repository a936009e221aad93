//! Packet buffers and their exclusive locks.
//!
//! Frames cross between the processors through a fixed pool of buffers: [NUM_TX_PKT_BUFS]
//! transmit slots and [NUM_RX_PKT_BUFS] receive slots, each one frame plus its metadata. The pool
//! is never allocated or freed; the only mutable lifecycle is the lock state of each slot.
//!
//! Ownership of a slot is arbitrated by a hardware mutex core with one lock per slot, modelled by
//! the [BufferArbiter] trait. Both processors address the same flat lock index space; the transmit
//! and receive namespaces are disjoint by construction. [PktBufLocks] is this processor's view of
//! the arbiter, with role-aware index validation.

use portable_atomic::{AtomicU32, Ordering};

use crate::{MacError, MacResult};

pub const NUM_TX_PKT_BUFS: usize = 2;
pub const NUM_RX_PKT_BUFS: usize = 8;
/// Bytes of frame storage per packet buffer.
pub const PKT_BUF_FRAME_SIZE: usize = 1600;

/// Flat lock index bases. The two namespaces never overlap.
pub const PKT_BUF_MUTEX_TX_BASE: usize = 0;
pub const PKT_BUF_MUTEX_RX_BASE: usize = NUM_TX_PKT_BUFS;
pub const NUM_PKT_BUF_MUTEXES: usize = NUM_TX_PKT_BUFS + NUM_RX_PKT_BUFS;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferRole {
    Tx,
    Rx,
}

impl BufferRole {
    pub const fn base(self) -> usize {
        match self {
            BufferRole::Tx => PKT_BUF_MUTEX_TX_BASE,
            BufferRole::Rx => PKT_BUF_MUTEX_RX_BASE,
        }
    }
    pub const fn count(self) -> usize {
        match self {
            BufferRole::Tx => NUM_TX_PKT_BUFS,
            BufferRole::Rx => NUM_RX_PKT_BUFS,
        }
    }
}

/// Identity of a lock holder, as reported by the arbiter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct OwnerId(pub u32);

/// The hardware-arbitrated mutex core shared by both processors.
///
/// All operations are non-blocking; arbitration between the two independently-clocked callers is
/// the implementation's problem, not the caller's.
pub trait BufferArbiter {
    /// Attempt an exclusive acquire of `index` for `owner`. Returns whether it was granted.
    fn try_lock(&self, owner: OwnerId, index: usize) -> bool;
    /// Release `index` if and only if `owner` holds it. Returns whether it was released.
    fn unlock(&self, owner: OwnerId, index: usize) -> bool;
    /// Current lock flag and owner of `index`.
    fn status(&self, index: usize) -> (bool, OwnerId);
}

const LOCKED_BIT: u32 = 0x8000_0000;

/// A software model of the arbiter: one CAS word per slot, shareable by two execution contexts.
pub struct SoftwareArbiter<const SLOTS: usize> {
    slots: [AtomicU32; SLOTS],
}

#[allow(clippy::declare_interior_mutable_const)]
const UNLOCKED_SLOT: AtomicU32 = AtomicU32::new(0);

impl<const SLOTS: usize> SoftwareArbiter<SLOTS> {
    pub const fn new() -> Self {
        Self {
            slots: [UNLOCKED_SLOT; SLOTS],
        }
    }
}

impl<const SLOTS: usize> Default for SoftwareArbiter<SLOTS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const SLOTS: usize> BufferArbiter for SoftwareArbiter<SLOTS> {
    fn try_lock(&self, owner: OwnerId, index: usize) -> bool {
        self.slots[index]
            .compare_exchange(0, LOCKED_BIT | owner.0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
    fn unlock(&self, owner: OwnerId, index: usize) -> bool {
        self.slots[index]
            .compare_exchange(
                LOCKED_BIT | owner.0,
                0,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
    fn status(&self, index: usize) -> (bool, OwnerId) {
        let raw = self.slots[index].load(Ordering::Acquire);
        (raw & LOCKED_BIT != 0, OwnerId(raw & !LOCKED_BIT))
    }
}

/// This processor's view of the packet-buffer locks.
pub struct PktBufLocks<'a, A: BufferArbiter> {
    arbiter: &'a A,
    owner: OwnerId,
}

impl<'a, A: BufferArbiter> PktBufLocks<'a, A> {
    pub fn new(arbiter: &'a A, owner: OwnerId) -> Self {
        Self { arbiter, owner }
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    fn flat_index(role: BufferRole, index: usize) -> MacResult<usize> {
        if index >= role.count() {
            return Err(MacError::InvalidIndex);
        }
        Ok(role.base() + index)
    }

    /// Non-blocking exclusive acquire of one buffer.
    pub fn try_lock(&self, role: BufferRole, index: usize) -> MacResult<()> {
        let flat = Self::flat_index(role, index)?;
        if self.arbiter.try_lock(self.owner, flat) {
            Ok(())
        } else {
            Err(MacError::AlreadyLocked)
        }
    }

    pub fn unlock(&self, role: BufferRole, index: usize) -> MacResult<()> {
        let flat = Self::flat_index(role, index)?;
        if self.arbiter.unlock(self.owner, flat) {
            Ok(())
        } else {
            Err(MacError::NotOwner)
        }
    }

    pub fn status(&self, role: BufferRole, index: usize) -> MacResult<(bool, OwnerId)> {
        let flat = Self::flat_index(role, index)?;
        Ok(self.arbiter.status(flat))
    }

    /// Boot/soft-reset cleanup: try to unlock every slot this processor might hold.
    ///
    /// Most unlocks fail harmlessly.
    pub fn unlock_all(&self) {
        for index in 0..NUM_TX_PKT_BUFS {
            let _ = self.unlock(BufferRole::Tx, index);
        }
        for index in 0..NUM_RX_PKT_BUFS {
            let _ = self.unlock(BufferRole::Rx, index);
        }
    }
}

/// PHY parameters of one transmission.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PhyTxParams {
    pub rate: u8,
    pub power: i8,
    pub antenna_mode: u8,
}

/// Per-frame transmit parameters, per station or global.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TxParams {
    pub phy: PhyTxParams,
    pub mac_flags: u8,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TxResult {
    #[default]
    None,
    Success,
    Failure,
}

/// Metadata of a frame in a transmit buffer.
#[derive(Clone, Copy, Debug, Default)]
pub struct TxFrameInfo {
    pub timestamp_create: u64,
    pub timestamp_accept: u64,
    pub timestamp_done: u64,
    /// Monotonically increasing sequence number unique across all transmissions.
    pub unique_seq: u64,
    pub params: TxParams,
    pub length: u16,
    pub flags: u8,
    pub queue_id: u8,
    pub short_retry_count: u8,
    pub long_retry_count: u8,
    pub result: TxResult,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RxFrameState {
    #[default]
    Empty,
    FullReady,
}

/// Metadata of a frame in a receive buffer.
#[derive(Clone, Copy, Debug, Default)]
pub struct RxFrameInfo {
    pub state: RxFrameState,
    pub length: u16,
    pub rate: u8,
    pub power: i8,
    pub antenna_mode: u8,
    pub flags: u8,
    pub timestamp: u64,
}

pub struct TxPacketBuffer {
    pub frame_info: TxFrameInfo,
    pub frame: [u8; PKT_BUF_FRAME_SIZE],
}

pub struct RxPacketBuffer {
    pub frame_info: RxFrameInfo,
    pub frame: [u8; PKT_BUF_FRAME_SIZE],
}

const EMPTY_TX_BUF: TxPacketBuffer = TxPacketBuffer {
    frame_info: TxFrameInfo {
        timestamp_create: 0,
        timestamp_accept: 0,
        timestamp_done: 0,
        unique_seq: 0,
        params: TxParams {
            phy: PhyTxParams {
                rate: 0,
                power: 0,
                antenna_mode: 0,
            },
            mac_flags: 0,
        },
        length: 0,
        flags: 0,
        queue_id: 0,
        short_retry_count: 0,
        long_retry_count: 0,
        result: TxResult::None,
    },
    frame: [0; PKT_BUF_FRAME_SIZE],
};

const EMPTY_RX_BUF: RxPacketBuffer = RxPacketBuffer {
    frame_info: RxFrameInfo {
        state: RxFrameState::Empty,
        length: 0,
        rate: 0,
        power: 0,
        antenna_mode: 0,
        flags: 0,
        timestamp: 0,
    },
    frame: [0; PKT_BUF_FRAME_SIZE],
};

/// The fixed buffer pool, owned by the platform and lent to the MAC for its lifetime.
///
/// On hardware this storage is the shared frame memory both processors address.
pub struct PacketBufferResources {
    pub tx: [TxPacketBuffer; NUM_TX_PKT_BUFS],
    pub rx: [RxPacketBuffer; NUM_RX_PKT_BUFS],
}

impl PacketBufferResources {
    pub const fn new() -> Self {
        Self {
            tx: [EMPTY_TX_BUF; NUM_TX_PKT_BUFS],
            rx: [EMPTY_RX_BUF; NUM_RX_PKT_BUFS],
        }
    }
}

impl Default for PacketBufferResources {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HIGH: OwnerId = OwnerId(1);
    const LOW: OwnerId = OwnerId(2);

    #[test]
    fn lock_is_exclusive_until_owner_unlocks() {
        let arbiter = SoftwareArbiter::<NUM_PKT_BUF_MUTEXES>::new();
        let high = PktBufLocks::new(&arbiter, HIGH);
        let low = PktBufLocks::new(&arbiter, LOW);

        assert_eq!(high.try_lock(BufferRole::Rx, 3), Ok(()));
        assert_eq!(
            low.try_lock(BufferRole::Rx, 3),
            Err(MacError::AlreadyLocked)
        );
        assert_eq!(
            high.try_lock(BufferRole::Rx, 3),
            Err(MacError::AlreadyLocked)
        );

        let (locked, owner) = high.status(BufferRole::Rx, 3).unwrap();
        assert!(locked);
        assert_eq!(owner, HIGH);

        assert_eq!(low.unlock(BufferRole::Rx, 3), Err(MacError::NotOwner));
        assert_eq!(high.unlock(BufferRole::Rx, 3), Ok(()));
        assert_eq!(low.try_lock(BufferRole::Rx, 3), Ok(()));
    }

    #[test]
    fn roles_do_not_share_locks() {
        let arbiter = SoftwareArbiter::<NUM_PKT_BUF_MUTEXES>::new();
        let high = PktBufLocks::new(&arbiter, HIGH);

        assert_eq!(high.try_lock(BufferRole::Tx, 0), Ok(()));
        // The same numeric index in the other role is an independent lock.
        assert_eq!(high.try_lock(BufferRole::Rx, 0), Ok(()));
    }

    #[test]
    fn out_of_range_indices_are_rejected() {
        let arbiter = SoftwareArbiter::<NUM_PKT_BUF_MUTEXES>::new();
        let high = PktBufLocks::new(&arbiter, HIGH);

        assert_eq!(
            high.try_lock(BufferRole::Tx, NUM_TX_PKT_BUFS),
            Err(MacError::InvalidIndex)
        );
        assert_eq!(
            high.unlock(BufferRole::Rx, NUM_RX_PKT_BUFS),
            Err(MacError::InvalidIndex)
        );
        assert_eq!(
            high.status(BufferRole::Tx, NUM_TX_PKT_BUFS).unwrap_err(),
            MacError::InvalidIndex
        );
    }

    #[test]
    fn unlock_of_unlocked_buffer_reports_not_owner() {
        let arbiter = SoftwareArbiter::<NUM_PKT_BUF_MUTEXES>::new();
        let high = PktBufLocks::new(&arbiter, HIGH);
        assert_eq!(high.unlock(BufferRole::Tx, 1), Err(MacError::NotOwner));
    }

    #[test]
    fn unlock_all_releases_everything_held() {
        let arbiter = SoftwareArbiter::<NUM_PKT_BUF_MUTEXES>::new();
        let high = PktBufLocks::new(&arbiter, HIGH);

        high.try_lock(BufferRole::Tx, 0).unwrap();
        high.try_lock(BufferRole::Rx, 5).unwrap();
        high.unlock_all();

        assert_eq!(high.status(BufferRole::Tx, 0).unwrap().0, false);
        assert_eq!(high.status(BufferRole::Rx, 5).unwrap().0, false);
    }
}
