//! Per-peer traffic statistics.
//!
//! Counters are kept for every associated station, and optionally for peers that are merely
//! overheard ("promiscuous" tracking). The table is an arena of entries addressed by generational
//! handles, with an explicit index in creation order. Growth is bounded: once the configured
//! capacity is reached, the least-recently-active entry that is *not* associated is evicted to
//! make room. Associated entries are never evicted; if nothing is evictable the table grows past
//! its capacity rather than refuse to track an associated peer.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::frame::{self, MacAddr, PktType};
use crate::pkt_buf::{TxFrameInfo, TxResult};

/// Default bound on the table when tracking unassociated peers.
pub const DEFAULT_STATS_CAPACITY: usize = 50;

/// Counters for one class of frames (data or management).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameCounters {
    pub tx_num_packets_total: u32,
    pub tx_num_bytes_total: u64,
    pub tx_num_packets_success: u32,
    pub tx_num_bytes_success: u64,
    /// Low-level transmission attempts, including retries.
    pub tx_num_attempts_low: u32,
    pub rx_num_packets: u32,
    pub rx_num_bytes: u64,
}

/// Statistics entry for one peer.
#[derive(Clone, Copy, Debug, Default)]
pub struct TxRxStats {
    pub addr: MacAddr,
    pub is_associated: bool,
    /// Microsecond timestamp of the last counted activity.
    pub latest_txrx_timestamp: u64,
    pub data: FrameCounters,
    pub mgmt: FrameCounters,
}

impl TxRxStats {
    fn reset_counters(&mut self) {
        self.data = FrameCounters::default();
        self.mgmt = FrameCounters::default();
    }
}

/// Stable reference to a statistics entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StatsHandle {
    index: u32,
    generation: u32,
}

struct Slot {
    generation: u32,
    entry: Option<Box<TxRxStats>>,
}

/// The bounded statistics table.
pub struct StatsTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    /// Occupied handles in creation order.
    order: Vec<StatsHandle>,
    capacity: usize,
    promiscuous_enabled: bool,
}

impl StatsTable {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            order: Vec::new(),
            capacity: DEFAULT_STATS_CAPACITY,
            promiscuous_enabled: true,
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    pub fn promiscuous_enabled(&self) -> bool {
        self.promiscuous_enabled
    }

    /// Enable or disable tracking of unassociated peers.
    pub fn set_promiscuous_enabled(&mut self, enabled: bool) {
        self.promiscuous_enabled = enabled;
    }

    pub fn get(&self, handle: StatsHandle) -> Option<&TxRxStats> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.as_deref()
    }

    pub fn get_mut(&mut self, handle: StatsHandle) -> Option<&mut TxRxStats> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.as_deref_mut()
    }

    pub fn find_by_addr(&self, addr: &MacAddr) -> Option<StatsHandle> {
        self.order
            .iter()
            .copied()
            .find(|&handle| self.get(handle).map(|e| e.addr == *addr).unwrap_or(false))
    }

    /// Entries in creation order.
    pub fn iter(&self) -> impl Iterator<Item = (StatsHandle, &TxRxStats)> + '_ {
        self.order
            .iter()
            .filter_map(move |&handle| self.get(handle).map(|entry| (handle, entry)))
    }

    /// Get or create the entry for `addr`.
    ///
    /// `associated` states whether the caller is attaching this entry to a station. Unassociated
    /// peers are only tracked when promiscuous statistics are enabled. At capacity, the
    /// least-recently-active unassociated entry is evicted; when every entry is associated the
    /// capacity is treated as advisory and the table grows anyway.
    pub fn add(&mut self, addr: &MacAddr, associated: bool) -> Option<StatsHandle> {
        if !associated && !self.promiscuous_enabled {
            return None;
        }

        if let Some(handle) = self.find_by_addr(addr) {
            if associated {
                if let Some(entry) = self.get_mut(handle) {
                    entry.is_associated = true;
                }
            }
            return Some(handle);
        }

        if self.order.len() >= self.capacity {
            match self.oldest_unassociated() {
                Some(victim) => {
                    self.remove(victim);
                }
                None => {
                    warn!(
                        "statistics table over capacity ({}); no unassociated entry to evict",
                        self.capacity
                    );
                }
            }
        }

        let entry = Box::new(TxRxStats {
            addr: *addr,
            is_associated: associated,
            ..TxRxStats::default()
        });
        let handle = self.alloc_slot(entry);
        self.order.push(handle);
        Some(handle)
    }

    /// Remove and free one entry.
    pub fn remove(&mut self, handle: StatsHandle) -> bool {
        let Some(slot) = self.slots.get_mut(handle.index as usize) else {
            return false;
        };
        if slot.generation != handle.generation || slot.entry.is_none() {
            return false;
        }
        slot.entry = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.order.retain(|&h| h != handle);
        true
    }

    /// Zero every entry's counters and drop every entry that is not currently associated.
    pub fn reset(&mut self) {
        let handles: Vec<StatsHandle> = self.order.clone();
        for handle in handles {
            let Some(entry) = self.get_mut(handle) else {
                continue;
            };
            entry.reset_counters();
            if !entry.is_associated {
                self.remove(handle);
            }
        }
    }

    /// Account one finished transmission against the peer's counters.
    pub fn update_tx(
        &mut self,
        handle: StatsHandle,
        frame_info: &TxFrameInfo,
        frame: &[u8],
        now_usec: u64,
    ) {
        let length = frame_info.length;
        let attempts =
            frame_info.short_retry_count as u32 + frame_info.long_retry_count as u32;
        let success = frame_info.result == TxResult::Success;

        let Some(entry) = self.get_mut(handle) else {
            return;
        };
        let counters = match frame::classify(frame, length) {
            PktType::DataEncapEth | PktType::DataEncapLtg => &mut entry.data,
            PktType::Mgmt => &mut entry.mgmt,
            _ => return,
        };

        counters.tx_num_packets_total += 1;
        counters.tx_num_bytes_total += length as u64;
        counters.tx_num_attempts_low += attempts;
        if success {
            counters.tx_num_packets_success += 1;
            counters.tx_num_bytes_success += length as u64;
        }
        entry.latest_txrx_timestamp = now_usec;
    }

    /// Account one reception against the peer's counters.
    pub fn update_rx(&mut self, handle: StatsHandle, frame: &[u8], length: u16, now_usec: u64) {
        let Some(entry) = self.get_mut(handle) else {
            return;
        };
        let counters = match frame::classify(frame, length) {
            PktType::DataEncapEth | PktType::DataEncapLtg => &mut entry.data,
            PktType::Mgmt => &mut entry.mgmt,
            _ => return,
        };
        counters.rx_num_packets += 1;
        counters.rx_num_bytes += length as u64;
        entry.latest_txrx_timestamp = now_usec;
    }

    fn oldest_unassociated(&self) -> Option<StatsHandle> {
        let mut oldest: Option<(StatsHandle, u64)> = None;
        for (handle, entry) in self.iter() {
            if entry.is_associated {
                continue;
            }
            match oldest {
                Some((_, ts)) if entry.latest_txrx_timestamp >= ts => {}
                _ => oldest = Some((handle, entry.latest_txrx_timestamp)),
            }
        }
        oldest.map(|(handle, _)| handle)
    }

    fn alloc_slot(&mut self, entry: Box<TxRxStats>) -> StatsHandle {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            StatsHandle {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                entry: Some(entry),
            });
            StatsHandle {
                index,
                generation: 0,
            }
        }
    }
}

impl Default for StatsTable {
    fn default() -> Self {
        Self::new()
    }
}
