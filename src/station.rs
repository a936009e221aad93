//! Association table.
//!
//! Associated peers are tracked in an arena of station entries addressed by generational handles,
//! with an explicit index kept sorted ascending by AID. AIDs start at 1; when an association is
//! removed its AID becomes a hole that the next unconstrained add re-issues, so the ID space stays
//! compact. Each station owns a back-reference into the statistics table.

use alloc::boxed::Box;
use alloc::vec::Vec;

use macro_bits::{bit, check_bit};

use crate::frame::MacAddr;
use crate::pkt_buf::TxParams;
use crate::stats::{StatsHandle, StatsTable};
use crate::{MacError, MacResult};

/// Hard compile-time cap on the association table length.
pub const MAX_ASSOCIATIONS_LIMIT: u32 = 32;
/// Default configured maximum.
pub const DEFAULT_MAX_ASSOCIATIONS: u32 = 8;

/// Never disassociate this station for inactivity.
pub const STATION_FLAG_DISABLE_TIMEOUT: u8 = bit!(0);
/// Never remove this station from the table.
pub const STATION_FLAG_DO_NOT_REMOVE: u8 = bit!(1);

/// Sequence numbers are 12 bits, so this can never match a received frame; it guarantees the
/// first reception from a fresh station is not treated as a duplicate.
pub const RX_SEQ_INVALID: u16 = 0xFFFF;

const HOSTNAME_MAXLEN: usize = 20;

/// OUI of hardware that participates in the same testbed; such peers are exempted from
/// idle-timeout disassociation.
pub const LOCAL_VENDOR_OUI: [u8; 3] = [0x40, 0xD8, 0x55];

pub fn addr_has_local_vendor_oui(addr: &MacAddr) -> bool {
    addr[..3] == LOCAL_VENDOR_OUI
}

/// AID selection for [StationTable::add].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AidRequest {
    /// Issue the lowest AID available, re-filling holes first.
    Any,
    Specific(u16),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RateSelectionScheme {
    #[default]
    Static,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RateSelectionInfo {
    pub scheme: RateSelectionScheme,
}

/// One associated peer.
#[derive(Clone, Copy, Debug)]
pub struct StationInfo {
    pub aid: u16,
    pub addr: MacAddr,
    pub tx: TxParams,
    pub rate_info: RateSelectionInfo,
    /// Statistics entry shared with the statistics table.
    pub stats: StatsHandle,
    pub last_rx_seq: u16,
    pub flags: u8,
    pub hostname: [u8; HOSTNAME_MAXLEN],
}

impl StationInfo {
    /// Receive de-duplication: true if `seq` repeats the last counted reception.
    /// Updates the last-seen sequence number otherwise.
    pub fn is_duplicate_rx(&mut self, seq: u16) -> bool {
        if self.last_rx_seq == seq {
            true
        } else {
            self.last_rx_seq = seq;
            false
        }
    }
}

/// Stable reference to a station entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StationHandle {
    index: u32,
    generation: u32,
}

struct Slot {
    generation: u32,
    station: Option<Box<StationInfo>>,
}

/// The association table.
pub struct StationTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    /// Occupied handles, sorted ascending by AID.
    order: Vec<StationHandle>,
    max_associations: u32,
    default_unicast_tx_params: TxParams,
}

impl StationTable {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            order: Vec::new(),
            max_associations: DEFAULT_MAX_ASSOCIATIONS,
            default_unicast_tx_params: TxParams::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn max_associations(&self) -> u32 {
        self.max_associations
    }

    /// Set the configured maximum, clamped to the hard cap. Returns the value in effect.
    pub fn set_max_associations(&mut self, max: u32) -> u32 {
        self.max_associations = max.min(MAX_ASSOCIATIONS_LIMIT);
        self.max_associations
    }

    /// Transmit parameters copied into every new association.
    pub fn set_default_unicast_tx_params(&mut self, params: TxParams) {
        self.default_unicast_tx_params = params;
    }

    pub fn get(&self, handle: StationHandle) -> Option<&StationInfo> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.station.as_deref()
    }

    pub fn get_mut(&mut self, handle: StationHandle) -> Option<&mut StationInfo> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.station.as_deref_mut()
    }

    /// True iff the reference still names a live entry (identity, not value).
    pub fn is_valid(&self, handle: StationHandle) -> bool {
        self.get(handle).is_some()
    }

    pub fn find_by_aid(&self, aid: u16) -> Option<StationHandle> {
        self.order
            .iter()
            .copied()
            .find(|&h| self.get(h).map(|s| s.aid == aid).unwrap_or(false))
    }

    pub fn find_by_addr(&self, addr: &MacAddr) -> Option<StationHandle> {
        self.order
            .iter()
            .copied()
            .find(|&h| self.get(h).map(|s| s.addr == *addr).unwrap_or(false))
    }

    /// Stations in ascending AID order.
    pub fn iter(&self) -> impl Iterator<Item = (StationHandle, &StationInfo)> + '_ {
        self.order
            .iter()
            .filter_map(move |&h| self.get(h).map(|s| (h, s)))
    }

    /// Add an association for `addr`.
    ///
    /// Re-adding a known address (or a known (AID, address) pair) returns the existing entry.
    /// A requested AID held by a different address fails with [MacError::AidConflict]; a full
    /// table fails with [MacError::TableFull]. New entries get a statistics entry from `stats`,
    /// default unicast transmit parameters and an AID placed per [AidRequest].
    pub fn add(
        &mut self,
        stats: &mut StatsTable,
        addr: &MacAddr,
        request: AidRequest,
    ) -> MacResult<StationHandle> {
        if let AidRequest::Specific(aid) = request {
            if let Some(handle) = self.find_by_aid(aid) {
                let station = self.get(handle).ok_or(MacError::NotFound)?;
                return if station.addr == *addr {
                    Ok(handle)
                } else {
                    Err(MacError::AidConflict)
                };
            }
        }

        if let Some(handle) = self.find_by_addr(addr) {
            return Ok(handle);
        }

        if self.order.len() as u32 >= self.max_associations {
            return Err(MacError::TableFull);
        }

        let stats_handle = stats.add(addr, true).ok_or(MacError::TableFull)?;

        let mut flags = 0;
        if addr_has_local_vendor_oui(addr) {
            flags |= STATION_FLAG_DISABLE_TIMEOUT;
        }

        let station = Box::new(StationInfo {
            aid: 0,
            addr: *addr,
            tx: self.default_unicast_tx_params,
            rate_info: RateSelectionInfo::default(),
            stats: stats_handle,
            last_rx_seq: RX_SEQ_INVALID,
            flags,
            hostname: [0; HOSTNAME_MAXLEN],
        });

        let (position, aid) = match request {
            AidRequest::Any => self.place_any_aid(),
            AidRequest::Specific(aid) => (self.position_for_aid(aid), aid),
        };

        let handle = self.alloc_slot(station);
        if let Some(station) = self.get_mut(handle) {
            station.aid = aid;
        }
        self.order.insert(position, handle);
        debug!("associated AID {} ({} stations)", aid, self.order.len());
        Ok(handle)
    }

    /// Remove the association for `addr`.
    ///
    /// The statistics entry is freed along with the station unless promiscuous tracking is
    /// enabled, in which case it is retained and merely marked unassociated.
    pub fn remove(&mut self, stats: &mut StatsTable, addr: &MacAddr) -> MacResult<()> {
        let handle = self.find_by_addr(addr).ok_or(MacError::NotFound)?;
        let station = self.get(handle).ok_or(MacError::NotFound)?;

        if check_bit!(station.flags, STATION_FLAG_DO_NOT_REMOVE) {
            warn!("station AID {} is flagged do-not-remove", station.aid);
            return Err(MacError::NotRemovable);
        }
        let stats_handle = station.stats;

        self.order.retain(|&h| h != handle);
        if let Some(slot) = self.slots.get_mut(handle.index as usize) {
            slot.station = None;
            slot.generation = slot.generation.wrapping_add(1);
        }
        self.free.push(handle.index);

        if stats.promiscuous_enabled() {
            if let Some(entry) = stats.get_mut(stats_handle) {
                entry.is_associated = false;
            }
        } else {
            stats.remove(stats_handle);
        }
        debug!("disassociated ({} stations)", self.order.len());
        Ok(())
    }

    /// First hole in the AID sequence, or the next AID past the end.
    fn place_any_aid(&self) -> (usize, u16) {
        let mut prev_aid: u16 = 0;
        for (position, &handle) in self.order.iter().enumerate() {
            let Some(station) = self.get(handle) else {
                continue;
            };
            if station.aid - prev_aid > 1 {
                // Re-issue a previously freed AID just below this entry.
                return (position, station.aid - 1);
            }
            prev_aid = station.aid;
        }
        (self.order.len(), prev_aid + 1)
    }

    /// Insertion point that keeps the AID order ascending for a requested AID.
    fn position_for_aid(&self, aid: u16) -> usize {
        for (position, &handle) in self.order.iter().enumerate() {
            if let Some(station) = self.get(handle) {
                if station.aid > aid {
                    return position;
                }
            }
        }
        self.order.len()
    }

    fn alloc_slot(&mut self, station: Box<StationInfo>) -> StationHandle {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.station = Some(station);
            StationHandle {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                station: Some(station),
            });
            StationHandle {
                index,
                generation: 0,
            }
        }
    }
}

impl Default for StationTable {
    fn default() -> Self {
        Self::new()
    }
}
