//! Message dispatch and the MAC control-plane context.
//!
//! [MacHigh] owns everything the control plane mutates: the mailbox endpoint, this processor's
//! view of the packet-buffer locks, the borrowed buffer pool, the association and statistics
//! tables, the peer's hardware info and status word, and the pending buffers for the two
//! synchronous remote reads. [MacHigh::ipc_rx] drains the mailbox to empty and interprets each
//! message; it is called from the mailbox-receive interrupt path and when polling peer state, and
//! `&mut self` makes it structurally non-reentrant, so messages are processed strictly in arrival
//! order.
//!
//! Application hooks are injected as a [MacEvents] value whose methods all default to no-ops.
//! They run inside the dispatch path, so their latency directly extends interrupt response time.

use macro_bits::{bit, check_bit};

use crate::frame;
use crate::mailbox::{self, Mailbox, Message, MessageKind, ReceivedMessage, MAX_PAYLOAD_WORDS};
use crate::pkt_buf::{
    BufferArbiter, BufferRole, PacketBufferResources, PktBufLocks, RxFrameState, RxPacketBuffer,
    TxFrameInfo, TxPacketBuffer, TxParams, TxResult, NUM_TX_PKT_BUFS,
};
use crate::station::{AidRequest, StationHandle, StationTable};
use crate::stats::StatsTable;
use crate::time::MicrosecondClock;
use crate::tx_alloc::TxSlotAllocator;
use crate::{MacError, MacResult};

/// Peer processor status bits.
pub const CPU_STATUS_INITIALIZED: u32 = bit!(0);
pub const CPU_STATUS_EXCEPTION: u32 = bit!(1);
pub const CPU_STATUS_WAIT_FOR_ACCEPT: u32 = bit!(2);

/// Receive filter selections, FCS and address class ORed together.
pub const RX_FILTER_FCS_GOOD: u32 = bit!(0);
pub const RX_FILTER_FCS_ALL: u32 = bit!(1);
/// Unicast to this node, or multicast.
pub const RX_FILTER_ADDR_STANDARD: u32 = bit!(4);
/// All MPDU frames to any address.
pub const RX_FILTER_ADDR_ALL_MPDU: u32 = bit!(5);
/// All observed frames, including control.
pub const RX_FILTER_ADDR_ALL: u32 = bit!(6);

const REG_WRITE_MODE: u8 = 0;
const REG_READ_MODE: u8 = 1;

/// Receive antenna selections the low processor accepts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RxAntennaMode {
    #[default]
    SisoAntA,
    SisoAntB,
    SisoAntC,
    SisoAntD,
    SisoSelDiv2Ant,
}

impl RxAntennaMode {
    pub const fn into_bits(self) -> u8 {
        match self {
            RxAntennaMode::SisoAntA => 0,
            RxAntennaMode::SisoAntB => 1,
            RxAntennaMode::SisoAntC => 2,
            RxAntennaMode::SisoAntD => 3,
            RxAntennaMode::SisoSelDiv2Ant => 4,
        }
    }
}

/// One per-attempt transmission detail record from a transmit-done message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TxLowDetails {
    pub tx_start_timestamp: u64,
    pub phy_params: u32,
    pub chan_num: u32,
    pub contention_window: u32,
    pub short_retry_count: u8,
    pub long_retry_count: u8,
}

impl TxLowDetails {
    pub const NUM_WORDS: usize = 6;

    pub fn from_words(words: &[u32]) -> Self {
        Self {
            tx_start_timestamp: words[0] as u64 | ((words[1] as u64) << 32),
            phy_params: words[2],
            chan_num: words[3],
            contention_window: words[4],
            short_retry_count: (words[5] & 0xFF) as u8,
            long_retry_count: ((words[5] >> 8) & 0xFF) as u8,
        }
    }

    pub fn to_words(&self) -> [u32; Self::NUM_WORDS] {
        [
            self.tx_start_timestamp as u32,
            (self.tx_start_timestamp >> 32) as u32,
            self.phy_params,
            self.chan_num,
            self.contention_window,
            self.short_retry_count as u32 | ((self.long_retry_count as u32) << 8),
        ]
    }
}

/// Most detail records one transmit-done message can carry.
pub const MAX_TX_DETAILS: usize = MAX_PAYLOAD_WORDS / TxLowDetails::NUM_WORDS;

/// Only the low four type nibbles describe the peer; the rest belong to this processor.
pub const NODE_TYPE_LOW_MASK: u32 = 0x0000_FFFF;

/// Node hardware information, merged from both processors.
///
/// The peer supplies most fields (they live in storage only it can read); the high type bits and
/// the Ethernet device selection are owned locally and survive a merge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HardwareInfo {
    pub node_type: u32,
    pub serial_number: u32,
    pub fpga_dna: [u32; 2],
    pub wlan_addr: frame::MacAddr,
    pub host_addr: frame::MacAddr,
    pub eth_device: u32,
}

pub const HW_INFO_NUM_WORDS: usize = 8;

impl HardwareInfo {
    pub fn from_words(words: &[u32]) -> Self {
        let wlan_lo = words[4].to_le_bytes();
        let mid = words[5].to_le_bytes();
        let host_hi = words[6].to_le_bytes();
        Self {
            node_type: words[0],
            serial_number: words[1],
            fpga_dna: [words[2], words[3]],
            wlan_addr: [wlan_lo[0], wlan_lo[1], wlan_lo[2], wlan_lo[3], mid[0], mid[1]],
            host_addr: [mid[2], mid[3], host_hi[0], host_hi[1], host_hi[2], host_hi[3]],
            eth_device: words[7],
        }
    }

    pub fn to_words(&self) -> [u32; HW_INFO_NUM_WORDS] {
        let w = &self.wlan_addr;
        let h = &self.host_addr;
        [
            self.node_type,
            self.serial_number,
            self.fpga_dna[0],
            self.fpga_dna[1],
            u32::from_le_bytes([w[0], w[1], w[2], w[3]]),
            u32::from_le_bytes([w[4], w[5], h[0], h[1]]),
            u32::from_le_bytes([h[2], h[3], h[4], h[5]]),
            self.eth_device,
        ]
    }

    /// Merge a peer-supplied record, keeping the locally-owned fields.
    fn merge_from_peer(&mut self, words: &[u32]) {
        let local_type = self.node_type & !NODE_TYPE_LOW_MASK;
        let local_eth = self.eth_device;
        *self = Self::from_words(words);
        self.node_type = (self.node_type & NODE_TYPE_LOW_MASK) | local_type;
        self.eth_device = local_eth;
    }
}

/// Application hooks run from the dispatch path. Every method defaults to a no-op.
pub trait MacEvents {
    /// Scrape hook run on every accepted receive buffer, before [MacEvents::rx_frame].
    fn rx_frame_scrape(&mut self, _buf: &RxPacketBuffer) {}
    /// A received frame, still holding the buffer lock.
    fn rx_frame(&mut self, _buf: &mut RxPacketBuffer) {}
    /// A finished transmission with one detail record per attempt.
    fn tx_frame_done(&mut self, _frame_info: &TxFrameInfo, _details: &[TxLowDetails]) {}
    /// A transmit buffer was released; a queued frame can be dequeued now.
    fn poll_tx_queues(&mut self) {}
    /// A frame is about to be handed to the peer processor.
    fn tx_frame_dequeue(&mut self, _buf: &mut TxPacketBuffer) {}
}

/// The null-callback convention as a type.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullEvents;

impl MacEvents for NullEvents {}

/// Transmit-parameter source for one outbound frame.
#[derive(Clone, Copy, Debug)]
pub enum TxFrameMetadata {
    /// Leave whatever parameters are in the buffer.
    Ignore,
    /// Copy the station's current parameters.
    Station(StationHandle),
    Params(TxParams),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PendingReadKind {
    Idle,
    Register,
    Parameter,
}

struct PendingRead {
    kind: PendingReadKind,
    ready: bool,
    len: usize,
    buf: [u32; MAX_PAYLOAD_WORDS],
}

impl PendingRead {
    const fn idle() -> Self {
        Self {
            kind: PendingReadKind::Idle,
            ready: false,
            len: 0,
            buf: [0; MAX_PAYLOAD_WORDS],
        }
    }
}

/// The MAC control-plane context.
pub struct MacHigh<'res, M, A, C, E>
where
    M: Mailbox,
    A: BufferArbiter,
    C: MicrosecondClock,
    E: MacEvents,
{
    mailbox: M,
    locks: PktBufLocks<'res, A>,
    buffers: &'res mut PacketBufferResources,
    clock: C,
    events: E,
    tx_alloc: TxSlotAllocator,
    stations: StationTable,
    stats: StatsTable,
    hw_info: HardwareInfo,
    cpu_low_status: u32,
    rx_ant_mode: RxAntennaMode,
    unique_seq: u64,
    pending_read: PendingRead,
    rx_msg_payload: [u32; MAX_PAYLOAD_WORDS],
}

impl<'res, M, A, C, E> MacHigh<'res, M, A, C, E>
where
    M: Mailbox,
    A: BufferArbiter,
    C: MicrosecondClock,
    E: MacEvents,
{
    /// Bring up the control plane around its platform resources.
    ///
    /// All packet-buffer locks this processor might still hold from before a soft reset are
    /// released; most of those unlocks fail harmlessly.
    pub fn new(
        mailbox: M,
        locks: PktBufLocks<'res, A>,
        buffers: &'res mut PacketBufferResources,
        clock: C,
        events: E,
    ) -> Self {
        locks.unlock_all();
        Self {
            mailbox,
            locks,
            buffers,
            clock,
            events,
            tx_alloc: TxSlotAllocator::new(),
            stations: StationTable::new(),
            stats: StatsTable::new(),
            hw_info: HardwareInfo::default(),
            cpu_low_status: 0,
            rx_ant_mode: RxAntennaMode::default(),
            unique_seq: 0,
            pending_read: PendingRead::idle(),
            rx_msg_payload: [0; MAX_PAYLOAD_WORDS],
        }
    }

    pub fn stations(&self) -> &StationTable {
        &self.stations
    }

    pub fn stations_mut(&mut self) -> &mut StationTable {
        &mut self.stations
    }

    pub fn stats(&self) -> &StatsTable {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut StatsTable {
        &mut self.stats
    }

    pub fn events(&self) -> &E {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut E {
        &mut self.events
    }

    pub fn hardware_info(&self) -> &HardwareInfo {
        &self.hw_info
    }

    /// Locally-owned hardware info fields (high type bits, Ethernet device) are set through this.
    pub fn hardware_info_mut(&mut self) -> &mut HardwareInfo {
        &mut self.hw_info
    }

    pub fn peer_status(&self) -> u32 {
        self.cpu_low_status
    }

    pub fn rx_antenna_mode(&self) -> RxAntennaMode {
        self.rx_ant_mode
    }

    /// Sequence number the next transmitted frame will carry.
    pub fn unique_seq(&self) -> u64 {
        self.unique_seq
    }

    pub fn locks(&self) -> &PktBufLocks<'res, A> {
        &self.locks
    }

    pub fn tx_packet_buffer_mut(&mut self, index: usize) -> Option<&mut TxPacketBuffer> {
        self.buffers.tx.get_mut(index)
    }

    pub fn rx_packet_buffer_mut(&mut self, index: usize) -> Option<&mut RxPacketBuffer> {
        self.buffers.rx.get_mut(index)
    }

    /// Add an association, wiring its statistics entry.
    pub fn add_association(
        &mut self,
        addr: &frame::MacAddr,
        request: AidRequest,
    ) -> MacResult<StationHandle> {
        self.stations.add(&mut self.stats, addr, request)
    }

    /// Remove an association, detaching or freeing its statistics entry.
    pub fn remove_association(&mut self, addr: &frame::MacAddr) -> MacResult<()> {
        self.stations.remove(&mut self.stats, addr)
    }

    // ---------------------------------------------------------------------
    // Inbound path
    // ---------------------------------------------------------------------

    /// Drain the mailbox and dispatch every queued message.
    pub fn ipc_rx(&mut self) {
        loop {
            let msg = match mailbox::read_msg(&mut self.mailbox, &mut self.rx_msg_payload) {
                Ok(msg) => msg,
                Err(_) => break,
            };
            self.process_msg(msg);
        }
    }

    fn process_msg(&mut self, msg: ReceivedMessage) {
        match msg.kind() {
            Some(MessageKind::RxFrameReady) => self.handle_rx_frame_ready(msg.arg0 as usize),
            Some(MessageKind::TxFrameDone) => {
                self.handle_tx_frame_done(msg.arg0 as usize, msg.num_payload_words)
            }
            Some(MessageKind::HardwareInfo) => {
                if msg.num_payload_words >= HW_INFO_NUM_WORDS {
                    self.hw_info
                        .merge_from_peer(&self.rx_msg_payload[..HW_INFO_NUM_WORDS]);
                } else {
                    error!("short hardware info message: {} words", msg.num_payload_words);
                }
            }
            Some(MessageKind::CpuStatus) => self.handle_cpu_status(msg.num_payload_words),
            Some(MessageKind::MemReadWrite) => {
                self.complete_pending_read(PendingReadKind::Register, msg.num_payload_words)
            }
            Some(MessageKind::ParamRead) => {
                self.complete_pending_read(PendingReadKind::Parameter, msg.num_payload_words)
            }
            Some(other) => {
                error!("unhandled ipc message kind {}", other.into_bits());
            }
            None => {
                error!("unknown ipc message type {}", msg.kind_bits);
            }
        }
    }

    /// The peer received a frame addressed to this node (or broadcast); it unlocked the buffer
    /// before sending this message.
    fn handle_rx_frame_ready(&mut self, index: usize) {
        if self.locks.try_lock(BufferRole::Rx, index).is_err() {
            error!("unable to lock rx pkt buf {}", index);
            return;
        }

        let now = self.clock.now_usec();
        self.events.rx_frame_scrape(&self.buffers.rx[index]);

        let length = self.buffers.rx[index].frame_info.length;
        if let Some(transmitter) = frame::transmitter_addr(&self.buffers.rx[index].frame) {
            let stats_handle = match self
                .stations
                .find_by_addr(&transmitter)
                .and_then(|h| self.stations.get(h))
            {
                Some(station) => Some(station.stats),
                // Not associated; tracked only when promiscuous statistics are enabled.
                None => self.stats.add(&transmitter, false),
            };
            if let Some(handle) = stats_handle {
                self.stats
                    .update_rx(handle, &self.buffers.rx[index].frame, length, now);
            }
        }

        self.events.rx_frame(&mut self.buffers.rx[index]);

        self.buffers.rx[index].frame_info.state = RxFrameState::Empty;
        if self.locks.unlock(BufferRole::Rx, index).is_err() {
            error!("unable to unlock rx pkt buf {}", index);
        }
    }

    /// The peer finished the transmit flow for a buffer this processor handed over.
    fn handle_tx_frame_done(&mut self, index: usize, num_payload_words: usize) {
        if self.locks.try_lock(BufferRole::Tx, index).is_err() {
            error!("tx done lock state mismatch on pkt buf {}", index);
            return;
        }

        let num_details = (num_payload_words / TxLowDetails::NUM_WORDS).min(MAX_TX_DETAILS);
        let mut details = [TxLowDetails::default(); MAX_TX_DETAILS];
        for (i, record) in details.iter_mut().take(num_details).enumerate() {
            let words = &self.rx_msg_payload
                [i * TxLowDetails::NUM_WORDS..(i + 1) * TxLowDetails::NUM_WORDS];
            *record = TxLowDetails::from_words(words);
        }

        let now = self.clock.now_usec();
        let buf = &self.buffers.tx[index];
        if let Some(receiver) = frame::receiver_addr(&buf.frame) {
            if let Some(handle) = self
                .stations
                .find_by_addr(&receiver)
                .and_then(|h| self.stations.get(h))
                .map(|s| s.stats)
            {
                self.stats
                    .update_tx(handle, &buf.frame_info, &buf.frame, now);
            }
        }

        self.events
            .tx_frame_done(&self.buffers.tx[index].frame_info, &details[..num_details]);

        if self.release_tx_packet_buffer(index).is_err() {
            error!("tx pkt buf {} release state mismatch", index);
        }
        self.events.poll_tx_queues();
    }

    fn handle_cpu_status(&mut self, num_payload_words: usize) {
        if num_payload_words < 1 {
            error!("empty cpu status message");
            return;
        }
        self.cpu_low_status = self.rx_msg_payload[0];

        if check_bit!(self.cpu_low_status, CPU_STATUS_EXCEPTION) {
            let reason = if num_payload_words > 1 {
                self.rx_msg_payload[1]
            } else {
                0
            };
            error!(
                "unrecoverable exception in the low processor, reason {}; halting",
                reason
            );
            // Shared buffer state can no longer be trusted.
            loop {
                core::hint::spin_loop();
            }
        }
    }

    fn complete_pending_read(&mut self, kind: PendingReadKind, num_payload_words: usize) {
        if self.pending_read.kind == kind && !self.pending_read.ready {
            self.pending_read.buf[..num_payload_words]
                .copy_from_slice(&self.rx_msg_payload[..num_payload_words]);
            self.pending_read.len = num_payload_words;
            self.pending_read.ready = true;
        } else {
            error!("unexpected read reply from the low processor");
        }
    }

    // ---------------------------------------------------------------------
    // Transmit path
    // ---------------------------------------------------------------------

    /// True unless both transmit buffers are in use.
    pub fn is_ready_for_tx(&self) -> bool {
        self.tx_alloc.is_ready()
    }

    /// Select and lock the next free transmit buffer.
    pub fn lock_new_tx_packet_buffer(&mut self) -> MacResult<usize> {
        self.tx_alloc.allocate(&self.locks)
    }

    /// Release a transmit buffer after its done message.
    pub fn release_tx_packet_buffer(&mut self, index: usize) -> MacResult<()> {
        self.tx_alloc.release(&self.locks, index)
    }

    /// Hand a filled transmit buffer to the peer processor.
    ///
    /// Stamps the frame's 12-bit sequence field from the unique counter, fires the dequeue hook,
    /// populates the frame metadata, then unlocks the buffer and sends the ready message. The
    /// buffer stays accounted busy until the peer reports the transmission done.
    pub fn frame_transmit(
        &mut self,
        index: usize,
        length: u16,
        flags: u8,
        metadata: TxFrameMetadata,
    ) -> MacResult<()> {
        if index >= NUM_TX_PKT_BUFS {
            return Err(MacError::InvalidIndex);
        }

        let seq = (self.unique_seq & frame::MAX_SEQ_NUM as u64) as u16;
        frame::set_sequence_number(&mut self.buffers.tx[index].frame, seq);

        self.events.tx_frame_dequeue(&mut self.buffers.tx[index]);

        let params = match metadata {
            TxFrameMetadata::Ignore => None,
            TxFrameMetadata::Station(handle) => self.stations.get(handle).map(|s| s.tx),
            TxFrameMetadata::Params(params) => Some(params),
        };

        let now = self.clock.now_usec();
        let info = &mut self.buffers.tx[index].frame_info;
        info.timestamp_create = now;
        info.length = length;
        info.flags = flags;
        info.unique_seq = self.unique_seq;
        if let Some(params) = params {
            info.params = params;
        }
        info.short_retry_count = 0;
        info.long_retry_count = 0;
        info.result = TxResult::None;
        self.unique_seq += 1;

        if let Err(e) = self.locks.unlock(BufferRole::Tx, index) {
            error!("unable to unlock tx pkt buf {}", index);
            return Err(e);
        }
        self.tx_alloc.mark_busy(index);
        self.send(MessageKind::TxFrameReady, index as u8, &[])
    }

    // ---------------------------------------------------------------------
    // Peer configuration
    // ---------------------------------------------------------------------

    fn send(&mut self, kind: MessageKind, arg0: u8, payload: &[u32]) -> MacResult<()> {
        mailbox::write_msg(
            &mut self.mailbox,
            &Message {
                kind,
                arg0,
                payload,
            },
        )
    }

    /// Tune the peer to an allowed 2.4 or 5 GHz channel.
    pub fn set_channel(&mut self, channel: u32) -> MacResult<()> {
        if !matches!(channel, 1..=11 | 36 | 40 | 44 | 48) {
            error!("channel {} not allowed", channel);
            return Err(MacError::InvalidChannel);
        }
        self.send(MessageKind::ConfigChannel, 0, &[channel])
    }

    pub fn set_rx_antenna_mode(&mut self, mode: RxAntennaMode) -> MacResult<()> {
        self.rx_ant_mode = mode;
        self.send(
            MessageKind::ConfigRxAntennaMode,
            0,
            &[mode.into_bits() as u32],
        )
    }

    /// Transmit power used for control responses the peer generates on its own.
    pub fn set_tx_ctrl_power(&mut self, power: i8) -> MacResult<()> {
        self.send(MessageKind::ConfigTxCtrlPower, 0, &[power as u32])
    }

    /// Select which receptions the peer passes up; OR one FCS and one address selection.
    pub fn set_rx_filter_mode(&mut self, filter_mode: u32) -> MacResult<()> {
        self.send(MessageKind::ConfigRxFilter, 0, &[filter_mode])
    }

    pub fn set_dsss(&mut self, enabled: bool) -> MacResult<()> {
        self.send(MessageKind::ConfigPhyRx, 0, &[enabled as u32])
    }

    /// Replace the peer's microsecond timestamp.
    pub fn set_timestamp(&mut self, timestamp: u64) -> MacResult<()> {
        self.send(
            MessageKind::SetTimestamp,
            0,
            &[timestamp as u32, (timestamp >> 32) as u32],
        )
    }

    /// Add a signed offset to the peer's microsecond timestamp.
    pub fn adjust_timestamp(&mut self, delta: i64) -> MacResult<()> {
        let delta = delta as u64;
        self.send(
            MessageKind::SetTimestamp,
            1,
            &[delta as u32, (delta >> 32) as u32],
        )
    }

    pub fn set_random_seed(&mut self, seed: u32) -> MacResult<()> {
        self.send(MessageKind::RandomSeed, 0, &[seed])
    }

    /// Ask the peer to report its status word.
    pub fn request_peer_status(&mut self) -> MacResult<()> {
        self.send(MessageKind::CpuStatus, 1, &[])
    }

    /// Drain the mailbox, then test whether the peer has reported itself initialized.
    pub fn is_peer_initialized(&mut self) -> bool {
        self.ipc_rx();
        check_bit!(self.cpu_low_status, CPU_STATUS_INITIALIZED)
    }

    // ---------------------------------------------------------------------
    // Synchronous remote reads and fire-and-forget writes
    // ---------------------------------------------------------------------

    /// Write words into the peer's memory, fire-and-forget.
    pub fn write_low_mem(&mut self, baseaddr: u32, words: &[u32]) -> MacResult<()> {
        if words.len() + 2 > MAX_PAYLOAD_WORDS {
            return Err(MacError::InvalidMessage);
        }
        let mut payload = [0u32; MAX_PAYLOAD_WORDS];
        payload[0] = baseaddr;
        payload[1] = words.len() as u32;
        payload[2..2 + words.len()].copy_from_slice(words);
        self.send(
            MessageKind::MemReadWrite,
            REG_WRITE_MODE,
            &payload[..2 + words.len()],
        )
    }

    /// Read words from the peer's memory, blocking until the reply or `timeout_usec` elapses.
    pub fn read_low_mem(
        &mut self,
        baseaddr: u32,
        out: &mut [u32],
        timeout_usec: u64,
    ) -> MacResult<usize> {
        self.pending_read = PendingRead::idle();
        self.pending_read.kind = PendingReadKind::Register;
        self.send(
            MessageKind::MemReadWrite,
            REG_READ_MODE,
            &[baseaddr, out.len() as u32],
        )?;
        self.wait_pending_read(out, timeout_usec)
    }

    /// Read a parameter from the peer, blocking until the reply or `timeout_usec` elapses.
    ///
    /// Returns the number of words the peer reported.
    pub fn read_low_param(
        &mut self,
        param_id: u32,
        out: &mut [u32],
        timeout_usec: u64,
    ) -> MacResult<usize> {
        self.pending_read = PendingRead::idle();
        self.pending_read.kind = PendingReadKind::Parameter;
        self.send(MessageKind::ParamRead, REG_READ_MODE, &[param_id])?;
        self.wait_pending_read(out, timeout_usec)
    }

    /// Poll the dispatch path until the registered read completes.
    fn wait_pending_read(&mut self, out: &mut [u32], timeout_usec: u64) -> MacResult<usize> {
        let deadline = self.clock.now_usec().saturating_add(timeout_usec);
        loop {
            self.ipc_rx();
            if self.pending_read.ready {
                let n = self.pending_read.len.min(out.len());
                out[..n].copy_from_slice(&self.pending_read.buf[..n]);
                let n = self.pending_read.len;
                self.pending_read = PendingRead::idle();
                return Ok(n);
            }
            if self.clock.now_usec() > deadline {
                self.pending_read = PendingRead::idle();
                error!("no read reply from the low processor");
                return Err(MacError::PeerTimeout);
            }
            core::hint::spin_loop();
        }
    }
}
