//! End-to-end exercise of the control plane against a scripted low processor.
//!
//! Both sides of the link run in one thread: a software arbiter stands in for the hardware mutex
//! core, two word queues for the mailbox, and the test plays the low processor's half of the
//! protocol by hand.

use std::cell::Cell;
use std::rc::Rc;

use wlan_mac_high::dispatch::{
    HardwareInfo, MacEvents, TxFrameMetadata, TxLowDetails, CPU_STATUS_INITIALIZED,
};
use wlan_mac_high::frame;
use wlan_mac_high::mailbox::{
    read_msg, write_msg, ChannelMailbox, Message, MessageKind, WordQueue, MAX_PAYLOAD_WORDS,
};
use wlan_mac_high::pkt_buf::{
    BufferRole, OwnerId, PacketBufferResources, PktBufLocks, RxFrameState, SoftwareArbiter,
    TxFrameInfo, TxResult, NUM_PKT_BUF_MUTEXES,
};
use wlan_mac_high::station::AidRequest;
use wlan_mac_high::time::MicrosecondClock;
use wlan_mac_high::MacHigh;

const HIGH: OwnerId = OwnerId(1);
const LOW: OwnerId = OwnerId(2);

#[derive(Clone, Default)]
struct TestClock(Rc<Cell<u64>>);

impl MicrosecondClock for TestClock {
    fn now_usec(&self) -> u64 {
        let t = self.0.get() + 1;
        self.0.set(t);
        t
    }
}

#[derive(Default)]
struct Recorder {
    rx_frames: usize,
    rx_lengths: Vec<u16>,
    tx_done: usize,
    attempts_reported: usize,
    polls: usize,
}

impl MacEvents for Recorder {
    fn rx_frame(&mut self, buf: &mut wlan_mac_high::pkt_buf::RxPacketBuffer) {
        self.rx_frames += 1;
        self.rx_lengths.push(buf.frame_info.length);
    }
    fn tx_frame_done(&mut self, _frame_info: &TxFrameInfo, details: &[TxLowDetails]) {
        self.tx_done += 1;
        self.attempts_reported += details.len();
    }
    fn poll_tx_queues(&mut self) {
        self.polls += 1;
    }
}

fn data_frame(transmitter: frame::MacAddr, receiver: frame::MacAddr) -> [u8; 80] {
    let mut f = [0u8; 80];
    f[0] = 0x08;
    f[4..10].copy_from_slice(&receiver);
    f[10..16].copy_from_slice(&transmitter);
    f[frame::MAC_HEADER_LEN + 6..frame::MAC_HEADER_LEN + 8]
        .copy_from_slice(&0x0800u16.to_be_bytes());
    f
}

#[test]
fn full_association_rx_tx_cycle() {
    let arbiter: &'static SoftwareArbiter<NUM_PKT_BUF_MUTEXES> =
        Box::leak(Box::new(SoftwareArbiter::new()));
    let buffers: &'static mut PacketBufferResources =
        Box::leak(Box::new(PacketBufferResources::new()));
    let to_low: &'static WordQueue = Box::leak(Box::new(WordQueue::new()));
    let to_high: &'static WordQueue = Box::leak(Box::new(WordQueue::new()));

    let (high_end, mut low_end) = ChannelMailbox::link(to_low, to_high);
    let low_locks = PktBufLocks::new(arbiter, LOW);
    let mut low_payload = [0u32; MAX_PAYLOAD_WORDS];

    let mut mac = MacHigh::new(
        high_end,
        PktBufLocks::new(arbiter, HIGH),
        buffers,
        TestClock::default(),
        Recorder::default(),
    );

    // --- Peer bring-up: status, then hardware info ---------------------------------------
    assert!(!mac.is_peer_initialized());
    write_msg(
        &mut low_end,
        &Message {
            kind: MessageKind::CpuStatus,
            arg0: 0,
            payload: &[CPU_STATUS_INITIALIZED],
        },
    )
    .unwrap();

    let board = HardwareInfo {
        node_type: 0x0000_0102,
        serial_number: 4077,
        fpga_dna: [0x1234_5678, 0x9abc_def0],
        wlan_addr: [0x40, 0xD8, 0x55, 0, 0, 0x10],
        host_addr: [0x40, 0xD8, 0x55, 0, 0, 0x11],
        eth_device: 1,
    };
    write_msg(
        &mut low_end,
        &Message {
            kind: MessageKind::HardwareInfo,
            arg0: 0,
            payload: &board.to_words(),
        },
    )
    .unwrap();

    assert!(mac.is_peer_initialized());
    assert_eq!(mac.hardware_info().serial_number, 4077);
    assert_eq!(mac.hardware_info().wlan_addr, board.wlan_addr);

    // --- Association --------------------------------------------------------------------
    let peer_a = [0x02, 0, 0, 0, 0, 0xA1];
    let peer_b = [0x02, 0, 0, 0, 0, 0xB2];
    let a = mac.add_association(&peer_a, AidRequest::Any).unwrap();
    assert_eq!(mac.stations().get(a).unwrap().aid, 1);

    // --- Receive flow -------------------------------------------------------------------
    // The low processor fills a receive buffer under its own lock, releases it, then signals.
    let rx_index = 3;
    assert_eq!(low_locks.try_lock(BufferRole::Rx, rx_index), Ok(()));
    {
        let frame_bytes = data_frame(peer_a, board.wlan_addr);
        let buf = mac.rx_packet_buffer_mut(rx_index).unwrap();
        buf.frame[..frame_bytes.len()].copy_from_slice(&frame_bytes);
        buf.frame_info.length = frame_bytes.len() as u16;
        buf.frame_info.state = RxFrameState::FullReady;
    }
    assert_eq!(low_locks.unlock(BufferRole::Rx, rx_index), Ok(()));
    write_msg(
        &mut low_end,
        &Message {
            kind: MessageKind::RxFrameReady,
            arg0: rx_index as u8,
            payload: &[],
        },
    )
    .unwrap();

    mac.ipc_rx();

    assert_eq!(mac.events().rx_frames, 1);
    assert_eq!(mac.events().rx_lengths, vec![80]);
    assert_eq!(
        mac.rx_packet_buffer_mut(rx_index).unwrap().frame_info.state,
        RxFrameState::Empty
    );
    // The buffer is free for the low processor again.
    assert_eq!(low_locks.try_lock(BufferRole::Rx, rx_index), Ok(()));
    assert_eq!(low_locks.unlock(BufferRole::Rx, rx_index), Ok(()));
    // Reception was accounted on the association's statistics entry.
    let stats_handle = mac.stations().get(a).unwrap().stats;
    assert_eq!(
        mac.stats().get(stats_handle).unwrap().data.rx_num_packets,
        1
    );

    // --- Transmit flow ------------------------------------------------------------------
    let slot = mac.lock_new_tx_packet_buffer().unwrap();
    let frame_bytes = data_frame(board.wlan_addr, peer_a);
    mac.tx_packet_buffer_mut(slot).unwrap().frame[..frame_bytes.len()]
        .copy_from_slice(&frame_bytes);
    mac.frame_transmit(
        slot,
        frame_bytes.len() as u16,
        0,
        TxFrameMetadata::Station(a),
    )
    .unwrap();

    // The low processor accepts the buffer, transmits and reports back.
    let msg = read_msg(&mut low_end, &mut low_payload).unwrap();
    assert_eq!(msg.kind(), Some(MessageKind::TxFrameReady));
    let tx_index = msg.arg0 as usize;
    assert_eq!(tx_index, slot);
    assert_eq!(low_locks.try_lock(BufferRole::Tx, tx_index), Ok(()));
    {
        let info = &mut mac.tx_packet_buffer_mut(tx_index).unwrap().frame_info;
        info.result = TxResult::Success;
        info.short_retry_count = 2;
    }
    assert_eq!(low_locks.unlock(BufferRole::Tx, tx_index), Ok(()));
    let attempt = TxLowDetails {
        tx_start_timestamp: 1_000_000,
        phy_params: 0x0b,
        chan_num: 1,
        contention_window: 15,
        short_retry_count: 2,
        long_retry_count: 0,
    };
    let mut done_payload = Vec::new();
    for _ in 0..3 {
        done_payload.extend_from_slice(&attempt.to_words());
    }
    write_msg(
        &mut low_end,
        &Message {
            kind: MessageKind::TxFrameDone,
            arg0: tx_index as u8,
            payload: &done_payload,
        },
    )
    .unwrap();

    mac.ipc_rx();

    assert_eq!(mac.events().tx_done, 1);
    assert_eq!(mac.events().attempts_reported, 3);
    assert_eq!(mac.events().polls, 1);
    assert!(mac.is_ready_for_tx());
    let entry = mac.stats().get(stats_handle).unwrap();
    assert_eq!(entry.data.tx_num_packets_total, 1);
    assert_eq!(entry.data.tx_num_packets_success, 1);
    assert_eq!(entry.data.tx_num_attempts_low, 2);

    // --- AID bookkeeping across removals -------------------------------------------------
    let b = mac.add_association(&peer_b, AidRequest::Any).unwrap();
    assert_eq!(mac.stations().get(b).unwrap().aid, 2);
    mac.remove_association(&peer_a).unwrap();
    // Promiscuous tracking keeps the statistics entry, now unassociated.
    assert!(!mac.stats().get(stats_handle).unwrap().is_associated);

    let peer_c = [0x02, 0, 0, 0, 0, 0xC3];
    let c = mac.add_association(&peer_c, AidRequest::Any).unwrap();
    assert_eq!(mac.stations().get(c).unwrap().aid, 1);
    let order: Vec<u16> = mac.stations().iter().map(|(_, s)| s.aid).collect();
    assert_eq!(order, vec![1, 2]);

    // --- Outbound configuration reaches the peer -----------------------------------------
    mac.set_channel(6).unwrap();
    let msg = read_msg(&mut low_end, &mut low_payload).unwrap();
    assert_eq!(msg.kind(), Some(MessageKind::ConfigChannel));
    assert_eq!(low_payload[0], 6);

    // --- Synchronous parameter read ------------------------------------------------------
    write_msg(
        &mut low_end,
        &Message {
            kind: MessageKind::ParamRead,
            arg0: 0,
            payload: &[0xCAFE, 0xF00D],
        },
    )
    .unwrap();
    let mut out = [0u32; 4];
    let n = mac.read_low_param(3, &mut out, 10_000).unwrap();
    assert_eq!(n, 2);
    assert_eq!(&out[..2], &[0xCAFE, 0xF00D]);
    // The request itself is still sitting in the low processor's queue.
    let msg = read_msg(&mut low_end, &mut low_payload).unwrap();
    assert_eq!(msg.kind(), Some(MessageKind::ParamRead));
    assert_eq!(low_payload[0], 3);
}
