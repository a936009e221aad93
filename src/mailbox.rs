//! Inter-processor mailbox transport.
//!
//! The two processors exchange fixed-format control messages over a narrow hardware word queue:
//! one 32-bit header word followed by up to [MAX_PAYLOAD_WORDS] payload words. The header carries
//! a validity marker, and the reader refuses to trust anything behind a header that fails
//! validation: a bad marker flushes the whole queue, an oversized length drains exactly the
//! declared words, so that in both cases the transport is left at the next message boundary.
//!
//! The queue itself is abstracted by the [Mailbox] trait; [ChannelMailbox] is a software endpoint
//! over a pair of channels, used to link a MAC instance to a software peer (and by the tests).

use bitfield_struct::bitfield;
use embassy_sync::channel::{Channel, TrySendError};

use crate::{DefaultRawMutex, MacError, MacResult};

/// Compile-time maximum number of payload words in one message.
pub const MAX_PAYLOAD_WORDS: usize = 100;
/// Sentinel pattern every valid header word must carry.
pub const MSG_DELIMITER: u8 = 0xF;

#[bitfield(u32)]
pub struct MessageHeader {
    #[bits(8)]
    pub num_payload_words: u8,
    #[bits(8)]
    pub arg0: u8,
    #[bits(12)]
    pub kind: u16,
    #[bits(4)]
    pub delimiter: u8,
}

/// Message-type codes understood by either processor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Low has a received frame waiting in the indicated receive buffer.
    RxFrameReady,
    /// High has filled the indicated transmit buffer.
    TxFrameReady,
    /// Low has finished the transmit flow for the indicated buffer.
    TxFrameDone,
    /// Hardware information only the low processor can read.
    HardwareInfo,
    /// Peer status word, or a request for one.
    CpuStatus,
    ConfigChannel,
    ConfigRxAntennaMode,
    ConfigTxCtrlPower,
    ConfigRxFilter,
    ConfigPhyRx,
    SetTimestamp,
    RandomSeed,
    /// Arbitrary memory read/write in the low processor, and its reply.
    MemReadWrite,
    /// Parameter read in the low processor, and its reply.
    ParamRead,
}

impl MessageKind {
    pub const fn into_bits(self) -> u16 {
        match self {
            MessageKind::RxFrameReady => 0,
            MessageKind::TxFrameReady => 1,
            MessageKind::TxFrameDone => 2,
            MessageKind::HardwareInfo => 3,
            MessageKind::CpuStatus => 4,
            MessageKind::ConfigChannel => 5,
            MessageKind::ConfigRxAntennaMode => 6,
            MessageKind::ConfigTxCtrlPower => 7,
            MessageKind::ConfigRxFilter => 8,
            MessageKind::ConfigPhyRx => 9,
            MessageKind::SetTimestamp => 10,
            MessageKind::RandomSeed => 11,
            MessageKind::MemReadWrite => 12,
            MessageKind::ParamRead => 13,
        }
    }
    pub const fn from_bits(bits: u16) -> Option<Self> {
        Some(match bits {
            0 => MessageKind::RxFrameReady,
            1 => MessageKind::TxFrameReady,
            2 => MessageKind::TxFrameDone,
            3 => MessageKind::HardwareInfo,
            4 => MessageKind::CpuStatus,
            5 => MessageKind::ConfigChannel,
            6 => MessageKind::ConfigRxAntennaMode,
            7 => MessageKind::ConfigTxCtrlPower,
            8 => MessageKind::ConfigRxFilter,
            9 => MessageKind::ConfigPhyRx,
            10 => MessageKind::SetTimestamp,
            11 => MessageKind::RandomSeed,
            12 => MessageKind::MemReadWrite,
            13 => MessageKind::ParamRead,
            _ => return None,
        })
    }
}

/// An outbound message.
#[derive(Clone, Copy, Debug)]
pub struct Message<'a> {
    pub kind: MessageKind,
    pub arg0: u8,
    pub payload: &'a [u32],
}

/// Header of a successfully read message; the payload lives in the buffer passed to [read_msg].
#[derive(Clone, Copy, Debug)]
pub struct ReceivedMessage {
    pub kind_bits: u16,
    pub arg0: u8,
    pub num_payload_words: usize,
}

impl ReceivedMessage {
    pub fn kind(&self) -> Option<MessageKind> {
        MessageKind::from_bits(self.kind_bits)
    }
}

/// The hardware word FIFO between the processors.
///
/// Implementations must guarantee that a writer is not interleaved with a second writer for the
/// duration of one message (on hardware, the writer suspends its own interrupt dispatch).
pub trait Mailbox {
    fn is_empty(&self) -> bool;
    /// Non-blocking read of one word. `None` is a transport-level short read.
    fn try_read_word(&mut self) -> Option<u32>;
    /// Blocking read of one word.
    fn read_word_blocking(&mut self) -> u32;
    /// Blocking write of one word; blocks only on queue backpressure.
    fn write_word_blocking(&mut self, word: u32);
    /// Discard all queued inbound words.
    fn flush(&mut self);
}

/// Write one message: the header word, then the payload words.
pub fn write_msg<M: Mailbox>(mailbox: &mut M, msg: &Message<'_>) -> MacResult<()> {
    if msg.payload.len() > MAX_PAYLOAD_WORDS {
        return Err(MacError::InvalidMessage);
    }
    let header = MessageHeader::new()
        .with_num_payload_words(msg.payload.len() as u8)
        .with_arg0(msg.arg0)
        .with_kind(msg.kind.into_bits())
        .with_delimiter(MSG_DELIMITER);
    mailbox.write_word_blocking(header.into_bits());
    for &word in msg.payload {
        mailbox.write_word_blocking(word);
    }
    Ok(())
}

/// Read one message into `payload`, validating the header first.
///
/// A header that fails the validity marker poisons everything behind it, so the queue is flushed.
/// An oversized payload length drains exactly the declared words. Both leave the transport at the
/// next message boundary and fail with [MacError::InvalidMessage]. Once a header is accepted, the
/// read blocks until all declared payload words have arrived.
pub fn read_msg<M: Mailbox>(
    mailbox: &mut M,
    payload: &mut [u32; MAX_PAYLOAD_WORDS],
) -> MacResult<ReceivedMessage> {
    if mailbox.is_empty() {
        return Err(MacError::InvalidMessage);
    }

    let Some(word) = mailbox.try_read_word() else {
        return Err(MacError::NoMessageAvailable);
    };
    let header = MessageHeader::from_bits(word);

    if header.delimiter() != MSG_DELIMITER {
        mailbox.flush();
        return Err(MacError::InvalidMessage);
    }

    let num_payload_words = header.num_payload_words() as usize;
    if num_payload_words > MAX_PAYLOAD_WORDS {
        // The header itself was delimited, so trust its length to resynchronize.
        for _ in 0..num_payload_words {
            let _ = mailbox.read_word_blocking();
        }
        return Err(MacError::InvalidMessage);
    }

    for slot in payload.iter_mut().take(num_payload_words) {
        *slot = mailbox.read_word_blocking();
    }

    Ok(ReceivedMessage {
        kind_bits: header.kind(),
        arg0: header.arg0(),
        num_payload_words,
    })
}

/// Queue depth of one [ChannelMailbox] direction, in words.
pub const MAILBOX_DEPTH: usize = 256;

/// One direction of a software mailbox link.
pub type WordQueue = Channel<DefaultRawMutex, u32, MAILBOX_DEPTH>;

/// A software mailbox endpoint over two word queues.
pub struct ChannelMailbox<'a> {
    rx: &'a WordQueue,
    tx: &'a WordQueue,
}

impl<'a> ChannelMailbox<'a> {
    /// Create both endpoints of a link from its two directions.
    pub fn link(a_to_b: &'a WordQueue, b_to_a: &'a WordQueue) -> (Self, Self) {
        (
            Self {
                rx: b_to_a,
                tx: a_to_b,
            },
            Self {
                rx: a_to_b,
                tx: b_to_a,
            },
        )
    }
}

impl Mailbox for ChannelMailbox<'_> {
    fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
    fn try_read_word(&mut self) -> Option<u32> {
        self.rx.try_receive().ok()
    }
    fn read_word_blocking(&mut self) -> u32 {
        loop {
            if let Ok(word) = self.rx.try_receive() {
                return word;
            }
            core::hint::spin_loop();
        }
    }
    fn write_word_blocking(&mut self, word: u32) {
        let mut word = word;
        loop {
            match self.tx.try_send(word) {
                Ok(()) => return,
                Err(TrySendError::Full(rejected)) => {
                    word = rejected;
                    core::hint::spin_loop();
                }
            }
        }
    }
    fn flush(&mut self) {
        while self.rx.try_receive().is_ok() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link() -> (&'static WordQueue, &'static WordQueue) {
        (
            Box::leak(Box::new(WordQueue::new())),
            Box::leak(Box::new(WordQueue::new())),
        )
    }

    #[test]
    fn round_trip() {
        let (a, b) = link();
        let (mut high, mut low) = ChannelMailbox::link(a, b);

        let payload = [0xdead_beef, 0x1234_5678, 7];
        write_msg(
            &mut high,
            &Message {
                kind: MessageKind::TxFrameDone,
                arg0: 1,
                payload: &payload,
            },
        )
        .unwrap();

        let mut buf = [0u32; MAX_PAYLOAD_WORDS];
        let msg = read_msg(&mut low, &mut buf).unwrap();
        assert_eq!(msg.kind(), Some(MessageKind::TxFrameDone));
        assert_eq!(msg.arg0, 1);
        assert_eq!(msg.num_payload_words, 3);
        assert_eq!(&buf[..3], &payload);
    }

    #[test]
    fn empty_queue_is_not_a_message() {
        let (a, b) = link();
        let (_, mut low) = ChannelMailbox::link(a, b);
        let mut buf = [0u32; MAX_PAYLOAD_WORDS];
        assert_eq!(read_msg(&mut low, &mut buf), Err(MacError::InvalidMessage));
    }

    #[test]
    fn corrupt_delimiter_resynchronizes() {
        let (a, b) = link();
        let (mut high, mut low) = ChannelMailbox::link(a, b);

        // A garbage header word with a wrong marker, followed by stale words.
        high.write_word_blocking(0x0123_4567);
        high.write_word_blocking(0xffff_ffff);
        high.write_word_blocking(0xffff_ffff);

        let mut buf = [0u32; MAX_PAYLOAD_WORDS];
        assert_eq!(read_msg(&mut low, &mut buf), Err(MacError::InvalidMessage));

        // The queue was flushed, so a subsequent valid message is readable.
        write_msg(
            &mut high,
            &Message {
                kind: MessageKind::CpuStatus,
                arg0: 0,
                payload: &[0x1],
            },
        )
        .unwrap();
        let msg = read_msg(&mut low, &mut buf).unwrap();
        assert_eq!(msg.kind(), Some(MessageKind::CpuStatus));
        assert_eq!(&buf[..1], &[0x1]);
    }

    #[test]
    fn oversized_length_drains_declared_words() {
        let (a, b) = link();
        let (mut high, mut low) = ChannelMailbox::link(a, b);

        // Hand-rolled header declaring more payload than the maximum allows.
        let bogus = MessageHeader::new()
            .with_num_payload_words((MAX_PAYLOAD_WORDS + 4) as u8)
            .with_kind(MessageKind::RxFrameReady.into_bits())
            .with_delimiter(MSG_DELIMITER);
        high.write_word_blocking(bogus.into_bits());
        for _ in 0..MAX_PAYLOAD_WORDS + 4 {
            high.write_word_blocking(0xaaaa_5555);
        }
        write_msg(
            &mut high,
            &Message {
                kind: MessageKind::RandomSeed,
                arg0: 0,
                payload: &[42],
            },
        )
        .unwrap();

        let mut buf = [0u32; MAX_PAYLOAD_WORDS];
        assert_eq!(read_msg(&mut low, &mut buf), Err(MacError::InvalidMessage));
        // Exactly the declared words were drained; the next message is intact.
        let msg = read_msg(&mut low, &mut buf).unwrap();
        assert_eq!(msg.kind(), Some(MessageKind::RandomSeed));
        assert_eq!(&buf[..1], &[42]);
    }

    #[test]
    fn write_rejects_oversized_payload() {
        let (a, b) = link();
        let (mut high, _) = ChannelMailbox::link(a, b);
        let payload = [0u32; MAX_PAYLOAD_WORDS + 1];
        assert_eq!(
            write_msg(
                &mut high,
                &Message {
                    kind: MessageKind::MemReadWrite,
                    arg0: 0,
                    payload: &payload,
                },
            ),
            Err(MacError::InvalidMessage)
        );
    }
}
