//! # `wlan-mac-high`
//! This is the control-plane core of a split-processor 802.11 MAC. Protocol logic runs on this
//! processor ("high"), while time-critical PHY/MAC framing runs on a peer processor ("low"). The
//! two share no memory model; everything they agree on flows through a word-granular hardware
//! mailbox and a small pool of hardware-arbitrated packet buffers.
//! ## Architecture overview
//! This chapter gives a short overview of how the two processors cooperate.
//!
//! ### Messaging
//! All control traffic between the processors is carried by fixed-format messages: one 32-bit
//! header word followed by up to [mailbox::MAX_PAYLOAD_WORDS] payload words. The header carries a
//! validity marker, a message-type code, an argument byte and the payload length. The receive side
//! validates the marker and length before trusting anything else in the queue; a corrupt header
//! discards the queue contents so the next writer starts at a clean message boundary. See
//! [mailbox] for the framing rules and [dispatch::MacHigh::ipc_rx] for how inbound messages drive
//! the rest of the MAC.
//!
//! ### Packet buffers
//! Frames live in a fixed pool of transmit and receive buffers, each protected by an exclusive
//! hardware mutex slot keyed by (role, index). Buffers are never allocated or freed; ownership is
//! handed back and forth through lock transitions that the message protocol choreographs. Because
//! each buffer has exactly one contender at any time by construction, locks are only ever tried,
//! never waited on. A failed attempt is a protocol violation and is logged, not retried.
//!
//! ### Transmission
//! The high processor fills one of two transmit buffers (ping/pong), unlocks it and tells the low
//! processor it is ready. While that frame is in flight, the other buffer can be filled. The
//! transmit-done message returns the buffer along with one detail record per transmission attempt.
//!
//! ### Stations and statistics
//! Associated peers are tracked in an AID-ordered association table; traffic counters for peers
//! (associated or merely observed, when promiscuous tracking is enabled) live in a separate
//! bounded statistics table with eviction of the least-recently-active unassociated entry.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub(crate) mod fmt;

pub mod dispatch;
pub mod frame;
pub mod mailbox;
pub mod pkt_buf;
pub mod station;
pub mod stats;
pub mod time;
pub mod tx_alloc;

pub use dispatch::{MacEvents, MacHigh, NullEvents};

#[cfg(not(feature = "critical_section"))]
type DefaultRawMutex = embassy_sync::blocking_mutex::raw::NoopRawMutex;
#[cfg(feature = "critical_section")]
type DefaultRawMutex = embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

/// Errors reported by the MAC control plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MacError {
    /// Framing, validity-marker or length failure on the mailbox.
    InvalidMessage,
    /// Transport-level short read; distinct from a malformed message.
    NoMessageAvailable,
    /// Packet-buffer index out of range for its role.
    InvalidIndex,
    /// Non-blocking exclusive acquire failed.
    AlreadyLocked,
    /// Unlock attempted by a non-owner, or the buffer was not locked.
    NotOwner,
    /// Both transmit buffer slots are busy.
    NoFreeSlot,
    /// Association table is at its configured maximum.
    TableFull,
    /// Requested AID is in use by a different address.
    AidConflict,
    /// No entry for the given address.
    NotFound,
    /// Entry is flagged to never be removed.
    NotRemovable,
    InvalidChannel,
    InvalidAntennaMode,
    /// The peer processor did not answer a synchronous read in time.
    PeerTimeout,
}

pub type MacResult<T> = Result<T, MacError>;
