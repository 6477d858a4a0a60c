//! Leaf error types per subsystem, composed into [`CoreError`].

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum DeviceError {
    #[error("device {0:?} is not up")]
    #[diagnostic(code(tapstack::device::not_up), help("call open() before transmit"))]
    NotUp(String),

    #[error("payload of {len} bytes exceeds mtu {mtu}")]
    #[diagnostic(code(tapstack::device::too_long))]
    TooLong { len: usize, mtu: usize },

    #[error("device {0:?} is already up")]
    AlreadyUp(String),

    #[error("duplicate interface for address family on device {0:?}")]
    DuplicateInterface(String),

    #[error("driver I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error, Diagnostic)]
pub enum ProtocolError {
    #[error("ethertype {0:#06x} already registered")]
    #[diagnostic(code(tapstack::protocol::already_registered))]
    AlreadyRegistered(u16),

    #[error("input fifo full for ethertype {0:#06x}")]
    FifoFull(u16),
}

#[derive(Debug, Error, Diagnostic)]
pub enum ArpError {
    #[error("frame too short to be an ARP packet ({0} bytes)")]
    InvalidFrame(usize),

    #[error("unsupported hardware/protocol combination in ARP header")]
    UnsupportedAddressFamily,

    #[error("device is not Ethernet or interface is not IPv4")]
    #[diagnostic(code(tapstack::arp::resolve_error))]
    ResolveError,
}

#[derive(Debug, Error, Diagnostic)]
pub enum FabricError {
    #[error("irq {irq} already registered and sharing was not requested by both sides")]
    #[diagnostic(
        code(tapstack::fabric::irq_conflict),
        help("pass shared: true on every registration for a shared irq number")
    )]
    IrqConflict { irq: u32 },

    #[error("irq {0} is reserved for the fabric's own signals")]
    #[diagnostic(code(tapstack::fabric::reserved_irq), help("pick an irq number >= IRQ_BASE"))]
    ReservedIrq(u32),

    #[error("servicing thread failed to start")]
    #[diagnostic(code(tapstack::fabric::spawn_failed))]
    SpawnFailed(#[from] std::io::Error),

    #[error("mio registration failed: {0}")]
    Poll(std::io::Error),
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Arp(#[from] ArpError),
    #[error(transparent)]
    Fabric(#[from] FabricError),
}
