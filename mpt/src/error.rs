//! Engine error types.

use core::fmt;

/// Errors surfaced by the MPT engine.
///
/// Each variant corresponds to one of the distinct failure codes the
/// firmware interface can produce, so callers (probe paths, recovery
/// triggers) can log a precise cause and decide between teardown and a
/// later retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MptError {
    /// The IOC never reached the READY doorbell state.
    NotReady,
    /// IOC Facts or Port Facts retrieval failed after all retries.
    FactsFailed,
    /// The request/reply FIFO pool could not be allocated or primed.
    FifoAllocFailed,
    /// The IOCInit or PortEnable exchange failed.
    InitFailed,
    /// The initial doorbell-interrupt wait of a handshake timed out.
    HandshakeTimeout,
    /// A per-word doorbell acknowledgement wait timed out.
    DoorbellAckTimeout,
    /// The doorbell reply-accumulation phase timed out.
    ReplyTimeout,
    /// The doorbell was already mid-handshake when an exchange started.
    DoorbellInUse,
    /// No free request frame was available (normal under load; retry).
    NoFreeFrame,
    /// DMA-capable memory could not be allocated.
    NoDmaMemory,
    /// The IOC is owned and initialized by a peer entity; refusing to
    /// touch it.
    OwnedByPeer,
    /// The IOC reported a firmware fault; the raw fault code is attached.
    HardwareFault(u16),
    /// The reply carried a non-success IOC status.
    BadStatus(u16),
    /// A sleeping primitive was invoked from a context that may not sleep.
    FromInterruptContext,
    /// The diagnostic reset sequence failed to restore the IOC.
    ResetFailed,
    /// A blocked request was force-completed by a concurrent recovery.
    AdapterReset,
    /// A callback handle was zero or out of range.
    InvalidHandle,
    /// A malformed argument (bad buffer length, bad page address, ...).
    InvalidParameter,
}

impl fmt::Display for MptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady => f.write_str("IOC not ready"),
            Self::FactsFailed => f.write_str("IOC facts retrieval failed"),
            Self::FifoAllocFailed => f.write_str("FIFO pool allocation failed"),
            Self::InitFailed => f.write_str("IOC initialization failed"),
            Self::HandshakeTimeout => f.write_str("doorbell handshake timed out"),
            Self::DoorbellAckTimeout => f.write_str("doorbell ack timed out"),
            Self::ReplyTimeout => f.write_str("doorbell reply timed out"),
            Self::DoorbellInUse => f.write_str("doorbell already active"),
            Self::NoFreeFrame => f.write_str("no free request frame"),
            Self::NoDmaMemory => f.write_str("DMA allocation failed"),
            Self::OwnedByPeer => f.write_str("IOC owned by peer"),
            Self::HardwareFault(code) => write!(f, "IOC fault {code:#06x}"),
            Self::BadStatus(status) => write!(f, "bad IOC status {status:#06x}"),
            Self::FromInterruptContext => f.write_str("not allowed from interrupt context"),
            Self::ResetFailed => f.write_str("diagnostic reset failed"),
            Self::AdapterReset => f.write_str("request aborted by adapter reset"),
            Self::InvalidHandle => f.write_str("invalid callback handle"),
            Self::InvalidParameter => f.write_str("invalid parameter"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_fault_code() {
        extern crate std;
        use std::format;
        assert_eq!(format!("{}", MptError::HardwareFault(0x2622)), "IOC fault 0x2622");
        assert_eq!(format!("{}", MptError::BadStatus(0x0022)), "bad IOC status 0x0022");
        assert_eq!(format!("{}", MptError::NoFreeFrame), "no free request frame");
    }

    #[test]
    fn error_equality() {
        assert_eq!(MptError::NotReady, MptError::NotReady);
        assert_ne!(MptError::NotReady, MptError::FactsFailed);
        assert_ne!(MptError::HardwareFault(1), MptError::HardwareFault(2));
    }
}
