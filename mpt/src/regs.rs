//! IOC register map and bit definitions.
//!
//! Byte offsets into the chip register window plus `bitflags` types for the
//! doorbell, interrupt-status, interrupt-mask, and diagnostic registers.

use bitflags::bitflags;

// ---------------------------------------------------------------------------
// Register offsets
// ---------------------------------------------------------------------------

/// System doorbell: handshake channel and IOC state reporting.
pub const DOORBELL: u32 = 0x00;
/// Write sequence: magic key register unlocking diagnostic writes.
pub const WRITE_SEQUENCE: u32 = 0x04;
/// Diagnostic: reset control, ARM control, sticky reset history.
pub const DIAGNOSTIC: u32 = 0x08;
/// Test base address (diagnostic-mode only).
pub const TEST_BASE: u32 = 0x0C;
/// Diagnostic read/write data window.
pub const DIAG_RW_DATA: u32 = 0x10;
/// Diagnostic read/write address window.
pub const DIAG_RW_ADDRESS: u32 = 0x14;
/// Host interrupt status.
pub const INT_STATUS: u32 = 0x30;
/// Host interrupt mask.
pub const INT_MASK: u32 = 0x34;
/// Request post FIFO (write request frame addresses here).
pub const REQUEST_FIFO: u32 = 0x40;
/// Reply post/free FIFO (prime with reply addresses, read reply descriptors).
pub const REPLY_FIFO: u32 = 0x44;

// ---------------------------------------------------------------------------
// Doorbell register
// ---------------------------------------------------------------------------

/// Mask selecting the IOC state field of the doorbell.
pub const IOC_STATE_MASK: u32 = 0xF000_0000;
/// IOC state: held in reset.
pub const IOC_STATE_RESET: u32 = 0x0000_0000;
/// IOC state: ready for IOCInit.
pub const IOC_STATE_READY: u32 = 0x1000_0000;
/// IOC state: fully operational.
pub const IOC_STATE_OPERATIONAL: u32 = 0x2000_0000;
/// IOC state: firmware fault; low 16 bits carry the fault code.
pub const IOC_STATE_FAULT: u32 = 0x4000_0000;

/// Mask selecting the fault code when the state field reads FAULT.
pub const DOORBELL_FAULT_CODE_MASK: u32 = 0x0000_FFFF;

/// Mask selecting the WhoInit field of the doorbell.
pub const DOORBELL_WHO_INIT_MASK: u32 = 0x0700_0000;
/// WhoInit field shift.
pub const DOORBELL_WHO_INIT_SHIFT: u32 = 24;

/// WhoInit: nobody has initialized the IOC.
pub const WHO_INIT_NO_ONE: u8 = 0;
/// WhoInit: system BIOS.
pub const WHO_INIT_SYSTEM_BIOS: u8 = 1;
/// WhoInit: adapter ROM BIOS.
pub const WHO_INIT_ROM_BIOS: u8 = 2;
/// WhoInit: a PCI peer (another function on the same chip).
pub const WHO_INIT_PCI_PEER: u8 = 3;
/// WhoInit: the host driver (us).
pub const WHO_INIT_HOST_DRIVER: u8 = 4;
/// WhoInit: manufacturing tools.
pub const WHO_INIT_MANUFACTURER: u8 = 5;

/// Shift for the function code of a doorbell-initiated exchange.
pub const DOORBELL_FUNCTION_SHIFT: u32 = 24;
/// Shift for the 32-bit word count of a doorbell-initiated exchange.
pub const DOORBELL_ADD_DWORDS_SHIFT: u32 = 16;
/// Mask selecting the 16-bit data half-word of a doorbell read.
pub const DOORBELL_DATA_MASK: u32 = 0x0000_FFFF;

// ---------------------------------------------------------------------------
// Interrupt status / mask
// ---------------------------------------------------------------------------

bitflags! {
    /// Host interrupt status register flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IntStatus: u32 {
        /// A doorbell handshake event is pending.
        const DOORBELL = 1 << 0;
        /// The reply post FIFO is non-empty.
        const REPLY_MESSAGE = 1 << 3;
        /// The IOC is still consuming the last doorbell write.
        const IOP_DOORBELL_ACTIVE = 1 << 31;
    }
}

bitflags! {
    /// Host interrupt mask register flags (set = masked).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IntMask: u32 {
        /// Masks doorbell interrupts.
        const DOORBELL = 1 << 0;
        /// Masks reply-message interrupts.
        const REPLY_MESSAGE = 1 << 3;
    }
}

/// Interrupt mask value disabling every interrupt source.
pub const INT_MASK_DISABLE_ALL: u32 = 0xFFFF_FFFF;

// ---------------------------------------------------------------------------
// Diagnostic / write sequence
// ---------------------------------------------------------------------------

bitflags! {
    /// Diagnostic register flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Diagnostic: u32 {
        /// Memory window enable (diagnostic-mode only).
        const MEM_ENABLE = 1 << 0;
        /// Holds the ARM core in reset.
        const DISABLE_ARM = 1 << 1;
        /// Pulse to hard-reset the adapter; self-clears when done.
        const RESET_ADAPTER = 1 << 2;
        /// Enables the diagnostic read/write window.
        const RW_ENABLE = 1 << 4;
        /// Sticky bit recording that a reset occurred; cleared by software.
        const RESET_HISTORY = 1 << 5;
        /// The firmware flash image failed its signature check.
        const FLASH_BAD_SIG = 1 << 6;
        /// Diagnostic register writes are unlocked.
        const DRWE = 1 << 7;
        /// Prevents the IOC from booting from flash after reset (staged
        /// firmware upload scenarios).
        const PREVENT_IOC_BOOT = 1 << 9;
    }
}

/// Write-sequence value that re-locks diagnostic register access.
pub const WRITE_SEQ_FLUSH: u32 = 0x00;
/// The five-key magic sequence unlocking diagnostic register access.
pub const WRITE_SEQ_KEYS: [u32; 5] = [0x04, 0x0B, 0x02, 0x07, 0x0D];

// ---------------------------------------------------------------------------
// Reply FIFO encoding
// ---------------------------------------------------------------------------

/// Reply FIFO read value meaning "FIFO empty".
pub const REPLY_FIFO_EMPTY: u32 = 0xFFFF_FFFF;

/// Top address bit distinguishing a full (non-turbo) reply descriptor.
///
/// When set, the remaining bits are the reply frame's physical address
/// right-shifted by one. When clear, the value is a turbo reply context.
pub const REPLY_ADDRESS_BIT: u32 = 0x8000_0000;

/// Mask selecting the turbo reply type field.
pub const CONTEXT_REPLY_TYPE_MASK: u32 = 0x6000_0000;
/// Turbo reply type shift.
pub const CONTEXT_REPLY_TYPE_SHIFT: u32 = 29;

/// Turbo type: generic context reply (request index + callback index).
pub const CONTEXT_REPLY_TYPE_DEFAULT: u32 = 0;
/// Turbo type: SCSI target-mode reply (fixed handler, no request frame).
pub const CONTEXT_REPLY_TYPE_TARGET: u32 = 1;
/// Turbo type: LAN reply (fixed handler).
pub const CONTEXT_REPLY_TYPE_LAN: u32 = 2;

/// LAN turbo pattern requesting "free the request frame, no callback".
///
/// A class of LAN send acknowledgements carries no useful payload; the
/// firmware flags those so the drain loop can recycle the frame directly.
pub const CONTEXT_LAN_FREE_NO_CALLBACK: u32 = 0x1000_0000;

/// Extracts the raw IOC state field from a doorbell value.
#[must_use]
pub fn doorbell_state(doorbell: u32) -> u32 {
    doorbell & IOC_STATE_MASK
}

/// Extracts the WhoInit field from a doorbell value.
#[must_use]
pub fn doorbell_who_init(doorbell: u32) -> u8 {
    ((doorbell & DOORBELL_WHO_INIT_MASK) >> DOORBELL_WHO_INIT_SHIFT) as u8
}

/// Decodes a non-turbo reply descriptor into a reply frame physical address.
#[must_use]
pub fn reply_descriptor_to_phys(descriptor: u32) -> u64 {
    u64::from(descriptor & !REPLY_ADDRESS_BIT) << 1
}

/// Encodes a reply frame physical address as a non-turbo reply descriptor.
#[must_use]
pub fn phys_to_reply_descriptor(phys: u64) -> u32 {
    ((phys >> 1) as u32) | REPLY_ADDRESS_BIT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_extraction() {
        assert_eq!(doorbell_state(0x1000_ABCD), IOC_STATE_READY);
        assert_eq!(doorbell_state(0x4000_2622), IOC_STATE_FAULT);
        assert_eq!(0x4000_2622 & DOORBELL_FAULT_CODE_MASK, 0x2622);
    }

    #[test]
    fn who_init_extraction() {
        let doorbell = IOC_STATE_OPERATIONAL | (u32::from(WHO_INIT_PCI_PEER) << 24);
        assert_eq!(doorbell_who_init(doorbell), WHO_INIT_PCI_PEER);
        assert_eq!(doorbell_state(doorbell), IOC_STATE_OPERATIONAL);
    }

    #[test]
    fn reply_descriptor_round_trip() {
        let phys = 0x0012_3480u64;
        let descriptor = phys_to_reply_descriptor(phys);
        assert_ne!(descriptor & REPLY_ADDRESS_BIT, 0);
        assert_eq!(reply_descriptor_to_phys(descriptor), phys);
    }

    #[test]
    fn turbo_type_field() {
        let value = CONTEXT_REPLY_TYPE_LAN << CONTEXT_REPLY_TYPE_SHIFT;
        assert_eq!(value & REPLY_ADDRESS_BIT, 0);
        assert_eq!(
            (value & CONTEXT_REPLY_TYPE_MASK) >> CONTEXT_REPLY_TYPE_SHIFT,
            CONTEXT_REPLY_TYPE_LAN
        );
    }
}
