//! MPT message formats.
//!
//! `#[repr(C)]` wire structs for the request/reply messages the engine
//! exchanges with the IOC, plus function codes, IOC status codes, the
//! message-context encoding, and scatter-gather element helpers.
//!
//! Multi-byte fields are little-endian on the wire; the structs assume a
//! little-endian host, matching the platforms this engine targets. The
//! doorbell path, which moves 16 bits at a time, assembles words explicitly.

// ---------------------------------------------------------------------------
// Function codes
// ---------------------------------------------------------------------------

/// SCSI I/O request (protocol drivers only; never built by the engine).
pub const FUNCTION_SCSI_IO: u8 = 0x00;
/// SCSI task management.
pub const FUNCTION_SCSI_TASK_MGMT: u8 = 0x01;
/// IOCInit.
pub const FUNCTION_IOC_INIT: u8 = 0x02;
/// IOCFacts.
pub const FUNCTION_IOC_FACTS: u8 = 0x03;
/// Configuration page access.
pub const FUNCTION_CONFIG: u8 = 0x04;
/// PortFacts.
pub const FUNCTION_PORT_FACTS: u8 = 0x05;
/// PortEnable.
pub const FUNCTION_PORT_ENABLE: u8 = 0x06;
/// Event notification control.
pub const FUNCTION_EVENT_NOTIFICATION: u8 = 0x07;
/// Event acknowledgement.
pub const FUNCTION_EVENT_ACK: u8 = 0x08;
/// Firmware download.
pub const FUNCTION_FW_DOWNLOAD: u8 = 0x09;
/// Firmware upload.
pub const FUNCTION_FW_UPLOAD: u8 = 0x12;
/// Message unit reset (doorbell function, no message body).
pub const FUNCTION_IOC_MESSAGE_UNIT_RESET: u8 = 0x40;
/// IO unit reset (doorbell function, no message body).
pub const FUNCTION_IO_UNIT_RESET: u8 = 0x41;
/// Doorbell handshake carrier.
pub const FUNCTION_HANDSHAKE: u8 = 0x42;

// ---------------------------------------------------------------------------
// IOC status codes (reply `ioc_status` low 15 bits)
// ---------------------------------------------------------------------------

/// Mask selecting the status code proper.
pub const IOCSTATUS_MASK: u16 = 0x7FFF;
/// Flag: the reply's `ioc_log_info` word is valid.
pub const IOCSTATUS_FLAG_LOG_INFO_AVAILABLE: u16 = 0x8000;

/// Success.
pub const IOCSTATUS_SUCCESS: u16 = 0x0000;
/// Unknown function code.
pub const IOCSTATUS_INVALID_FUNCTION: u16 = 0x0001;
/// IOC busy; retry later.
pub const IOCSTATUS_BUSY: u16 = 0x0002;
/// Internal firmware error.
pub const IOCSTATUS_INTERNAL_ERROR: u16 = 0x0004;
/// Out of firmware resources.
pub const IOCSTATUS_INSUFFICIENT_RESOURCES: u16 = 0x0006;
/// A request field was invalid.
pub const IOCSTATUS_INVALID_FIELD: u16 = 0x0007;
/// The IOC is in the wrong state for the request.
pub const IOCSTATUS_INVALID_STATE: u16 = 0x0008;
/// Config: invalid action.
pub const IOCSTATUS_CONFIG_INVALID_ACTION: u16 = 0x0020;
/// Config: invalid page type.
pub const IOCSTATUS_CONFIG_INVALID_TYPE: u16 = 0x0021;
/// Config: no such page.
pub const IOCSTATUS_CONFIG_INVALID_PAGE: u16 = 0x0022;
/// Config: invalid page data.
pub const IOCSTATUS_CONFIG_INVALID_DATA: u16 = 0x0023;

// ---------------------------------------------------------------------------
// Message context
// ---------------------------------------------------------------------------
// The 32-bit context correlates a reply with its originating request
// without a pointer: low 16 bits are the request frame index, the next
// 8 bits the callback handle. Derived from the frame's offset within the
// pool, never from a pointer value, so it survives 32-bit wire transport
// on any host.

/// Mask selecting the request frame index of a message context.
pub const CONTEXT_INDEX_MASK: u32 = 0x0000_FFFF;
/// Shift of the callback handle field of a message context.
pub const CONTEXT_HANDLE_SHIFT: u32 = 16;
/// Mask (post-shift) of the callback handle field.
pub const CONTEXT_HANDLE_MASK: u32 = 0xFF;

/// Request index marking a request sent over the doorbell with no
/// originating pool frame.
pub const HANDSHAKE_FRAME_INDEX: u16 = 0xFFFF;

/// Packs a callback handle and request index into a message context.
#[must_use]
pub fn make_context(handle: u8, index: u16) -> u32 {
    (u32::from(handle) << CONTEXT_HANDLE_SHIFT) | u32::from(index)
}

/// Extracts the callback handle from a message context.
#[must_use]
pub fn context_handle(context: u32) -> u8 {
    ((context >> CONTEXT_HANDLE_SHIFT) & CONTEXT_HANDLE_MASK) as u8
}

/// Extracts the request frame index from a message context.
#[must_use]
pub fn context_index(context: u32) -> u16 {
    (context & CONTEXT_INDEX_MASK) as u16
}

// ---------------------------------------------------------------------------
// Scatter-gather elements (simple 64-bit form)
// ---------------------------------------------------------------------------

/// SGE flag byte: simple element.
pub const SGE_FLAGS_SIMPLE: u32 = 0x10;
/// SGE flag byte: 64-bit addressing.
pub const SGE_FLAGS_64BIT: u32 = 0x02;
/// SGE flag byte: last element of the list.
pub const SGE_FLAGS_LAST: u32 = 0x80;
/// SGE flag byte: end of transfer buffer.
pub const SGE_FLAGS_END_OF_BUFFER: u32 = 0x40;
/// SGE flag byte: end of the whole SG list.
pub const SGE_FLAGS_END_OF_LIST: u32 = 0x01;
/// SGE flag byte: host-to-IOC data direction.
pub const SGE_FLAGS_HOST_TO_IOC: u32 = 0x04;

/// Builds the `flags_length` word of a terminating simple SGE.
#[must_use]
pub fn sge_flags_length(len: u32, host_to_ioc: bool) -> u32 {
    let mut flags = SGE_FLAGS_SIMPLE
        | SGE_FLAGS_64BIT
        | SGE_FLAGS_LAST
        | SGE_FLAGS_END_OF_BUFFER
        | SGE_FLAGS_END_OF_LIST;
    if host_to_ioc {
        flags |= SGE_FLAGS_HOST_TO_IOC;
    }
    (flags << 24) | (len & 0x00FF_FFFF)
}

// ---------------------------------------------------------------------------
// Common headers
// ---------------------------------------------------------------------------

/// Generic request header shared by every frame-based request.
///
/// The first twelve bytes of every request frame follow this layout; the
/// message context always sits at byte offset 8.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgHeader {
    /// Function-dependent first word.
    pub dep1: u16,
    /// Chain offset in 32-bit words (0 = no chain).
    pub chain_offset: u8,
    /// Function code.
    pub function: u8,
    /// Function-dependent second word.
    pub dep2: u16,
    /// Function-dependent byte.
    pub dep3: u8,
    /// Message flags.
    pub msg_flags: u8,
    /// Message context echoed back in the reply.
    pub msg_context: u32,
}

/// Generic reply header; every full reply frame starts with this layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultReply {
    /// Function-dependent first word.
    pub dep1: u16,
    /// Reply length in 32-bit words.
    pub msg_length: u8,
    /// Function code of the originating request.
    pub function: u8,
    /// Function-dependent second word.
    pub dep2: u16,
    /// Function-dependent byte.
    pub dep3: u8,
    /// Message flags.
    pub msg_flags: u8,
    /// Echoed message context.
    pub msg_context: u32,
    /// Function-dependent status word.
    pub dep4: u16,
    /// IOC status (plus the log-info-available flag bit).
    pub ioc_status: u16,
    /// Vendor diagnostic word, valid when the log-info flag is set.
    pub ioc_log_info: u32,
}

impl DefaultReply {
    /// Returns the status code with the log-info flag stripped.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.ioc_status & IOCSTATUS_MASK
    }

    /// Returns true when `ioc_log_info` carries a valid diagnostic word.
    #[must_use]
    pub fn has_log_info(&self) -> bool {
        self.ioc_status & IOCSTATUS_FLAG_LOG_INFO_AVAILABLE != 0
    }
}

// ---------------------------------------------------------------------------
// IOCFacts
// ---------------------------------------------------------------------------

/// IOCFacts request (doorbell handshake).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct IocFactsRequest {
    pub reserved: u16,
    pub chain_offset: u8,
    pub function: u8,
    pub reserved1: u16,
    pub reserved2: u8,
    pub msg_flags: u8,
    pub msg_context: u32,
}

/// IOCFacts reply: the adapter capability snapshot.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct IocFactsReply {
    /// Message interface version.
    pub msg_version: u16,
    pub msg_length: u8,
    pub function: u8,
    /// Header format version.
    pub header_version: u16,
    /// IOC number on multi-function chips.
    pub ioc_number: u8,
    pub msg_flags: u8,
    pub msg_context: u32,
    /// Exception flags (persistent firmware complaints).
    pub ioc_exceptions: u16,
    pub ioc_status: u16,
    pub ioc_log_info: u32,
    /// Maximum chain depth per request.
    pub max_chain_depth: u8,
    /// Who currently owns/initialized the IOC.
    pub who_init: u8,
    /// Firmware block size granularity.
    pub block_size: u8,
    /// Capability flags ([`IOCFACTS_FLAGS_FW_DOWNLOAD_BOOT`], ...).
    pub flags: u8,
    /// Depth of the reply FIFO.
    pub reply_queue_depth: u16,
    /// Request frame size in 32-bit words.
    pub request_frame_size: u16,
    pub reserved: u16,
    /// Product identifier.
    pub product_id: u16,
    /// Upper 32 bits of the host MFA base currently programmed.
    pub current_host_mfa_high_addr: u32,
    /// Number of request credits (maximum outstanding requests).
    pub global_credits: u16,
    pub number_of_ports: u8,
    /// Event notification state.
    pub event_state: u8,
    /// Upper 32 bits of the sense buffer base currently programmed.
    pub current_sense_buffer_high_addr: u32,
    /// Negotiated reply frame size in bytes.
    pub curr_reply_frame_size: u16,
    pub max_devices: u8,
    pub max_buses: u8,
    /// Size of the firmware image the host must supply, in bytes.
    pub fw_image_size: u32,
    pub ioc_capabilities: u32,
    pub fw_version: u32,
}

/// IOCFacts flag: the host must download boot firmware.
pub const IOCFACTS_FLAGS_FW_DOWNLOAD_BOOT: u8 = 0x01;

// ---------------------------------------------------------------------------
// PortFacts
// ---------------------------------------------------------------------------

/// PortFacts request (doorbell handshake).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct PortFactsRequest {
    pub reserved: u16,
    pub chain_offset: u8,
    pub function: u8,
    pub reserved1: u16,
    /// Port to query.
    pub port_number: u8,
    pub msg_flags: u8,
    pub msg_context: u32,
}

/// PortFacts reply.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct PortFactsReply {
    pub reserved: u16,
    pub msg_length: u8,
    pub function: u8,
    pub reserved1: u16,
    pub port_number: u8,
    pub msg_flags: u8,
    pub msg_context: u32,
    pub reserved2: u16,
    pub ioc_status: u16,
    pub ioc_log_info: u32,
    pub reserved3: u8,
    /// Port class ([`PORT_TYPE_SCSI`] / [`PORT_TYPE_FC`]).
    pub port_type: u8,
    pub max_devices: u16,
    /// This port's own SCSI id.
    pub port_scsi_id: u16,
    /// Protocol capability flags.
    pub protocol_flags: u16,
    pub max_posted_cmd_buffers: u16,
    pub max_persistent_ids: u16,
    pub max_lan_buckets: u16,
    pub reserved4: u16,
}

/// Port type: parallel SCSI.
pub const PORT_TYPE_SCSI: u8 = 0x01;
/// Port type: Fibre Channel.
pub const PORT_TYPE_FC: u8 = 0x10;

/// Protocol flag: target mode.
pub const PROTOCOL_TARGET: u16 = 0x01;
/// Protocol flag: initiator mode.
pub const PROTOCOL_INITIATOR: u16 = 0x02;
/// Protocol flag: LAN over the fabric.
pub const PROTOCOL_LAN: u16 = 0x04;

// ---------------------------------------------------------------------------
// IOCInit / PortEnable
// ---------------------------------------------------------------------------

/// IOCInit request (doorbell handshake).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct IocInitRequest {
    /// Who is initializing ([`crate::regs::WHO_INIT_HOST_DRIVER`]).
    pub who_init: u8,
    pub reserved: u8,
    pub chain_offset: u8,
    pub function: u8,
    pub flags: u8,
    /// Maximum devices per bus the host will address.
    pub max_devices: u8,
    /// Maximum buses the host will address.
    pub max_buses: u8,
    pub msg_flags: u8,
    pub msg_context: u32,
    /// Reply frame size in bytes the host primed the FIFO with.
    pub reply_frame_size: u16,
    pub reserved1: u16,
    /// Upper 32 bits of the request frame pool base address.
    pub host_mfa_high_addr: u32,
    /// Upper 32 bits of the sense buffer pool base address.
    pub sense_buffer_high_addr: u32,
}

/// PortEnable request (doorbell handshake, long timeout).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct PortEnableRequest {
    pub reserved: u16,
    pub chain_offset: u8,
    pub function: u8,
    pub reserved1: u16,
    pub port_number: u8,
    pub msg_flags: u8,
    pub msg_context: u32,
}

// ---------------------------------------------------------------------------
// Event notification
// ---------------------------------------------------------------------------

/// EventNotification request (frame-based).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct EventNotificationRequest {
    /// 1 = enable event reporting, 0 = disable.
    pub switch_on: u8,
    pub reserved: u8,
    pub chain_offset: u8,
    pub function: u8,
    pub reserved1: u16,
    pub reserved2: u8,
    pub msg_flags: u8,
    pub msg_context: u32,
}

/// EventNotification reply, delivered unsolicited as a full reply frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct EventNotificationReply {
    /// Number of valid words in `data`.
    pub event_data_length: u16,
    pub msg_length: u8,
    pub function: u8,
    pub reserved: u16,
    /// Non-zero when the firmware expects an EventAck for this event.
    pub ack_required: u8,
    pub msg_flags: u8,
    pub msg_context: u32,
    pub reserved1: u16,
    pub ioc_status: u16,
    pub ioc_log_info: u32,
    /// Event code.
    pub event: u32,
    /// Firmware event context, echoed in the EventAck.
    pub event_context: u32,
    /// Event-specific payload (first two words).
    pub data: [u32; 2],
}

/// EventAck request (frame-based).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct EventAckRequest {
    pub reserved: u16,
    pub chain_offset: u8,
    pub function: u8,
    pub reserved1: u16,
    pub reserved2: u8,
    pub msg_flags: u8,
    pub msg_context: u32,
    /// Event code being acknowledged.
    pub event: u32,
    /// Firmware event context being acknowledged.
    pub event_context: u32,
}

/// Reply `msg_flags` bit: this reply continues an outstanding request
/// (the request frame must not be freed yet). Unsolicited event replies
/// carry it; the final reply of the exchange clears it.
pub const MSG_FLAGS_CONTINUATION_REPLY: u8 = 0x80;

/// Event code: firmware log data.
pub const EVENT_LOG_DATA: u32 = 0x01;
/// Event code: IOC state change.
pub const EVENT_STATE_CHANGE: u32 = 0x02;
/// Event code: bus rescan required.
pub const EVENT_RESCAN: u32 = 0x06;
/// Event code: FC link status change.
pub const EVENT_LINK_STATUS_CHANGE: u32 = 0x07;
/// Event code: loop state change.
pub const EVENT_LOOP_STATE_CHANGE: u32 = 0x08;
/// Event code: event reporting settings changed.
pub const EVENT_EVENT_CHANGE: u32 = 0x0A;

// ---------------------------------------------------------------------------
// Firmware upload
// ---------------------------------------------------------------------------

/// FWUpload request (doorbell handshake; one simple SGE).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct FwUploadRequest {
    /// Image to fetch ([`FW_UPLOAD_IMAGE_TYPE_FW`]).
    pub image_type: u8,
    pub reserved: u8,
    pub chain_offset: u8,
    pub function: u8,
    pub reserved1: u16,
    pub reserved2: u8,
    pub msg_flags: u8,
    pub msg_context: u32,
    /// Offset into the image at which to start.
    pub image_offset: u32,
    /// Number of bytes requested.
    pub image_size: u32,
    /// Simple SGE describing the destination buffer.
    pub sge_flags_length: u32,
    pub sge_address_low: u32,
    pub sge_address_high: u32,
}

/// FWUpload reply.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct FwUploadReply {
    pub image_type: u8,
    pub reserved: u8,
    pub msg_length: u8,
    pub function: u8,
    pub reserved1: u16,
    pub reserved2: u8,
    pub msg_flags: u8,
    pub msg_context: u32,
    pub reserved3: u16,
    pub ioc_status: u16,
    pub ioc_log_info: u32,
    /// Bytes the firmware actually transferred.
    pub actual_image_size: u32,
}

/// FWUpload image type: boot firmware.
pub const FW_UPLOAD_IMAGE_TYPE_FW: u8 = 0x01;

// ---------------------------------------------------------------------------
// Config pages
// ---------------------------------------------------------------------------

/// Common header of every configuration page.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigPageHeader {
    /// Page format version.
    pub page_version: u8,
    /// Page length in 32-bit words.
    pub page_length: u8,
    /// Page number within the type.
    pub page_number: u8,
    /// Page type.
    pub page_type: u8,
}

/// Config request message (frame-based).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigRequestMsg {
    /// Config action ([`CONFIG_ACTION_PAGE_READ_CURRENT`], ...).
    pub action: u8,
    pub reserved: u8,
    pub chain_offset: u8,
    pub function: u8,
    pub ext_page_length: u16,
    pub ext_page_type: u8,
    pub msg_flags: u8,
    pub msg_context: u32,
    pub reserved1: [u32; 2],
    /// Page being addressed.
    pub header: ConfigPageHeader,
    /// Page address (bus/target/form encoding, page-type specific).
    pub page_address: u32,
    /// Simple SGE describing the caller's page buffer.
    pub sge_flags_length: u32,
    pub sge_address_low: u32,
    pub sge_address_high: u32,
}

/// Config reply message.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigReplyMsg {
    pub action: u8,
    pub reserved: u8,
    pub msg_length: u8,
    pub function: u8,
    pub ext_page_length: u16,
    pub ext_page_type: u8,
    pub msg_flags: u8,
    pub msg_context: u32,
    pub reserved1: u16,
    pub ioc_status: u16,
    pub ioc_log_info: u32,
    /// Header of the page actually returned.
    pub header: ConfigPageHeader,
}

/// Config action: fetch the page header only.
pub const CONFIG_ACTION_PAGE_HEADER: u8 = 0x00;
/// Config action: read the current (RAM) page.
pub const CONFIG_ACTION_PAGE_READ_CURRENT: u8 = 0x01;
/// Config action: write the current (RAM) page.
pub const CONFIG_ACTION_PAGE_WRITE_CURRENT: u8 = 0x02;
/// Config action: read the factory default page.
pub const CONFIG_ACTION_PAGE_READ_DEFAULT: u8 = 0x03;
/// Config action: read the NVRAM copy.
pub const CONFIG_ACTION_PAGE_READ_NVRAM: u8 = 0x05;
/// Config action: write the NVRAM copy.
pub const CONFIG_ACTION_PAGE_WRITE_NVRAM: u8 = 0x06;

/// Page type: I/O unit.
pub const CONFIG_PAGE_TYPE_IO_UNIT: u8 = 0x00;
/// Page type: IOC.
pub const CONFIG_PAGE_TYPE_IOC: u8 = 0x01;
/// Page type: SCSI port.
pub const CONFIG_PAGE_TYPE_SCSI_PORT: u8 = 0x03;
/// Page type: SCSI device.
pub const CONFIG_PAGE_TYPE_SCSI_DEVICE: u8 = 0x04;
/// Page type: FC port.
pub const CONFIG_PAGE_TYPE_FC_PORT: u8 = 0x05;
/// Page type: LAN.
pub const CONFIG_PAGE_TYPE_LAN: u8 = 0x07;
/// Page type: integrated RAID volume.
pub const CONFIG_PAGE_TYPE_RAID_VOLUME: u8 = 0x08;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_round_trip() {
        let ctx = make_context(9, 0x0123);
        assert_eq!(context_handle(ctx), 9);
        assert_eq!(context_index(ctx), 0x0123);
        // Context must fit the low 24 bits so turbo type bits stay clear.
        assert_eq!(ctx & 0xFF00_0000, 0);
    }

    #[test]
    fn header_layout() {
        assert_eq!(core::mem::size_of::<MsgHeader>(), 12);
        assert_eq!(core::mem::size_of::<DefaultReply>(), 20);
        assert_eq!(core::mem::offset_of!(MsgHeader, function), 3);
        assert_eq!(core::mem::offset_of!(MsgHeader, msg_context), 8);
        assert_eq!(core::mem::offset_of!(DefaultReply, msg_length), 2);
        assert_eq!(core::mem::offset_of!(DefaultReply, ioc_status), 14);
    }

    #[test]
    fn handshake_message_sizes() {
        // Doorbell messages move in whole 32-bit words.
        assert_eq!(core::mem::size_of::<IocFactsRequest>() % 4, 0);
        assert_eq!(core::mem::size_of::<IocFactsReply>() % 4, 0);
        assert_eq!(core::mem::size_of::<IocInitRequest>(), 24);
        assert_eq!(core::mem::size_of::<FwUploadRequest>(), 32);
        assert_eq!(core::mem::size_of::<ConfigRequestMsg>(), 40);
        assert_eq!(core::mem::size_of::<ConfigReplyMsg>(), 24);
    }

    #[test]
    fn reply_status_helpers() {
        let reply = DefaultReply {
            ioc_status: IOCSTATUS_FLAG_LOG_INFO_AVAILABLE | IOCSTATUS_BUSY,
            ..DefaultReply::default()
        };
        assert_eq!(reply.status(), IOCSTATUS_BUSY);
        assert!(reply.has_log_info());
    }

    #[test]
    fn sge_encoding() {
        let fl = sge_flags_length(0x1000, false);
        assert_eq!(fl & 0x00FF_FFFF, 0x1000);
        assert_ne!(fl & (SGE_FLAGS_SIMPLE << 24), 0);
        assert_eq!(fl & (SGE_FLAGS_HOST_TO_IOC << 24), 0);
        let fl = sge_flags_length(0x80, true);
        assert_ne!(fl & (SGE_FLAGS_HOST_TO_IOC << 24), 0);
    }
}
