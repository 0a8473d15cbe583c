//! Behavioral IOC simulator backing the engine's integration tests.
//!
//! Implements [`mpt::HostServices`] over an in-memory register file, a fake
//! DMA arena, and a virtual clock, and responds to register traffic the way
//! the real controller firmware does: the doorbell handshake word protocol,
//! the write-sequence/diagnostic reset dance, and request-FIFO messages
//! answered through the reply FIFO (both turbo and full-frame forms).
//!
//! Replies are produced synchronously inside the register write that
//! triggers them; tests drive [`mpt::Ioc::interrupt`] themselves, either
//! inline or from a service thread. Fault-injection knobs cover the
//! recovery paths: initial doorbell state, a wedged doorbell, transient
//! IOCFacts failures, dropped config replies, and short firmware uploads.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use mpt::error::MptError;
use mpt::msg::{
    self, ConfigReplyMsg, ConfigRequestMsg, DefaultReply, EventNotificationReply,
    FwUploadReply, IocFactsReply, IocInitRequest, PortFactsReply,
};
use mpt::{regs, HostServices};

/// Fake physical base address of the DMA arena. Small enough that every
/// address fits the 32-bit FIFO registers, like real low-memory DMA pools.
const ARENA_PHYS_BASE: u64 = 0x0010_0000;
/// DMA arena size.
const ARENA_LEN: usize = 4 << 20;

/// Request frame size the simulated firmware advertises, bytes.
const SIM_REQ_FRAME_SIZE: u16 = 128;
/// Reply frame size the simulated firmware advertises, bytes.
const SIM_REPLY_FRAME_SIZE: u16 = 128;

/// Simulator behavior knobs. Everything defaults to a healthy controller
/// sitting in READY.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Initial doorbell state field ([`regs::IOC_STATE_READY`], ...).
    pub initial_state: u32,
    /// Initial WhoInit field of the doorbell.
    pub who_init: u8,
    /// Initial fault code (shown while the state field reads FAULT).
    pub fault_code: u16,
    /// Keep the doorbell-active interrupt-status bit stuck set until a
    /// diagnostic reset.
    pub stuck_doorbell: bool,
    /// Fail this many IOCFacts exchanges with BUSY before succeeding.
    pub fail_facts: u32,
    /// Swallow message-unit / IO-unit reset doorbell functions.
    pub ignore_unit_reset: bool,
    /// Drop config replies (requests vanish; drives the timeout path).
    pub drop_config_replies: bool,
    /// Firmware image size advertised in IOC Facts; non-zero also sets
    /// the download-boot flag.
    pub fw_image_size: u32,
    /// Report this many bytes fewer than requested from FWUpload.
    pub fw_upload_shortfall: u32,
    /// Request credits advertised in IOC Facts.
    pub global_credits: u16,
    /// Reply FIFO depth advertised in IOC Facts.
    pub reply_depth: u16,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            initial_state: regs::IOC_STATE_READY,
            who_init: regs::WHO_INIT_NO_ONE,
            fault_code: 0,
            stuck_doorbell: false,
            fail_facts: 0,
            ignore_unit_reset: false,
            drop_config_replies: false,
            fw_image_size: 0,
            fw_upload_shortfall: 0,
            global_credits: 24,
            reply_depth: 16,
        }
    }
}

/// An in-progress inbound doorbell handshake.
struct HandshakeRx {
    expected: usize,
    words: Vec<u32>,
}

struct SimState {
    knobs: SimConfig,
    clock_us: u64,
    arena_next: usize,

    state_bits: u32,
    who_init: u8,
    fault_code: u16,
    diagnostic: u32,
    seq_progress: usize,
    drwe: bool,
    /// ARM held down after reset; READY only once the boot bits clear.
    awaiting_restage: bool,
    diag_rw_words: usize,

    rx: Option<HandshakeRx>,
    tx: VecDeque<u16>,

    /// Host-primed reply frame addresses the firmware may fill.
    reply_free: VecDeque<u64>,
    /// Descriptors waiting for the host to drain.
    reply_post: VecDeque<u32>,

    mfa_high: u32,
    event_context: Option<u32>,

    diag_resets: u32,
    unit_resets: u32,
    event_acks: u32,
    facts_requests: u32,
    dropped_replies: u32,
}

/// The simulated controller.
pub struct SimIoc {
    arena: *mut u8,
    state: Mutex<SimState>,
}

// SAFETY: The arena pointer references a leaked allocation that lives for
// the process; all bookkeeping is behind the state mutex.
unsafe impl Send for SimIoc {}
unsafe impl Sync for SimIoc {}

fn bytes_of<T: Copy>(value: &T) -> Vec<u8> {
    // SAFETY: T is a #[repr(C)] wire struct; its bytes are its encoding.
    unsafe {
        std::slice::from_raw_parts((value as *const T).cast::<u8>(), std::mem::size_of::<T>())
    }
    .to_vec()
}

impl SimIoc {
    /// Creates a simulated controller with the given knobs.
    pub fn new(knobs: SimConfig) -> Arc<Self> {
        let arena = Box::leak(vec![0u8; ARENA_LEN].into_boxed_slice()).as_mut_ptr();
        let state = SimState {
            state_bits: knobs.initial_state,
            who_init: knobs.who_init,
            fault_code: knobs.fault_code,
            knobs,
            clock_us: 0,
            arena_next: 0,
            diagnostic: 0,
            seq_progress: 0,
            drwe: false,
            awaiting_restage: false,
            diag_rw_words: 0,
            rx: None,
            tx: VecDeque::new(),
            reply_free: VecDeque::new(),
            reply_post: VecDeque::new(),
            mfa_high: 0,
            event_context: None,
            diag_resets: 0,
            unit_resets: 0,
            event_acks: 0,
            facts_requests: 0,
            dropped_replies: 0,
        };
        Arc::new(Self {
            arena,
            state: Mutex::new(state),
        })
    }

    // -- Test observation / injection ---------------------------------------

    /// Diagnostic resets the engine has issued so far.
    pub fn diag_resets(&self) -> u32 {
        self.state.lock().unwrap().diag_resets
    }

    /// Message-unit / IO-unit reset doorbell functions seen so far.
    pub fn unit_resets(&self) -> u32 {
        self.state.lock().unwrap().unit_resets
    }

    /// EventAck requests seen so far.
    pub fn event_acks(&self) -> u32 {
        self.state.lock().unwrap().event_acks
    }

    /// IOCFacts exchanges seen so far (including failed ones).
    pub fn facts_requests(&self) -> u32 {
        self.state.lock().unwrap().facts_requests
    }

    /// 32-bit words streamed through the diagnostic r/w window.
    pub fn restaged_words(&self) -> usize {
        self.state.lock().unwrap().diag_rw_words
    }

    /// Current virtual clock, microseconds.
    pub fn clock_us(&self) -> u64 {
        self.state.lock().unwrap().clock_us
    }

    /// Toggles the dropped-config-replies knob at runtime.
    pub fn set_drop_config_replies(&self, drop: bool) {
        self.state.lock().unwrap().knobs.drop_config_replies = drop;
    }

    /// Puts the doorbell into the FAULT state with `code`.
    pub fn fault(&self, code: u16) {
        let mut s = self.state.lock().unwrap();
        s.state_bits = regs::IOC_STATE_FAULT;
        s.fault_code = code;
    }

    /// Queues a raw turbo descriptor for the next drain.
    pub fn inject_turbo(&self, value: u32) {
        self.state.lock().unwrap().reply_post.push_back(value);
    }

    /// Delivers an unsolicited event through the standing event request.
    ///
    /// # Panics
    /// Panics if event notification was never enabled.
    pub fn inject_event(&self, event: u32, ack_required: bool) {
        let mut s = self.state.lock().unwrap();
        let context = s.event_context.expect("event notification not enabled");
        let reply = EventNotificationReply {
            msg_length: (std::mem::size_of::<EventNotificationReply>() / 4) as u8,
            function: msg::FUNCTION_EVENT_NOTIFICATION,
            ack_required: u8::from(ack_required),
            msg_flags: msg::MSG_FLAGS_CONTINUATION_REPLY,
            msg_context: context,
            event,
            event_context: event,
            ..EventNotificationReply::default()
        };
        self.post_frame_reply(&mut s, &bytes_of(&reply));
    }

    // -- Internals -----------------------------------------------------------

    fn virt(&self, phys: u64, len: usize) -> Option<*mut u8> {
        let offset = phys.checked_sub(ARENA_PHYS_BASE)? as usize;
        if offset + len > ARENA_LEN {
            return None;
        }
        // SAFETY: offset + len is within the arena.
        Some(unsafe { self.arena.add(offset) })
    }

    fn doorbell_read(&self, s: &SimState) -> u32 {
        if let Some(front) = s.tx.front() {
            return u32::from(*front);
        }
        let mut value = s.state_bits | (u32::from(s.who_init) << regs::DOORBELL_WHO_INIT_SHIFT);
        if s.state_bits == regs::IOC_STATE_FAULT {
            value |= u32::from(s.fault_code);
        }
        value
    }

    fn int_status(&self, s: &SimState) -> u32 {
        let mut value = 0;
        if !s.tx.is_empty() {
            value |= regs::IntStatus::DOORBELL.bits();
        }
        if !s.reply_post.is_empty() {
            value |= regs::IntStatus::REPLY_MESSAGE.bits();
        }
        if s.knobs.stuck_doorbell {
            value |= regs::IntStatus::IOP_DOORBELL_ACTIVE.bits();
        }
        value
    }

    fn doorbell_write(&self, s: &mut SimState, value: u32) {
        if let Some(rx) = s.rx.as_mut() {
            rx.words.push(value);
            let complete = rx.words.len() >= rx.expected;
            if complete {
                if let Some(rx) = s.rx.take() {
                    self.handshake_complete(s, &rx.words);
                }
            }
            return;
        }

        let function = (value >> regs::DOORBELL_FUNCTION_SHIFT) as u8;
        match function {
            msg::FUNCTION_HANDSHAKE => {
                let expected = ((value >> regs::DOORBELL_ADD_DWORDS_SHIFT) & 0xFF) as usize;
                s.rx = Some(HandshakeRx {
                    expected,
                    words: Vec::with_capacity(expected),
                });
                s.tx.clear();
                // Handshake initiation ack word.
                s.tx.push_back(0);
            }
            msg::FUNCTION_IOC_MESSAGE_UNIT_RESET | msg::FUNCTION_IO_UNIT_RESET => {
                s.unit_resets += 1;
                if !s.knobs.ignore_unit_reset {
                    s.state_bits = regs::IOC_STATE_READY;
                    s.who_init = regs::WHO_INIT_NO_ONE;
                    s.fault_code = 0;
                    s.tx.clear();
                    s.reply_free.clear();
                    s.reply_post.clear();
                }
            }
            _ => {}
        }
    }

    /// A full handshake request has arrived; produce its reply.
    fn handshake_complete(&self, s: &mut SimState, words: &[u32]) {
        let mut bytes = Vec::with_capacity(words.len() * 4);
        for word in words {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        if bytes.len() < 12 {
            return;
        }
        let function = bytes[3];
        let context = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);

        match function {
            msg::FUNCTION_IOC_FACTS => {
                s.facts_requests += 1;
                if s.knobs.fail_facts > 0 {
                    s.knobs.fail_facts -= 1;
                    self.queue_doorbell_reply(s, &bytes_of(&busy_reply(function, context)));
                    return;
                }
                let mut flags = 0;
                if s.knobs.fw_image_size > 0 {
                    flags |= msg::IOCFACTS_FLAGS_FW_DOWNLOAD_BOOT;
                }
                let reply = IocFactsReply {
                    msg_version: 0x0102,
                    msg_length: (std::mem::size_of::<IocFactsReply>() / 4) as u8,
                    function,
                    msg_context: context,
                    who_init: s.who_init,
                    flags,
                    reply_queue_depth: s.knobs.reply_depth,
                    request_frame_size: SIM_REQ_FRAME_SIZE / 4,
                    product_id: 0x0622,
                    global_credits: s.knobs.global_credits,
                    number_of_ports: 1,
                    curr_reply_frame_size: SIM_REPLY_FRAME_SIZE,
                    max_devices: 16,
                    max_buses: 1,
                    fw_image_size: s.knobs.fw_image_size,
                    fw_version: 0x0102_0304,
                    ..IocFactsReply::default()
                };
                self.queue_doorbell_reply(s, &bytes_of(&reply));
            }
            msg::FUNCTION_PORT_FACTS => {
                let reply = PortFactsReply {
                    msg_length: (std::mem::size_of::<PortFactsReply>() / 4) as u8,
                    function,
                    port_number: bytes[6],
                    msg_context: context,
                    port_type: msg::PORT_TYPE_SCSI,
                    max_devices: 16,
                    port_scsi_id: 7,
                    protocol_flags: msg::PROTOCOL_INITIATOR,
                    ..PortFactsReply::default()
                };
                self.queue_doorbell_reply(s, &bytes_of(&reply));
            }
            msg::FUNCTION_IOC_INIT => {
                // SAFETY: the handshake carried at least the 24-byte
                // IOCInit layout; bytes is zero-padded per word anyway.
                if bytes.len() >= std::mem::size_of::<IocInitRequest>() {
                    let request = unsafe {
                        std::ptr::read_unaligned(bytes.as_ptr().cast::<IocInitRequest>())
                    };
                    s.mfa_high = request.host_mfa_high_addr;
                }
                self.queue_doorbell_reply(s, &bytes_of(&ok_reply(function, context)));
            }
            msg::FUNCTION_PORT_ENABLE => {
                s.state_bits = regs::IOC_STATE_OPERATIONAL;
                s.who_init = regs::WHO_INIT_HOST_DRIVER;
                self.queue_doorbell_reply(s, &bytes_of(&ok_reply(function, context)));
            }
            msg::FUNCTION_FW_UPLOAD => {
                let size = u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
                let sge_low = u32::from_le_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]);
                let sge_high = u32::from_le_bytes([bytes[28], bytes[29], bytes[30], bytes[31]]);
                let phys = (u64::from(sge_high) << 32) | u64::from(sge_low);
                if let Some(dst) = self.virt(phys, size as usize) {
                    // SAFETY: virt() bounds-checked phys..phys+size.
                    unsafe { std::ptr::write_bytes(dst, 0xA5, size as usize) };
                }
                let reply = FwUploadReply {
                    image_type: bytes[0],
                    msg_length: (std::mem::size_of::<FwUploadReply>() / 4) as u8,
                    function,
                    msg_context: context,
                    actual_image_size: size.saturating_sub(s.knobs.fw_upload_shortfall),
                    ..FwUploadReply::default()
                };
                self.queue_doorbell_reply(s, &bytes_of(&reply));
            }
            _ => {
                // Driver-framed handshake request (task management style):
                // the reply goes through the reply FIFO, not the doorbell.
                let reply = ok_reply(function, context);
                self.post_frame_reply(s, &bytes_of(&reply));
            }
        }
    }

    fn queue_doorbell_reply(&self, s: &mut SimState, bytes: &[u8]) {
        s.tx.clear();
        for chunk in bytes.chunks(2) {
            let hi = chunk.get(1).copied().unwrap_or(0);
            s.tx.push_back(u16::from_le_bytes([chunk[0], hi]));
        }
    }

    /// Fills a host-primed reply frame and posts its descriptor.
    fn post_frame_reply(&self, s: &mut SimState, bytes: &[u8]) {
        let Some(phys) = s.reply_free.pop_front() else {
            s.dropped_replies += 1;
            return;
        };
        if let Some(dst) = self.virt(phys, bytes.len()) {
            // SAFETY: virt() bounds-checked the copy; reply frames are
            // firmware-owned until the descriptor is posted.
            unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len()) };
        }
        s.reply_post.push_back(regs::phys_to_reply_descriptor(phys));
    }

    /// A request frame was posted to the request FIFO.
    fn request_posted(&self, s: &mut SimState, low: u32) {
        let phys = (u64::from(s.mfa_high) << 32) | u64::from(low);
        let Some(frame) = self.virt(phys, SIM_REQ_FRAME_SIZE as usize) else {
            return;
        };
        // SAFETY: virt() bounds-checked a full frame.
        let frame = unsafe {
            std::slice::from_raw_parts(frame.cast_const(), SIM_REQ_FRAME_SIZE as usize)
        };
        let function = frame[3];
        let context = u32::from_le_bytes([frame[8], frame[9], frame[10], frame[11]]);

        match function {
            msg::FUNCTION_CONFIG => {
                if s.knobs.drop_config_replies {
                    s.dropped_replies += 1;
                    return;
                }
                // SAFETY: the frame holds the 40-byte config request.
                let request = unsafe {
                    std::ptr::read_unaligned(frame.as_ptr().cast::<ConfigRequestMsg>())
                };
                let mut header = request.header;
                header.page_version = 1;
                header.page_length = 4;
                let buf_len = (request.sge_flags_length & 0x00FF_FFFF) as usize;
                let buf_phys = (u64::from(request.sge_address_high) << 32)
                    | u64::from(request.sge_address_low);
                if buf_len > 0 {
                    if let Some(dst) = self.virt(buf_phys, buf_len) {
                        let fill = buf_len.min(usize::from(header.page_length) * 4);
                        // SAFETY: virt() bounds-checked buf_phys..+buf_len.
                        unsafe { std::ptr::write_bytes(dst, 0x5A, fill) };
                    }
                }
                let reply = ConfigReplyMsg {
                    action: request.action,
                    msg_length: (std::mem::size_of::<ConfigReplyMsg>() / 4) as u8,
                    function,
                    msg_context: context,
                    ioc_status: msg::IOCSTATUS_SUCCESS,
                    header,
                    ..ConfigReplyMsg::default()
                };
                self.post_frame_reply(s, &bytes_of(&reply));
            }
            msg::FUNCTION_EVENT_NOTIFICATION => {
                let switch_on = frame[0];
                let mut reply = EventNotificationReply {
                    msg_length: (std::mem::size_of::<EventNotificationReply>() / 4) as u8,
                    function,
                    msg_context: context,
                    event: msg::EVENT_EVENT_CHANGE,
                    event_context: 0,
                    ..EventNotificationReply::default()
                };
                if switch_on != 0 {
                    // The enable request stays outstanding; every event
                    // rides on it as a continuation reply.
                    s.event_context = Some(context);
                    reply.msg_flags = msg::MSG_FLAGS_CONTINUATION_REPLY;
                }
                self.post_frame_reply(s, &bytes_of(&reply));
            }
            msg::FUNCTION_EVENT_ACK => {
                s.event_acks += 1;
                // Turbo ack: the context itself is the whole reply.
                s.reply_post.push_back(context);
            }
            _ => {
                // Protocol-driver traffic the simulator has no opinion on
                // gets a turbo context echo.
                s.reply_post.push_back(context);
            }
        }
    }

    fn write_sequence(&self, s: &mut SimState, value: u32) {
        if value == regs::WRITE_SEQ_FLUSH {
            s.seq_progress = 0;
            s.drwe = false;
            return;
        }
        if value == regs::WRITE_SEQ_KEYS[s.seq_progress] {
            s.seq_progress += 1;
            if s.seq_progress == regs::WRITE_SEQ_KEYS.len() {
                s.seq_progress = 0;
                s.drwe = true;
            }
        } else if value == regs::WRITE_SEQ_KEYS[0] {
            s.seq_progress = 1;
        } else {
            s.seq_progress = 0;
        }
    }

    fn diagnostic_write(&self, s: &mut SimState, value: u32) {
        if !s.drwe {
            return;
        }
        let flags = regs::Diagnostic::from_bits_truncate(value);
        if flags.contains(regs::Diagnostic::RESET_ADAPTER) {
            s.diag_resets += 1;
            s.rx = None;
            s.tx.clear();
            s.reply_free.clear();
            s.reply_post.clear();
            s.fault_code = 0;
            s.who_init = regs::WHO_INIT_NO_ONE;
            s.knobs.stuck_doorbell = false;
            let prior = regs::Diagnostic::from_bits_truncate(s.diagnostic);
            let held = (flags | prior)
                .intersects(regs::Diagnostic::DISABLE_ARM | regs::Diagnostic::PREVENT_IOC_BOOT);
            s.awaiting_restage = held;
            s.state_bits = if held {
                regs::IOC_STATE_RESET
            } else {
                regs::IOC_STATE_READY
            };
            s.diagnostic = (value & !regs::Diagnostic::RESET_ADAPTER.bits())
                | regs::Diagnostic::RESET_HISTORY.bits();
            return;
        }
        if s.awaiting_restage
            && !flags
                .intersects(regs::Diagnostic::DISABLE_ARM | regs::Diagnostic::PREVENT_IOC_BOOT)
        {
            // ARM released with boot prevention off: the streamed image
            // boots and the firmware comes up READY.
            s.awaiting_restage = false;
            s.state_bits = regs::IOC_STATE_READY;
        }
        s.diagnostic = value;
    }
}

fn ok_reply(function: u8, context: u32) -> DefaultReply {
    DefaultReply {
        msg_length: (std::mem::size_of::<DefaultReply>() / 4) as u8,
        function,
        msg_context: context,
        ioc_status: msg::IOCSTATUS_SUCCESS,
        ..DefaultReply::default()
    }
}

fn busy_reply(function: u8, context: u32) -> DefaultReply {
    DefaultReply {
        msg_length: (std::mem::size_of::<DefaultReply>() / 4) as u8,
        function,
        msg_context: context,
        ioc_status: msg::IOCSTATUS_BUSY,
        ..DefaultReply::default()
    }
}

impl HostServices for SimIoc {
    fn read32(&self, offset: u32) -> u32 {
        let mut s = self.state.lock().unwrap();
        match offset {
            regs::DOORBELL => self.doorbell_read(&s),
            regs::INT_STATUS => self.int_status(&s),
            regs::DIAGNOSTIC => {
                let mut value = s.diagnostic;
                if s.drwe {
                    value |= regs::Diagnostic::DRWE.bits();
                }
                value
            }
            regs::REPLY_FIFO => s.reply_post.pop_front().unwrap_or(regs::REPLY_FIFO_EMPTY),
            _ => 0,
        }
    }

    fn write32(&self, offset: u32, value: u32) {
        let mut s = self.state.lock().unwrap();
        match offset {
            regs::DOORBELL => self.doorbell_write(&mut s, value),
            regs::WRITE_SEQUENCE => self.write_sequence(&mut s, value),
            regs::DIAGNOSTIC => self.diagnostic_write(&mut s, value),
            regs::INT_STATUS => {
                // Clearing interrupt status consumes the doorbell data
                // half-word currently presented.
                s.tx.pop_front();
            }
            regs::INT_MASK => {}
            regs::REQUEST_FIFO => self.request_posted(&mut s, value),
            regs::REPLY_FIFO => {
                if value & regs::REPLY_ADDRESS_BIT != 0 {
                    // Drain write-back: the slot returns to the free pool.
                    s.reply_free
                        .push_back(regs::reply_descriptor_to_phys(value));
                } else {
                    // FIFO priming with a raw frame address.
                    s.reply_free.push_back(u64::from(value));
                }
            }
            regs::DIAG_RW_ADDRESS => {}
            regs::DIAG_RW_DATA => {
                if s.drwe {
                    s.diag_rw_words += 1;
                }
            }
            _ => {}
        }
    }

    fn alloc_dma(&self, len: usize, align: usize) -> Result<u64, MptError> {
        let mut s = self.state.lock().unwrap();
        let aligned = (s.arena_next + align - 1) & !(align - 1);
        if aligned + len > ARENA_LEN {
            return Err(MptError::NoDmaMemory);
        }
        s.arena_next = aligned + len;
        Ok(ARENA_PHYS_BASE + aligned as u64)
    }

    unsafe fn free_dma(&self, _phys: u64, _len: usize) {
        // Bump arena; freed blocks are not recycled.
    }

    fn phys_to_virt(&self, phys: u64) -> *mut u8 {
        self.virt(phys, 1).unwrap_or(std::ptr::null_mut())
    }

    fn now_us(&self) -> u64 {
        self.state.lock().unwrap().clock_us
    }

    fn delay_us(&self, us: u64) {
        self.state.lock().unwrap().clock_us += us;
        std::hint::spin_loop();
    }

    fn sleep_us(&self, us: u64) {
        self.state.lock().unwrap().clock_us += us;
        // Give a service thread a chance to run between poll iterations.
        std::thread::yield_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_sequence_unlocks_drwe() {
        let sim = SimIoc::new(SimConfig::default());
        for key in regs::WRITE_SEQ_KEYS {
            sim.write32(regs::WRITE_SEQUENCE, key);
        }
        let diag = regs::Diagnostic::from_bits_truncate(sim.read32(regs::DIAGNOSTIC));
        assert!(diag.contains(regs::Diagnostic::DRWE));

        sim.write32(regs::WRITE_SEQUENCE, regs::WRITE_SEQ_FLUSH);
        let diag = regs::Diagnostic::from_bits_truncate(sim.read32(regs::DIAGNOSTIC));
        assert!(!diag.contains(regs::Diagnostic::DRWE));
    }

    #[test]
    fn wrong_key_resets_sequence() {
        let sim = SimIoc::new(SimConfig::default());
        sim.write32(regs::WRITE_SEQUENCE, regs::WRITE_SEQ_KEYS[0]);
        sim.write32(regs::WRITE_SEQUENCE, 0x0F);
        for key in regs::WRITE_SEQ_KEYS {
            sim.write32(regs::WRITE_SEQUENCE, key);
        }
        let diag = regs::Diagnostic::from_bits_truncate(sim.read32(regs::DIAGNOSTIC));
        assert!(diag.contains(regs::Diagnostic::DRWE));
    }

    #[test]
    fn doorbell_reports_initial_state() {
        let sim = SimIoc::new(SimConfig {
            initial_state: regs::IOC_STATE_FAULT,
            fault_code: 0x2622,
            ..SimConfig::default()
        });
        let doorbell = sim.read32(regs::DOORBELL);
        assert_eq!(regs::doorbell_state(doorbell), regs::IOC_STATE_FAULT);
        assert_eq!(doorbell & regs::DOORBELL_FAULT_CODE_MASK, 0x2622);
    }

    #[test]
    fn reply_fifo_empty_sentinel() {
        let sim = SimIoc::new(SimConfig::default());
        assert_eq!(sim.read32(regs::REPLY_FIFO), regs::REPLY_FIFO_EMPTY);
    }
}
