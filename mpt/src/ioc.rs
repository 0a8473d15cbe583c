//! The adapter (IOC) object and its public driver-facing surface.

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use spin::{Mutex, Once, RwLock};

use crate::config::PendingConfig;
use crate::error::MptError;
use crate::frame::{FramePool, FrameRef};
use crate::hw::HostServices;
use crate::msg::{IocFactsReply, PortFactsReply};
use crate::registry::{
    CallbackRegistry, DriverClass, EventHandler, ReplyCallback, ResetHandler,
};
use crate::regs;

/// Depth of the per-adapter event log ring.
const EVENT_LOG_DEPTH: usize = 32;

/// Tunables for one adapter, clamped against IOC Facts during bring-up.
#[derive(Debug, Clone)]
pub struct IocConfig {
    /// Adapter name used as the log prefix.
    pub name: String,
    /// Upper bound on request frames (the IOC's global credits may lower it).
    pub max_request_depth: u16,
    /// Chain buffers to carve alongside the request frames.
    pub chain_buffers: u16,
    /// Sense buffer bytes reserved per request frame.
    pub sense_buffer_size: usize,
    /// Timeout for each doorbell handshake phase, in seconds.
    pub doorbell_timeout_s: u32,
    /// Timeout for the IOC to reach READY after a reset, in seconds.
    pub ready_timeout_s: u32,
    /// Timeout for PortEnable / OPERATIONAL, in seconds. Deliberately long:
    /// firmware performs link/loop discovery behind this exchange.
    pub port_enable_timeout_s: u32,
    /// Minimum config page request timeout, in milliseconds.
    pub config_timeout_ms: u32,
}

impl Default for IocConfig {
    fn default() -> Self {
        Self {
            name: String::from("ioc0"),
            max_request_depth: 128,
            chain_buffers: 32,
            sense_buffer_size: 64,
            doorbell_timeout_s: 5,
            ready_timeout_s: 15,
            port_enable_timeout_s: 60,
            config_timeout_ms: 10_000,
        }
    }
}

/// Cooked adapter capability snapshot, digested from the IOCFacts reply.
///
/// Fetched once per bring-up and treated as read-mostly configuration;
/// refreshed only during recovery.
#[derive(Debug, Clone, Copy, Default)]
pub struct IocFacts {
    /// Message interface version.
    pub msg_version: u16,
    /// Current IOC owner.
    pub who_init: u8,
    /// Capability flags.
    pub flags: u8,
    /// Reply FIFO depth.
    pub reply_queue_depth: u16,
    /// Request frame size in bytes.
    pub request_frame_size: usize,
    /// Reply frame size in bytes.
    pub reply_frame_size: usize,
    /// Maximum outstanding requests the firmware credits.
    pub global_credits: u16,
    /// Number of ports on this IOC.
    pub number_of_ports: u8,
    /// Maximum devices per bus.
    pub max_devices: u8,
    /// Maximum buses.
    pub max_buses: u8,
    /// Size of a host-supplied firmware image, zero if none needed.
    pub fw_image_size: u32,
    /// Capability bits.
    pub ioc_capabilities: u32,
    /// Running firmware version.
    pub fw_version: u32,
    /// Product identifier.
    pub product_id: u16,
}

impl IocFacts {
    /// Digests the raw wire reply.
    #[must_use]
    pub(crate) fn cook(reply: &IocFactsReply) -> Self {
        Self {
            msg_version: reply.msg_version,
            who_init: reply.who_init,
            flags: reply.flags,
            reply_queue_depth: reply.reply_queue_depth,
            request_frame_size: reply.request_frame_size as usize * 4,
            reply_frame_size: reply.curr_reply_frame_size as usize,
            global_credits: reply.global_credits,
            number_of_ports: reply.number_of_ports,
            max_devices: reply.max_devices,
            max_buses: reply.max_buses,
            fw_image_size: reply.fw_image_size,
            ioc_capabilities: reply.ioc_capabilities,
            fw_version: reply.fw_version,
            product_id: reply.product_id,
        }
    }
}

/// Cooked per-port capability snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct PortFacts {
    /// Port class (SCSI, FC).
    pub port_type: u8,
    /// Maximum devices on this port.
    pub max_devices: u16,
    /// The port's own SCSI id.
    pub port_scsi_id: u16,
    /// Protocol capability flags (initiator/target/LAN).
    pub protocol_flags: u16,
}

impl PortFacts {
    #[must_use]
    pub(crate) fn cook(reply: &PortFactsReply) -> Self {
        Self {
            port_type: reply.port_type,
            max_devices: reply.max_devices,
            port_scsi_id: reply.port_scsi_id,
            protocol_flags: reply.protocol_flags,
        }
    }
}

/// Cooked IOC doorbell state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IocState {
    /// Held in reset.
    Reset,
    /// Ready for IOCInit.
    Ready,
    /// Fully operational.
    Operational,
    /// Firmware fault, with the raw fault code.
    Fault(u16),
}

/// A cached firmware image in DMA memory.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FwImage {
    pub(crate) phys: u64,
    pub(crate) len: usize,
}

/// One adapter instance.
///
/// Created at device-probe time, mutated through bring-up and steady-state
/// operation, disposed at removal time (interrupts disabled first,
/// DMA-visible memory freed last). All methods take `&self`; internal state
/// is behind its own locks so the interrupt path, the blocking config path,
/// and recovery can coexist.
pub struct Ioc {
    pub(crate) id: u8,
    pub(crate) name: String,
    pub(crate) hw: Arc<dyn HostServices>,
    pub(crate) cfg: IocConfig,
    pub(crate) registry: Arc<CallbackRegistry>,
    /// Gates interrupt-driven processing and frame acquisition.
    pub(crate) active: AtomicBool,
    /// Single in-flight recovery flag; a second trigger is a silent no-op.
    pub(crate) in_recovery: AtomicBool,
    /// Whether event notification has ever been enabled on this IOC.
    pub(crate) events_enabled: AtomicBool,
    /// Last raw doorbell value observed by the state accessors.
    pub(crate) last_state: AtomicU32,
    pub(crate) facts: RwLock<Option<IocFacts>>,
    pub(crate) port_facts: RwLock<Vec<PortFacts>>,
    /// Frame pool; allocated lazily, exactly once, by FIFO priming.
    pub(crate) pool: Once<FramePool>,
    /// Config requests currently in flight.
    pub(crate) pending: Mutex<Vec<Arc<PendingConfig>>>,
    pub(crate) fw_image: Mutex<Option<FwImage>>,
    /// Ring of the most recent event codes.
    pub(crate) event_log: Mutex<VecDeque<u32>>,
    /// Bound sibling adapter on multi-function chips.
    pub(crate) bound: Mutex<Option<Weak<Ioc>>>,
}

impl Ioc {
    /// Creates an adapter handle over the given register window.
    ///
    /// The adapter starts inactive; call
    /// [`bring_up`](Self::bring_up) to reach OPERATIONAL.
    pub fn new(
        id: u8,
        hw: Arc<dyn HostServices>,
        registry: Arc<CallbackRegistry>,
        cfg: IocConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            name: cfg.name.clone(),
            hw,
            cfg,
            registry,
            active: AtomicBool::new(false),
            in_recovery: AtomicBool::new(false),
            events_enabled: AtomicBool::new(false),
            last_state: AtomicU32::new(0),
            facts: RwLock::new(None),
            port_facts: RwLock::new(Vec::new()),
            pool: Once::new(),
            pending: Mutex::new(Vec::new()),
            fw_image: Mutex::new(None),
            event_log: Mutex::new(VecDeque::with_capacity(EVENT_LOG_DEPTH)),
            bound: Mutex::new(None),
        })
    }

    /// Binds two sibling adapters on a multi-function chip to each other.
    pub fn bind(a: &Arc<Self>, b: &Arc<Self>) {
        *a.bound.lock() = Some(Arc::downgrade(b));
        *b.bound.lock() = Some(Arc::downgrade(a));
    }

    /// The adapter's numeric id.
    #[must_use]
    pub fn id(&self) -> u8 {
        self.id
    }

    /// The adapter's name (log prefix).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether interrupt-driven processing is enabled.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// The cached IOC Facts, if bring-up has fetched them.
    #[must_use]
    pub fn facts(&self) -> Option<IocFacts> {
        *self.facts.read()
    }

    /// The cached per-port facts.
    #[must_use]
    pub fn port_facts(&self) -> Vec<PortFacts> {
        self.port_facts.read().clone()
    }

    /// `(phys, len)` of the cached firmware image, if one is resident.
    #[must_use]
    pub fn fw_image(&self) -> Option<(u64, usize)> {
        self.fw_image.lock().map(|img| (img.phys, img.len))
    }

    /// The most recent event codes, oldest first.
    #[must_use]
    pub fn recent_events(&self) -> Vec<u32> {
        self.event_log.lock().iter().copied().collect()
    }

    pub(crate) fn record_event(&self, event: u32) {
        let mut ring = self.event_log.lock();
        if ring.len() == EVENT_LOG_DEPTH {
            ring.pop_front();
        }
        ring.push_back(event);
    }

    pub(crate) fn bound_ioc(&self) -> Option<Arc<Ioc>> {
        self.bound.lock().as_ref().and_then(Weak::upgrade)
    }

    // -- Driver registration ------------------------------------------------

    /// Registers a protocol driver reply callback; see
    /// [`CallbackRegistry::register`].
    pub fn register(&self, callback: ReplyCallback, class: DriverClass) -> Option<u8> {
        self.registry.register(callback, class)
    }

    /// Deregisters a protocol driver.
    pub fn deregister(&self, handle: u8) -> Result<(), MptError> {
        self.registry.deregister(handle)
    }

    /// Attaches an event handler for `handle`.
    pub fn event_register(&self, handle: u8, handler: EventHandler) -> Result<(), MptError> {
        self.registry.event_register(handle, handler)
    }

    /// Detaches the event handler for `handle`.
    pub fn event_deregister(&self, handle: u8) -> Result<(), MptError> {
        self.registry.event_deregister(handle)
    }

    /// Attaches a reset handler for `handle`.
    pub fn reset_register(&self, handle: u8, handler: ResetHandler) -> Result<(), MptError> {
        self.registry.reset_register(handle, handler)
    }

    /// Detaches the reset handler for `handle`.
    pub fn reset_deregister(&self, handle: u8) -> Result<(), MptError> {
        self.registry.reset_deregister(handle)
    }

    // -- Frame primitives ---------------------------------------------------

    /// Acquires a request frame stamped with `handle`.
    ///
    /// Returns `None` when the adapter is inactive or the pool is
    /// exhausted; both are normal, recoverable conditions.
    #[must_use]
    pub fn acquire_frame(&self, handle: u8) -> Option<FrameRef> {
        if !self.is_active() {
            return None;
        }
        self.pool.get()?.acquire(handle)
    }

    /// Returns a request frame to the pool.
    pub fn release_frame(&self, frame: FrameRef) {
        if let Some(pool) = self.pool.get() {
            pool.release(frame.index());
        }
    }

    /// Posts a prepared request frame to the IOC.
    ///
    /// Re-stamps the message context so the reply routes to `handle`.
    pub fn submit_frame(&self, handle: u8, frame: FrameRef) {
        frame.set_msg_context(crate::msg::make_context(handle, frame.index()));
        self.hw.write32(regs::REQUEST_FIFO, frame.phys() as u32);
    }

    /// The frame pool, once FIFO priming has allocated it.
    #[must_use]
    pub fn pool_ref(&self) -> Option<&FramePool> {
        self.pool.get()
    }

    // -- State accessors ----------------------------------------------------

    /// Reads the raw doorbell register.
    #[must_use]
    pub fn ioc_state_raw(&self) -> u32 {
        let doorbell = self.hw.read32(regs::DOORBELL);
        self.last_state.store(doorbell, Ordering::Release);
        doorbell
    }

    /// Reads and cooks the IOC state.
    #[must_use]
    pub fn ioc_state(&self) -> IocState {
        let doorbell = self.ioc_state_raw();
        match regs::doorbell_state(doorbell) {
            regs::IOC_STATE_READY => IocState::Ready,
            regs::IOC_STATE_OPERATIONAL => IocState::Operational,
            regs::IOC_STATE_FAULT => {
                IocState::Fault((doorbell & regs::DOORBELL_FAULT_CODE_MASK) as u16)
            }
            _ => IocState::Reset,
        }
    }

    // -- Interrupt control --------------------------------------------------

    /// Unmasks the reply interrupt (steady-state operation).
    pub fn enable_interrupts(&self) {
        self.hw.write32(
            regs::INT_MASK,
            regs::INT_MASK_DISABLE_ALL & !regs::IntMask::REPLY_MESSAGE.bits(),
        );
    }

    /// Masks every interrupt source (bring-up and teardown).
    pub fn disable_interrupts(&self) {
        self.hw.write32(regs::INT_MASK, regs::INT_MASK_DISABLE_ALL);
    }

    // -- Teardown -----------------------------------------------------------

    /// Quiesces the adapter: interrupts off, inactive, every blocked
    /// config caller force-completed. DMA memory is freed when the
    /// adapter is dropped, after the IOC can no longer reference it.
    pub fn shutdown(&self) {
        self.disable_interrupts();
        self.active.store(false, Ordering::Release);
        self.fail_pending_configs(MptError::AdapterReset);
        log::info!("{}: shut down", self.name);
    }
}

impl Drop for Ioc {
    fn drop(&mut self) {
        if let Some(img) = self.fw_image.get_mut().take() {
            // SAFETY: Drop means no outstanding references; the IOC was
            // quiesced by shutdown/bring-up failure before the last handle
            // went away.
            unsafe { self.hw.free_dma(img.phys, img.len) };
        }
    }
}
