//! IOC bring-up and recovery state machine.
//!
//! The orchestration path that takes an adapter from an unknown, faulted,
//! or reset state to OPERATIONAL. The same routine serves first-time
//! bring-up and post-error recovery; recovery differs only in forcing the
//! diagnostic reset and in skipping the bring-up-only extras (firmware
//! upload decision, config page prefetch).
//!
//! Every wait in here is bounded. Each phase fails with its own error so
//! the probe path or the timeout handler can log a precise cause, and the
//! bound sibling adapter's failures are never fatal to the primary.

use core::sync::atomic::Ordering;

use crate::config::ConfigRequest;
use crate::error::MptError;
use crate::frame::PoolParams;
use crate::hw::SleepFlag;
use crate::ioc::{FwImage, Ioc, IocFacts, IocState, PortFacts};
use crate::msg::{
    self, DefaultReply, EventNotificationRequest, FwUploadReply, FwUploadRequest,
    IocFactsReply, IocFactsRequest, IocInitRequest, PortEnableRequest, PortFactsReply,
    PortFactsRequest,
};
use crate::registry::ResetPhase;
use crate::regs::{self, Diagnostic, IntStatus};

/// What a bring-up or recovery pass actually did to the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    /// The IOC was already READY; no reset was issued.
    NoReset,
    /// A message-unit reset sufficed.
    SoftReset,
    /// The full diagnostic reset was issued.
    HardReset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reason {
    Bringup,
    Recover,
}

/// IOCFacts retry count; firmware occasionally fails the exchange
/// transiently right after a reset.
const FACTS_RETRIES: usize = 5;

/// Poll step used by the READY / OPERATIONAL waits, microseconds.
const STATE_POLL_US: u64 = 1000;

impl Ioc {
    /// First-time bring-up: takes the adapter to OPERATIONAL.
    ///
    /// Never forces a hard reset when the firmware is already READY, so a
    /// warm, healthy IOC comes up without disruption.
    pub fn bring_up(&self, flag: SleepFlag) -> Result<ResetOutcome, MptError> {
        self.bring_up_or_recover(Reason::Bringup, flag)
    }

    /// Post-error recovery: diagnostic reset plus full re-initialization.
    ///
    /// A second trigger while one recovery is in flight is a silent no-op
    /// success; callers that need certainty must re-check adapter state
    /// afterwards rather than trusting a racing trigger's return value.
    pub fn hard_reset_recover(&self, flag: SleepFlag) -> Result<ResetOutcome, MptError> {
        self.bring_up_or_recover(Reason::Recover, flag)
    }

    fn bring_up_or_recover(
        &self,
        reason: Reason,
        flag: SleepFlag,
    ) -> Result<ResetOutcome, MptError> {
        if self.in_recovery.swap(true, Ordering::AcqRel) {
            log::debug!("{}: recovery already in progress", self.name);
            return Ok(ResetOutcome::NoReset);
        }
        let result = self.run_bring_up(reason, flag);
        self.in_recovery.store(false, Ordering::Release);
        match &result {
            Ok(outcome) => {
                log::info!("{}: operational ({:?})", self.name, outcome);
            }
            Err(err) => {
                log::error!("{}: bring-up failed: {}", self.name, err);
            }
        }
        result
    }

    fn run_bring_up(&self, reason: Reason, flag: SleepFlag) -> Result<ResetOutcome, MptError> {
        let bound = self.bound_ioc();
        let bound_was_active = bound.as_ref().is_some_and(|b| b.is_active());

        // Quiesce before touching anything: the drain loop must not see
        // frames mid-transition. The bound sibling shares the chip, so it
        // is quiesced too.
        self.disable_interrupts();
        self.active.store(false, Ordering::Release);
        if let Some(b) = &bound {
            b.disable_interrupts();
            b.active.store(false, Ordering::Release);
        }

        // Recovery forces the diagnostic reset, unless the sibling was
        // alive and this IOC already reads READY: then the chip-wide reset
        // already happened through the sibling and repeating it would only
        // knock the sibling down again.
        let force_hard = reason == Reason::Recover
            && !(bound_was_active && self.ioc_state() == IocState::Ready);

        let outcome = self.make_ready(force_hard, flag)?;

        let facts = self.get_ioc_facts(flag)?;
        self.get_port_facts(&facts, flag)?;
        if let Some(b) = &bound {
            if let Err(err) = b
                .get_ioc_facts(flag)
                .and_then(|f| b.get_port_facts(&f, flag))
            {
                log::warn!("{}: bound adapter facts failed: {}", b.name, err);
            }
        }

        // The sibling's priming is attempted even when our own fails; each
        // adapter's pool is an independent allocation and the sibling may
        // still come up through its own bring-up later.
        let primed = self.prime_fifos(&facts);
        if let Some(b) = &bound {
            if let Some(bf) = b.facts() {
                if let Err(err) = b.prime_fifos(&bf) {
                    log::warn!("{}: bound adapter FIFO priming failed: {}", b.name, err);
                }
            }
        }
        primed?;

        self.send_ioc_init(&facts, flag)?;
        self.send_port_enable(flag)?;

        // Flash-less chips need the host to hold a firmware image so a
        // later diagnostic reset can restage it. Failure here costs the
        // restage optimization, not the bring-up.
        if reason == Reason::Bringup
            && facts.flags & msg::IOCFACTS_FLAGS_FW_DOWNLOAD_BOOT != 0
            && self.fw_image.lock().is_none()
        {
            if let Err(err) = self.do_upload(&facts, flag) {
                log::warn!("{}: firmware upload failed: {}", self.name, err);
            }
        }

        self.enable_interrupts();
        self.active.store(true, Ordering::Release);
        // Any reset destroyed the standing event request along with the
        // rest of the firmware's state, so re-arm it.
        if !self.events_enabled.swap(true, Ordering::AcqRel) || outcome != ResetOutcome::NoReset {
            if let Err(err) = self.send_event_notification(1) {
                log::warn!("{}: event notification enable failed: {}", self.name, err);
            }
        }
        if let Some(b) = &bound {
            if b.pool_ref().is_some() {
                b.enable_interrupts();
                b.active.store(true, Ordering::Release);
            }
        }

        if reason == Reason::Bringup {
            self.prefetch_config_pages(flag);
        }

        // Post-reset hooks mirror the pre-reset ones diag_reset issued,
        // and only a hard reset destroys driver state worth rebuilding.
        if outcome == ResetOutcome::HardReset {
            self.registry
                .for_each_reset_handler(|_, handler| handler(self, ResetPhase::PostReset));
        }

        Ok(outcome)
    }

    // -- READY ---------------------------------------------------------------

    /// Drives the doorbell state to READY, deciding between no reset, a
    /// soft message-unit reset, and the diagnostic reset.
    fn make_ready(&self, force_hard: bool, flag: SleepFlag) -> Result<ResetOutcome, MptError> {
        let doorbell = self.ioc_state_raw();
        let int_status = IntStatus::from_bits_truncate(self.hw.read32(regs::INT_STATUS));

        // A stuck doorbell-active bit means the handshake channel is
        // wedged; only the big hammer clears it.
        let stuck = int_status.contains(IntStatus::IOP_DOORBELL_ACTIVE);
        let state = regs::doorbell_state(doorbell);

        if force_hard || stuck || state == regs::IOC_STATE_FAULT {
            if state == regs::IOC_STATE_FAULT {
                log::error!(
                    "{}: firmware fault {:#06x}, forcing diagnostic reset",
                    self.name,
                    doorbell & regs::DOORBELL_FAULT_CODE_MASK
                );
            } else if stuck {
                log::error!("{}: doorbell wedged, forcing diagnostic reset", self.name);
            }
            self.diag_reset(flag)?;
            self.wait_for_ready(flag)?;
            return Ok(ResetOutcome::HardReset);
        }

        if state == regs::IOC_STATE_READY {
            return Ok(ResetOutcome::NoReset);
        }

        if state == regs::IOC_STATE_OPERATIONAL {
            // Warm boot left firmware running. Never touch an adapter a
            // peer initialized; otherwise try the gentle reset first.
            let owner = regs::doorbell_who_init(doorbell);
            if owner == regs::WHO_INIT_PCI_PEER {
                log::warn!("{}: adapter owned by PCI peer, leaving it alone", self.name);
                return Err(MptError::OwnedByPeer);
            }
            log::info!("{}: unexpectedly operational, trying message-unit reset", self.name);
            let soft = self
                .send_doorbell_function(msg::FUNCTION_IOC_MESSAGE_UNIT_RESET, flag)
                .and_then(|()| self.wait_for_ready(flag));
            match soft {
                Ok(()) => return Ok(ResetOutcome::SoftReset),
                Err(err) => {
                    log::warn!("{}: message-unit reset failed ({}), going hard", self.name, err);
                    self.diag_reset(flag)?;
                    self.wait_for_ready(flag)?;
                    return Ok(ResetOutcome::HardReset);
                }
            }
        }

        // RESET or some intermediate state.
        self.diag_reset(flag)?;
        self.wait_for_ready(flag)?;
        Ok(ResetOutcome::HardReset)
    }

    /// The diagnostic reset sequence: the "big hammer" that restarts the
    /// firmware regardless of what state it is wedged in.
    fn diag_reset(&self, flag: SleepFlag) -> Result<(), MptError> {
        log::warn!("{}: issuing diagnostic reset", self.name);

        // Pre-reset hooks run before the hardware is touched: blocked
        // config callers are force-completed and protocol drivers get a
        // chance to fail over their own pending work.
        self.fail_pending_configs(MptError::AdapterReset);
        self.registry
            .for_each_reset_handler(|_, handler| handler(self, ResetPhase::PreReset));

        // Unlock diagnostic-mode register access with the magic key
        // sequence; the chip occasionally ignores a pass, so retry.
        let mut unlocked = false;
        for _ in 0..5 {
            for key in regs::WRITE_SEQ_KEYS {
                self.hw.write32(regs::WRITE_SEQUENCE, key);
            }
            let diag = Diagnostic::from_bits_truncate(self.hw.read32(regs::DIAGNOSTIC));
            if diag.contains(Diagnostic::DRWE) {
                unlocked = true;
                break;
            }
            self.hw.pause(flag, 100_000);
        }
        if !unlocked {
            log::error!("{}: diagnostic write enable never latched", self.name);
            return Err(MptError::ResetFailed);
        }

        let restage = *self.fw_image.lock();
        if restage.is_some() {
            // Keep the ARM core down and flash boot off so the cached
            // image can be streamed in before the firmware starts.
            self.hw.write32(
                regs::DIAGNOSTIC,
                (Diagnostic::DRWE | Diagnostic::DISABLE_ARM | Diagnostic::PREVENT_IOC_BOOT)
                    .bits(),
            );
        }

        let diag = self.hw.read32(regs::DIAGNOSTIC);
        self.hw
            .write32(regs::DIAGNOSTIC, diag | Diagnostic::RESET_ADAPTER.bits());

        // RESET_ADAPTER self-clears once the chip has reset.
        let mut cntdn = u64::from(self.cfg.ready_timeout_s) * 1000;
        loop {
            let diag = Diagnostic::from_bits_truncate(self.hw.read32(regs::DIAGNOSTIC));
            if !diag.contains(Diagnostic::RESET_ADAPTER) {
                if diag.contains(Diagnostic::FLASH_BAD_SIG) && restage.is_none() {
                    log::error!("{}: flash image has a bad signature and no cached firmware is resident", self.name);
                    return Err(MptError::ResetFailed);
                }
                break;
            }
            if cntdn == 0 {
                log::error!("{}: reset-adapter bit never cleared", self.name);
                return Err(MptError::ResetFailed);
            }
            self.hw.pause(flag, STATE_POLL_US);
            cntdn -= 1;
        }

        if let Some(img) = restage {
            self.restage_firmware(img);
        }

        // Clear the sticky reset-history bit and re-lock diagnostic access.
        let diag = self.hw.read32(regs::DIAGNOSTIC)
            & !(Diagnostic::RESET_HISTORY | Diagnostic::RW_ENABLE).bits();
        self.hw.write32(regs::DIAGNOSTIC, diag);
        self.hw.write32(regs::WRITE_SEQUENCE, regs::WRITE_SEQ_FLUSH);
        Ok(())
    }

    /// Streams the cached firmware image through the diagnostic read/write
    /// window, then releases the ARM core to boot it.
    fn restage_firmware(&self, img: FwImage) {
        log::info!("{}: restaging {} byte firmware image", self.name, img.len);

        let diag = self.hw.read32(regs::DIAGNOSTIC);
        self.hw
            .write32(regs::DIAGNOSTIC, diag | Diagnostic::RW_ENABLE.bits());
        self.hw.write32(regs::DIAG_RW_ADDRESS, 0);

        // SAFETY: The image was allocated img.len bytes long and stays
        // resident for the adapter's lifetime.
        let image =
            unsafe { core::slice::from_raw_parts(self.hw.phys_to_virt(img.phys), img.len) };
        for chunk in image.chunks(4) {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            self.hw.write32(regs::DIAG_RW_DATA, u32::from_le_bytes(word));
        }

        let diag = self.hw.read32(regs::DIAGNOSTIC)
            & !(Diagnostic::RW_ENABLE | Diagnostic::DISABLE_ARM | Diagnostic::PREVENT_IOC_BOOT)
                .bits();
        self.hw.write32(regs::DIAGNOSTIC, diag);
    }

    /// Bounded poll for the READY doorbell state.
    ///
    /// Retries the gentler resets if the controller lands in an
    /// intermediate state on the way: a message-unit reset when it comes
    /// up OPERATIONAL, an IO-unit reset if it lingers in RESET past half
    /// the budget.
    fn wait_for_ready(&self, flag: SleepFlag) -> Result<(), MptError> {
        let budget = u64::from(self.cfg.ready_timeout_s) * 1000;
        let mut cntdn = budget;
        let mut tried_mur = false;
        let mut tried_iur = false;

        while cntdn > 0 {
            let doorbell = self.ioc_state_raw();
            match regs::doorbell_state(doorbell) {
                regs::IOC_STATE_READY => return Ok(()),
                regs::IOC_STATE_FAULT => {
                    let code = (doorbell & regs::DOORBELL_FAULT_CODE_MASK) as u16;
                    log::error!("{}: fault {:#06x} while waiting for READY", self.name, code);
                    return Err(MptError::HardwareFault(code));
                }
                regs::IOC_STATE_OPERATIONAL if !tried_mur => {
                    tried_mur = true;
                    let _ = self.send_doorbell_function(msg::FUNCTION_IOC_MESSAGE_UNIT_RESET, flag);
                }
                regs::IOC_STATE_RESET if !tried_iur && cntdn < budget / 2 => {
                    tried_iur = true;
                    let _ = self.send_doorbell_function(msg::FUNCTION_IO_UNIT_RESET, flag);
                }
                _ => {}
            }
            self.hw.pause(flag, STATE_POLL_US);
            cntdn -= 1;
        }
        Err(MptError::NotReady)
    }

    /// Sends a body-less doorbell function (the reset requests).
    fn send_doorbell_function(&self, function: u8, flag: SleepFlag) -> Result<(), MptError> {
        self.hw.write32(regs::INT_STATUS, 0);
        self.hw.write32(
            regs::DOORBELL,
            u32::from(function) << regs::DOORBELL_FUNCTION_SHIFT,
        );
        self.wait_for_doorbell_ack(self.cfg.doorbell_timeout_s, flag)
    }

    // -- Facts ---------------------------------------------------------------

    /// Fetches and caches the IOC Facts, retrying the transient failures
    /// firmware is known to produce right after a reset.
    fn get_ioc_facts(&self, flag: SleepFlag) -> Result<IocFacts, MptError> {
        let request = IocFactsRequest {
            function: msg::FUNCTION_IOC_FACTS,
            ..IocFactsRequest::default()
        };
        for attempt in 1..=FACTS_RETRIES {
            match self.handshake_checked::<_, IocFactsReply>(
                &request,
                self.cfg.doorbell_timeout_s,
                flag,
            ) {
                Ok(reply) => {
                    let facts = IocFacts::cook(&reply);
                    if facts.global_credits == 0 || facts.request_frame_size == 0 {
                        log::warn!("{}: nonsensical IOC facts, retrying", self.name);
                        continue;
                    }
                    log::info!(
                        "{}: fw {:#010x}, {} credits, {} port(s), reply depth {}",
                        self.name,
                        facts.fw_version,
                        facts.global_credits,
                        facts.number_of_ports,
                        facts.reply_queue_depth
                    );
                    *self.facts.write() = Some(facts);
                    return Ok(facts);
                }
                Err(err) => {
                    log::warn!(
                        "{}: IOC facts attempt {}/{} failed: {}",
                        self.name,
                        attempt,
                        FACTS_RETRIES,
                        err
                    );
                }
            }
        }
        Err(MptError::FactsFailed)
    }

    /// Fetches and caches the facts of every port.
    fn get_port_facts(&self, facts: &IocFacts, flag: SleepFlag) -> Result<(), MptError> {
        let mut ports = alloc::vec::Vec::new();
        for port in 0..facts.number_of_ports {
            let request = PortFactsRequest {
                function: msg::FUNCTION_PORT_FACTS,
                port_number: port,
                ..PortFactsRequest::default()
            };
            let reply: PortFactsReply = self
                .handshake_checked(&request, self.cfg.doorbell_timeout_s, flag)
                .map_err(|err| {
                    log::error!("{}: port {} facts failed: {}", self.name, port, err);
                    MptError::FactsFailed
                })?;
            ports.push(PortFacts::cook(&reply));
        }
        *self.port_facts.write() = ports;
        Ok(())
    }

    // -- FIFOs / init --------------------------------------------------------

    /// Allocates the frame pool (once, lazily) and primes the reply FIFO
    /// with every reply frame address.
    ///
    /// On re-entry after a reset the existing pool is reused; every frame
    /// that was in flight belonged to a request the reset destroyed, so
    /// the free list is simply rebuilt in full.
    fn prime_fifos(&self, facts: &IocFacts) -> Result<(), MptError> {
        if self.pool.get().is_none() {
            let params = PoolParams {
                req_depth: self.cfg.max_request_depth.min(facts.global_credits),
                req_frame_size: facts.request_frame_size,
                reply_depth: facts.reply_queue_depth,
                reply_frame_size: facts
                    .reply_frame_size
                    .max(core::mem::size_of::<DefaultReply>()),
                chain_buffers: self.cfg.chain_buffers,
                sense_buffer_size: self.cfg.sense_buffer_size,
            };
            let pool = crate::frame::FramePool::new(self.hw.clone(), params).map_err(|err| {
                log::error!("{}: frame pool allocation failed: {}", self.name, err);
                MptError::FifoAllocFailed
            })?;
            log::info!(
                "{}: frame pool: {} request frames of {} bytes, {} reply frames",
                self.name,
                pool.req_depth(),
                pool.req_frame_size(),
                pool.reply_depth()
            );
            self.pool.call_once(move || pool);
        } else if let Some(pool) = self.pool.get() {
            pool.reset_free_list();
        }

        let pool = self.pool.get().ok_or(MptError::FifoAllocFailed)?;
        for i in 0..pool.reply_depth() {
            self.hw
                .write32(regs::REPLY_FIFO, pool.reply_frame_phys(i) as u32);
        }
        Ok(())
    }

    /// IOCInit handshake: hands the controller the negotiated frame size
    /// and the upper address bits it needs to reconstruct full 64-bit
    /// frame addresses from 32-bit contexts.
    fn send_ioc_init(&self, facts: &IocFacts, flag: SleepFlag) -> Result<(), MptError> {
        let pool = self.pool.get().ok_or(MptError::FifoAllocFailed)?;
        let request = IocInitRequest {
            who_init: regs::WHO_INIT_HOST_DRIVER,
            function: msg::FUNCTION_IOC_INIT,
            max_devices: facts.max_devices,
            max_buses: facts.max_buses,
            reply_frame_size: pool.reply_frame_size() as u16,
            host_mfa_high_addr: pool.request_high_addr(),
            sense_buffer_high_addr: pool.sense_high_addr(),
            ..IocInitRequest::default()
        };
        let _reply: DefaultReply = self
            .handshake_checked(&request, self.cfg.doorbell_timeout_s, flag)
            .map_err(|err| {
                log::error!("{}: IOCInit failed: {}", self.name, err);
                MptError::InitFailed
            })?;
        Ok(())
    }

    /// PortEnable handshake plus the long OPERATIONAL poll. Deliberately
    /// slow: firmware does link/loop discovery behind this exchange.
    fn send_port_enable(&self, flag: SleepFlag) -> Result<(), MptError> {
        let request = PortEnableRequest {
            function: msg::FUNCTION_PORT_ENABLE,
            port_number: 0,
            ..PortEnableRequest::default()
        };
        let _reply: DefaultReply = self
            .handshake_checked(&request, self.cfg.port_enable_timeout_s, flag)
            .map_err(|err| {
                log::error!("{}: PortEnable failed: {}", self.name, err);
                MptError::InitFailed
            })?;

        let mut cntdn = u64::from(self.cfg.port_enable_timeout_s) * 1000;
        while cntdn > 0 {
            match self.ioc_state() {
                IocState::Operational => return Ok(()),
                IocState::Fault(code) => {
                    log::error!("{}: fault {:#06x} after PortEnable", self.name, code);
                    return Err(MptError::HardwareFault(code));
                }
                _ => {}
            }
            self.hw.pause(flag, STATE_POLL_US);
            cntdn -= 1;
        }
        log::error!("{}: never reached OPERATIONAL after PortEnable", self.name);
        Err(MptError::InitFailed)
    }

    // -- Firmware upload -----------------------------------------------------

    /// Caches the running firmware image in host DMA memory so a later
    /// diagnostic reset can restage it on flash-less chips.
    ///
    /// The reply's reported transfer size must match the request exactly;
    /// a partial image is worse than none, so any mismatch frees the
    /// buffer.
    fn do_upload(&self, facts: &IocFacts, flag: SleepFlag) -> Result<(), MptError> {
        let len = facts.fw_image_size as usize;
        if len == 0 {
            return Ok(());
        }
        let phys = self
            .hw
            .alloc_dma(len, 4)
            .map_err(|_| MptError::NoDmaMemory)?;

        let request = FwUploadRequest {
            image_type: msg::FW_UPLOAD_IMAGE_TYPE_FW,
            function: msg::FUNCTION_FW_UPLOAD,
            image_offset: 0,
            image_size: len as u32,
            sge_flags_length: msg::sge_flags_length(len as u32, false),
            sge_address_low: phys as u32,
            sge_address_high: (phys >> 32) as u32,
            ..FwUploadRequest::default()
        };
        let result: Result<FwUploadReply, MptError> =
            self.handshake_checked(&request, self.cfg.doorbell_timeout_s, flag);
        match result {
            Ok(reply) if reply.actual_image_size == len as u32 => {
                *self.fw_image.lock() = Some(FwImage { phys, len });
                log::info!("{}: cached {} byte firmware image", self.name, len);
                Ok(())
            }
            Ok(reply) => {
                log::warn!(
                    "{}: firmware upload short: wanted {}, got {}",
                    self.name,
                    len,
                    reply.actual_image_size
                );
                // SAFETY: Freshly allocated above, never published.
                unsafe { self.hw.free_dma(phys, len) };
                Err(MptError::InitFailed)
            }
            Err(err) => {
                // SAFETY: Same as above.
                unsafe { self.hw.free_dma(phys, len) };
                Err(err)
            }
        }
    }

    // -- Events / prefetch ---------------------------------------------------

    /// Submits the frame-based EventNotification enable/disable request.
    /// The reply arrives through the drain loop.
    pub(crate) fn send_event_notification(&self, switch_on: u8) -> Result<(), MptError> {
        let pool = self.pool.get().ok_or(MptError::NotReady)?;
        let frame = pool.acquire(0).ok_or(MptError::NoFreeFrame)?;
        let request = EventNotificationRequest {
            switch_on,
            function: msg::FUNCTION_EVENT_NOTIFICATION,
            msg_context: frame.header().msg_context,
            ..EventNotificationRequest::default()
        };
        frame.write_msg(&request);
        self.submit_frame(0, frame);
        Ok(())
    }

    /// Bring-up-only prefetch of protocol config page headers. These are
    /// cached niceties, not requirements; failures are logged and dropped.
    fn prefetch_config_pages(&self, flag: SleepFlag) {
        let mut pages = alloc::vec![ConfigRequest::header_for(
            msg::CONFIG_PAGE_TYPE_IOC,
            1,
            0
        )];
        for (port, pf) in self.port_facts().iter().enumerate() {
            let page_type = if pf.port_type == msg::PORT_TYPE_FC {
                msg::CONFIG_PAGE_TYPE_FC_PORT
            } else {
                msg::CONFIG_PAGE_TYPE_SCSI_PORT
            };
            pages.push(ConfigRequest::header_for(page_type, 0, port as u32));
        }
        for mut page in pages {
            if let Err(err) = self.config(&mut page, flag) {
                log::debug!(
                    "{}: config page type {:#04x} prefetch failed: {}",
                    self.name,
                    page.header.page_type,
                    err
                );
            }
        }
    }
}
