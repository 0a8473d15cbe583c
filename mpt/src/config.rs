//! Config page request engine.
//!
//! A blocking, timeout-guarded request/reply wrapper for the "read or write
//! a numbered configuration page" operation, used for everything from port
//! capability discovery to RAID volume enumeration.
//!
//! The caller builds a [`ConfigRequest`], the engine acquires a frame,
//! links a pending descriptor onto the adapter, submits, and waits. The
//! base reply handler completes the descriptor; if no reply ever arrives,
//! deadline expiry triggers the hard-reset recovery path, whose pre-reset
//! hook force-completes every pending descriptor. A blocked caller
//! therefore always returns, even across a reset.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU16, Ordering};

use spin::Mutex;

use crate::error::MptError;
use crate::hw::SleepFlag;
use crate::ioc::Ioc;
use crate::msg::{
    self, ConfigPageHeader, ConfigReplyMsg, ConfigRequestMsg,
};

/// A configuration page access descriptor.
#[derive(Debug, Clone, Copy)]
pub struct ConfigRequest {
    /// Config action ([`msg::CONFIG_ACTION_PAGE_READ_CURRENT`], ...).
    pub action: u8,
    /// Page-type-specific address (bus/target/form encoding).
    pub page_address: u32,
    /// Page header; for data actions this is the header a prior
    /// PAGE_HEADER action returned. Updated in place on success.
    pub header: ConfigPageHeader,
    /// Physical address of the caller's DMA page buffer (0 for
    /// header-only actions).
    pub page_buffer: u64,
    /// Length of the page buffer in bytes.
    pub page_buffer_len: u32,
    /// Timeout in milliseconds; raised to the engine minimum if lower.
    pub timeout_ms: u32,
}

impl ConfigRequest {
    /// A header-fetch request for the given page type and number.
    #[must_use]
    pub fn header_for(page_type: u8, page_number: u8, page_address: u32) -> Self {
        Self {
            action: msg::CONFIG_ACTION_PAGE_HEADER,
            page_address,
            header: ConfigPageHeader {
                page_version: 0,
                page_length: 0,
                page_number,
                page_type,
            },
            page_buffer: 0,
            page_buffer_len: 0,
            timeout_ms: 0,
        }
    }
}

/// In-flight config request bookkeeping, linked on the adapter while the
/// caller blocks.
pub(crate) struct PendingConfig {
    /// Message context of the submitted frame; replies match on this.
    pub(crate) context: u32,
    pub(crate) done: AtomicBool,
    pub(crate) ioc_status: AtomicU16,
    pub(crate) error: Mutex<Option<MptError>>,
    pub(crate) header: Mutex<ConfigPageHeader>,
}

impl PendingConfig {
    fn new(context: u32) -> Arc<Self> {
        Arc::new(Self {
            context,
            done: AtomicBool::new(false),
            ioc_status: AtomicU16::new(0),
            error: Mutex::new(None),
            header: Mutex::new(ConfigPageHeader::default()),
        })
    }

    pub(crate) fn complete_ok(&self, status: u16, header: ConfigPageHeader) {
        self.ioc_status.store(status, Ordering::Release);
        if status == msg::IOCSTATUS_SUCCESS {
            *self.header.lock() = header;
        }
        self.done.store(true, Ordering::Release);
    }

    pub(crate) fn complete_err(&self, err: MptError) {
        *self.error.lock() = Some(err);
        self.done.store(true, Ordering::Release);
    }
}

/// Poll interval of the blocking config wait, microseconds.
const CONFIG_POLL_US: u64 = 1000;

impl Ioc {
    /// Issues a config page request and blocks until completion, timeout,
    /// or force-completion by a concurrent recovery.
    ///
    /// This primitive sleeps; callers in interrupt/atomic context are
    /// rejected outright with [`MptError::FromInterruptContext`].
    pub fn config(&self, request: &mut ConfigRequest, flag: SleepFlag) -> Result<(), MptError> {
        if flag == SleepFlag::NoSleep {
            return Err(MptError::FromInterruptContext);
        }
        if !self.is_active() {
            return Err(MptError::NotReady);
        }
        let pool = self.pool.get().ok_or(MptError::NotReady)?;
        let frame = pool.acquire(0).ok_or(MptError::NoFreeFrame)?;
        let context = frame.header().msg_context;

        let write = matches!(
            request.action,
            msg::CONFIG_ACTION_PAGE_WRITE_CURRENT | msg::CONFIG_ACTION_PAGE_WRITE_NVRAM
        );
        let wire = ConfigRequestMsg {
            action: request.action,
            function: msg::FUNCTION_CONFIG,
            msg_context: context,
            header: request.header,
            page_address: request.page_address,
            sge_flags_length: msg::sge_flags_length(request.page_buffer_len, write),
            sge_address_low: request.page_buffer as u32,
            sge_address_high: (request.page_buffer >> 32) as u32,
            ..ConfigRequestMsg::default()
        };
        frame.write_msg(&wire);

        let pending = PendingConfig::new(context);
        self.pending.lock().push(pending.clone());
        self.submit_frame(0, frame);

        let timeout_ms = request.timeout_ms.max(self.cfg.config_timeout_ms);
        let deadline = self.hw.now_us() + u64::from(timeout_ms) * 1000;

        while !pending.done.load(Ordering::Acquire) {
            if self.hw.now_us() > deadline {
                log::warn!(
                    "{}: config action {:#04x} timed out, triggering recovery",
                    self.name,
                    request.action
                );
                // Recovery's pre-reset hook force-completes every pending
                // descriptor, including this one. If a racing recovery was
                // already in flight (the trigger below no-ops), complete
                // defensively so the caller never hangs.
                let _ = self.hard_reset_recover(SleepFlag::CanSleep);
                if !pending.done.load(Ordering::Acquire) {
                    pending.complete_err(MptError::AdapterReset);
                }
                break;
            }
            self.hw.sleep_us(CONFIG_POLL_US);
        }

        self.unlink_pending(&pending);

        if let Some(err) = *pending.error.lock() {
            return Err(err);
        }
        let status = pending.ioc_status.load(Ordering::Acquire);
        if status != msg::IOCSTATUS_SUCCESS {
            return Err(MptError::BadStatus(status));
        }
        request.header = *pending.header.lock();
        Ok(())
    }

    /// Completes the pending descriptor matching a config reply.
    ///
    /// Called by the base reply handler; the returned page header fields
    /// are copied back only when the IOC reported success.
    pub(crate) fn complete_config(&self, reply: &ConfigReplyMsg) {
        let target = {
            let pending = self.pending.lock();
            pending
                .iter()
                .find(|p| p.context == reply.msg_context)
                .cloned()
        };
        match target {
            Some(p) => {
                p.complete_ok(reply.ioc_status & msg::IOCSTATUS_MASK, reply.header);
            }
            None => {
                log::debug!(
                    "{}: config reply for unknown context {:#010x}",
                    self.name,
                    reply.msg_context
                );
            }
        }
    }

    /// Force-completes every pending config descriptor with `err`.
    ///
    /// Invoked by the recovery pre-reset hook and by teardown so blocked
    /// callers unblock rather than hanging across a reset.
    pub(crate) fn fail_pending_configs(&self, err: MptError) {
        let drained: alloc::vec::Vec<_> = {
            let mut pending = self.pending.lock();
            pending.drain(..).collect()
        };
        for p in &drained {
            p.complete_err(err);
        }
        if !drained.is_empty() {
            log::info!(
                "{}: force-completed {} pending config request(s)",
                self.name,
                drained.len()
            );
        }
    }

    fn unlink_pending(&self, target: &Arc<PendingConfig>) {
        self.pending
            .lock()
            .retain(|p| !Arc::ptr_eq(p, target));
    }
}
