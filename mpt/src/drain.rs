//! Interrupt reply drain loop.
//!
//! The steady-state hot path, invoked once per hardware interrupt. Drains
//! every pending descriptor from the reply FIFO in one call (the FIFO can
//! legitimately hold thousands of entries under load), dispatching each to
//! the owning protocol driver's callback and recycling the originating
//! request frame when the callback says so.
//!
//! Nothing in this path blocks, and every pointer or index recovered from
//! a descriptor is bounds-checked against the pool before use; a violation
//! is logged and skipped, never dereferenced. Firmware has been observed
//! handing back garbage in the field.

use crate::error::MptError;
use crate::frame::{FramePool, FrameRef, ReplyRef};
use crate::ioc::Ioc;
use crate::msg::{self, ConfigReplyMsg, EventAckRequest, EventNotificationReply};
use crate::registry::{DriverClass, FrameDisposition};
use crate::regs;

impl Ioc {
    /// Services a hardware interrupt: drains the reply FIFO until the
    /// empty sentinel comes back. Returns the number of replies handled,
    /// zero meaning the interrupt was not ours.
    ///
    /// Safe to call from interrupt context; never blocks.
    pub fn interrupt(&self) -> usize {
        if !self.is_active() {
            return 0;
        }
        let Some(pool) = self.pool.get() else {
            return 0;
        };
        let mut drained = 0;
        loop {
            let value = self.hw.read32(regs::REPLY_FIFO);
            if value == regs::REPLY_FIFO_EMPTY {
                break;
            }
            drained += 1;
            if value & regs::REPLY_ADDRESS_BIT != 0 {
                self.address_reply(pool, value);
            } else {
                self.turbo_reply(pool, value);
            }
        }
        drained
    }

    /// Non-turbo descriptor: the controller filled a full reply frame in
    /// the reply arena and handed back its (shifted) physical address.
    ///
    /// The descriptor is written back to the FIFO after dispatch to return
    /// the slot to the controller; turbo descriptors must never be.
    fn address_reply(&self, pool: &FramePool, descriptor: u32) {
        let phys = regs::reply_descriptor_to_phys(descriptor);
        let Some(reply) = pool.reply_frame_by_phys(phys) else {
            log::warn!(
                "{}: reply frame address {:#x} outside the pool, dropping",
                self.name,
                phys
            );
            self.hw.write32(regs::REPLY_FIFO, descriptor);
            return;
        };

        let header = reply.default_reply();
        if header.has_log_info() {
            log_ioc_log_info(self, header.ioc_log_info);
        }

        let handle = msg::context_handle(header.msg_context);
        let index = msg::context_index(header.msg_context);
        let frame = if index == msg::HANDSHAKE_FRAME_INDEX {
            // Doorbell-originated request; no pool frame to recycle.
            None
        } else {
            match pool.index_to_frame(index) {
                Some(frame) => Some(frame),
                None => {
                    log::warn!(
                        "{}: reply context index {} out of bounds, skipping callback",
                        self.name,
                        index
                    );
                    self.hw.write32(regs::REPLY_FIFO, descriptor);
                    return;
                }
            }
        };

        let disposition = self.dispatch(handle, frame, Some(reply));
        self.hw.write32(regs::REPLY_FIFO, descriptor);
        if disposition == FrameDisposition::Free {
            if let Some(frame) = frame {
                pool.release(frame.index());
            }
        }
    }

    /// Turbo descriptor: the 32-bit value itself is the whole reply.
    fn turbo_reply(&self, pool: &FramePool, value: u32) {
        let reply_type = (value & regs::CONTEXT_REPLY_TYPE_MASK) >> regs::CONTEXT_REPLY_TYPE_SHIFT;
        match reply_type {
            regs::CONTEXT_REPLY_TYPE_DEFAULT => {
                let handle = msg::context_handle(value);
                let index = msg::context_index(value);
                let frame = if index == msg::HANDSHAKE_FRAME_INDEX {
                    // Doorbell-originated request; no pool frame to recycle.
                    None
                } else {
                    match pool.index_to_frame(index) {
                        Some(frame) => Some(frame),
                        None => {
                            log::warn!(
                                "{}: turbo context index {} out of bounds, skipping callback",
                                self.name,
                                index
                            );
                            return;
                        }
                    }
                };
                if self.dispatch(handle, frame, None) == FrameDisposition::Free {
                    if let Some(frame) = frame {
                        pool.release(frame.index());
                    }
                }
            }
            regs::CONTEXT_REPLY_TYPE_LAN => {
                // A class of LAN send acks carries no payload at all; the
                // firmware flags those so the frame recycles with no
                // callback overhead.
                if value & regs::CONTEXT_LAN_FREE_NO_CALLBACK
                    == regs::CONTEXT_LAN_FREE_NO_CALLBACK
                {
                    pool.release(msg::context_index(value));
                    return;
                }
                let Some(handle) = self.registry.class_handle(DriverClass::Lan) else {
                    log::warn!("{}: LAN turbo reply with no LAN driver", self.name);
                    return;
                };
                let frame = pool.index_to_frame(msg::context_index(value));
                if self.dispatch(handle, frame, None) == FrameDisposition::Free {
                    if let Some(frame) = frame {
                        pool.release(frame.index());
                    }
                }
            }
            regs::CONTEXT_REPLY_TYPE_TARGET => {
                // Target-mode replies have no originating request frame.
                let Some(handle) = self.registry.class_handle(DriverClass::ScsiTarget) else {
                    log::warn!("{}: target turbo reply with no target driver", self.name);
                    return;
                };
                let _ = self.dispatch(handle, None, None);
            }
            _ => {
                log::warn!(
                    "{}: unknown turbo reply type {} ({:#010x})",
                    self.name,
                    reply_type,
                    value
                );
            }
        }
    }

    /// Routes a resolved reply to its callback. Handle 0 is the adapter's
    /// own base handler; an unregistered handle is logged and the frame
    /// freed so the pool cannot leak on a driver bug.
    fn dispatch(
        &self,
        handle: u8,
        frame: Option<FrameRef>,
        reply: Option<ReplyRef>,
    ) -> FrameDisposition {
        if handle == 0 {
            return self.base_reply(frame, reply);
        }
        match self.registry.reply_callback(handle) {
            Some(callback) => callback(self, frame, reply),
            None => {
                log::warn!("{}: reply for unregistered handle {}", self.name, handle);
                FrameDisposition::Free
            }
        }
    }

    /// The base driver's own reply handler: config completions, event
    /// notifications, event acks.
    pub(crate) fn base_reply(
        &self,
        _frame: Option<FrameRef>,
        reply: Option<ReplyRef>,
    ) -> FrameDisposition {
        let Some(reply) = reply else {
            // Turbo ack for one of our own requests (event ack); nothing
            // to parse.
            return FrameDisposition::Free;
        };
        let header = reply.default_reply();
        match header.function {
            msg::FUNCTION_CONFIG => {
                let config_reply: ConfigReplyMsg = reply.read_msg();
                self.complete_config(&config_reply);
                FrameDisposition::Free
            }
            msg::FUNCTION_EVENT_NOTIFICATION => {
                let event: EventNotificationReply = reply.read_msg();
                self.handle_event(&event);
                // The standing event request stays outstanding as long as
                // the firmware marks its replies as continuations.
                if event.msg_flags & msg::MSG_FLAGS_CONTINUATION_REPLY != 0 {
                    FrameDisposition::Keep
                } else {
                    FrameDisposition::Free
                }
            }
            msg::FUNCTION_EVENT_ACK => FrameDisposition::Free,
            function => {
                log::warn!(
                    "{}: unexpected function {:#04x} in base reply handler",
                    self.name,
                    function
                );
                FrameDisposition::Free
            }
        }
    }

    fn handle_event(&self, event: &EventNotificationReply) {
        log::debug!(
            "{}: event {:#04x} (context {:#010x})",
            self.name,
            event.event,
            event.event_context
        );
        self.record_event(event.event);
        self.registry
            .for_each_event_handler(|_, handler| handler(self, event));
        if event.ack_required != 0 {
            if let Err(err) = self.send_event_ack(event) {
                log::warn!("{}: event ack failed: {}", self.name, err);
            }
        }
    }

    /// Acknowledges an event the firmware flagged as requiring one.
    fn send_event_ack(&self, event: &EventNotificationReply) -> Result<(), MptError> {
        let pool = self.pool.get().ok_or(MptError::NotReady)?;
        let frame = pool.acquire(0).ok_or(MptError::NoFreeFrame)?;
        let request = EventAckRequest {
            function: msg::FUNCTION_EVENT_ACK,
            msg_context: frame.header().msg_context,
            event: event.event,
            event_context: event.event_context,
            ..EventAckRequest::default()
        };
        frame.write_msg(&request);
        self.submit_frame(0, frame);
        Ok(())
    }
}

/// Decodes and logs a vendor diagnostic log-info word from a reply that
/// flagged one as present.
pub(crate) fn log_ioc_log_info(ioc: &Ioc, word: u32) {
    let originator = match (word >> 24) & 0x0F {
        0x0 => "IOP",
        0x1 => "link layer",
        0x2 => "integrated RAID",
        _ => "unknown",
    };
    log::warn!(
        "{}: firmware log info {:#010x} ({}, code {:#06x})",
        ioc.name,
        word,
        originator,
        word & 0xFFFF
    );
}
