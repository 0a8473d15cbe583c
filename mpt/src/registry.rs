//! Protocol driver callback registry.
//!
//! A fixed table of at most [`MAX_DRIVERS`] slots, indexed by a 1-based
//! handle, mapping each registered protocol driver (SCSI initiator, SCSI
//! target, LAN, management) to its reply callback, event handler, and reset
//! handler. Handle 0 is permanently reserved for the base driver; the drain
//! loop routes context handle 0 to the adapter's own reply handler.
//!
//! Registration is a rare administrative operation; dispatch reads the
//! table on every reply. The table therefore sits behind a reader-biased
//! lock rather than the hot path paying for mutual exclusion.

use spin::RwLock;

use crate::error::MptError;
use crate::frame::{FrameRef, ReplyRef};
use crate::ioc::Ioc;
use crate::msg::EventNotificationReply;

/// Size of the callback table (including the reserved slot 0).
pub const MAX_DRIVERS: usize = 16;

/// Protocol class of a registered driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverClass {
    /// The base/management driver itself.
    Base,
    /// SCSI initiator protocol driver.
    ScsiInitiator,
    /// SCSI target-mode protocol driver.
    ScsiTarget,
    /// LAN-over-fabric protocol driver.
    Lan,
    /// Management/ioctl driver.
    Management,
}

/// A reply callback's verdict on the originating request frame.
///
/// The callback return value is the authoritative "free the frame now"
/// signal; the drain loop never infers it from the reply type, because
/// protocol classes differ (LAN keeps frames alive across sends).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    /// Return the request frame to the pool.
    Free,
    /// The driver retains the frame.
    Keep,
}

/// Phase tag passed to reset handlers around a hard reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetPhase {
    /// About to issue a diagnostic reset; save state, fail pending work.
    PreReset,
    /// Bring-up completed after the reset; re-establish driver state.
    PostReset,
}

/// Reply callback: `(adapter, originating request frame, reply frame)`.
///
/// Either frame may be absent: turbo replies carry no reply frame, and
/// target-mode or doorbell-originated replies have no request frame.
pub type ReplyCallback = fn(&Ioc, Option<FrameRef>, Option<ReplyRef>) -> FrameDisposition;

/// Asynchronous event handler.
pub type EventHandler = fn(&Ioc, &EventNotificationReply);

/// Pre/post reset hook.
pub type ResetHandler = fn(&Ioc, ResetPhase);

#[derive(Clone, Copy, Default)]
struct Slot {
    reply: Option<ReplyCallback>,
    event: Option<EventHandler>,
    reset: Option<ResetHandler>,
    class: Option<DriverClass>,
}

/// The shared driver callback table.
pub struct CallbackRegistry {
    slots: RwLock<[Slot; MAX_DRIVERS]>,
}

impl CallbackRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: RwLock::new([Slot::default(); MAX_DRIVERS]),
        }
    }

    /// Registers a protocol driver's reply callback.
    ///
    /// Slots are scanned from the high end down, so driver class priority
    /// is implicit in allocation order. Returns `None` when the table is
    /// full; never returns handle 0.
    pub fn register(&self, callback: ReplyCallback, class: DriverClass) -> Option<u8> {
        let mut slots = self.slots.write();
        for handle in (1..MAX_DRIVERS).rev() {
            if slots[handle].reply.is_none() {
                slots[handle] = Slot {
                    reply: Some(callback),
                    event: None,
                    reset: None,
                    class: Some(class),
                };
                return Some(handle as u8);
            }
        }
        None
    }

    /// Clears every table entry for `handle`.
    pub fn deregister(&self, handle: u8) -> Result<(), MptError> {
        self.check(handle)?;
        self.slots.write()[handle as usize] = Slot::default();
        Ok(())
    }

    /// Attaches an event handler to an already-registered handle.
    pub fn event_register(&self, handle: u8, handler: EventHandler) -> Result<(), MptError> {
        self.check(handle)?;
        self.slots.write()[handle as usize].event = Some(handler);
        Ok(())
    }

    /// Detaches the event handler for `handle`.
    pub fn event_deregister(&self, handle: u8) -> Result<(), MptError> {
        self.check(handle)?;
        self.slots.write()[handle as usize].event = None;
        Ok(())
    }

    /// Attaches a reset handler to an already-registered handle.
    pub fn reset_register(&self, handle: u8, handler: ResetHandler) -> Result<(), MptError> {
        self.check(handle)?;
        self.slots.write()[handle as usize].reset = Some(handler);
        Ok(())
    }

    /// Detaches the reset handler for `handle`.
    pub fn reset_deregister(&self, handle: u8) -> Result<(), MptError> {
        self.check(handle)?;
        self.slots.write()[handle as usize].reset = None;
        Ok(())
    }

    /// Looks up the reply callback for a context handle.
    #[must_use]
    pub fn reply_callback(&self, handle: u8) -> Option<ReplyCallback> {
        if handle == 0 || handle as usize >= MAX_DRIVERS {
            return None;
        }
        self.slots.read()[handle as usize].reply
    }

    /// Returns the handle of the first registered driver of `class`.
    ///
    /// Used by the drain loop to resolve the fixed handles of LAN and
    /// target-mode turbo replies.
    #[must_use]
    pub fn class_handle(&self, class: DriverClass) -> Option<u8> {
        let slots = self.slots.read();
        (1..MAX_DRIVERS)
            .rev()
            .find(|&h| slots[h].class == Some(class) && slots[h].reply.is_some())
            .map(|h| h as u8)
    }

    /// Invokes `f` for every registered event handler.
    ///
    /// Handlers are copied out under the read lock and invoked without it.
    pub fn for_each_event_handler(&self, mut f: impl FnMut(u8, EventHandler)) {
        let mut handlers = [None; MAX_DRIVERS];
        {
            let slots = self.slots.read();
            for (h, slot) in slots.iter().enumerate() {
                handlers[h] = slot.event;
            }
        }
        for (h, handler) in handlers.iter().enumerate() {
            if let Some(handler) = handler {
                f(h as u8, *handler);
            }
        }
    }

    /// Invokes `f` for every registered reset handler, in descending
    /// handle order (the order bring-up promises its pre/post hooks).
    pub fn for_each_reset_handler(&self, mut f: impl FnMut(u8, ResetHandler)) {
        let mut handlers = [None; MAX_DRIVERS];
        {
            let slots = self.slots.read();
            for (h, slot) in slots.iter().enumerate() {
                handlers[h] = slot.reset;
            }
        }
        for h in (0..MAX_DRIVERS).rev() {
            if let Some(handler) = handlers[h] {
                f(h as u8, handler);
            }
        }
    }

    fn check(&self, handle: u8) -> Result<(), MptError> {
        if handle == 0 || handle as usize >= MAX_DRIVERS {
            return Err(MptError::InvalidHandle);
        }
        Ok(())
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nop_reply(_: &Ioc, _: Option<FrameRef>, _: Option<ReplyRef>) -> FrameDisposition {
        FrameDisposition::Free
    }

    fn nop_event(_: &Ioc, _: &EventNotificationReply) {}

    fn nop_reset(_: &Ioc, _: ResetPhase) {}

    #[test]
    fn handles_allocate_top_down_and_stay_unique() {
        let reg = CallbackRegistry::new();
        let a = reg.register(nop_reply, DriverClass::ScsiInitiator).unwrap();
        let b = reg.register(nop_reply, DriverClass::Lan).unwrap();
        assert_eq!(a, (MAX_DRIVERS - 1) as u8);
        assert_eq!(b, (MAX_DRIVERS - 2) as u8);
        assert_ne!(a, b);

        reg.deregister(a).unwrap();
        let c = reg.register(nop_reply, DriverClass::Management).unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn exhaustion_returns_none_not_zero() {
        let reg = CallbackRegistry::new();
        for _ in 1..MAX_DRIVERS {
            let h = reg.register(nop_reply, DriverClass::Management).unwrap();
            assert_ne!(h, 0);
        }
        assert!(reg.register(nop_reply, DriverClass::Management).is_none());
    }

    #[test]
    fn aux_tables_reject_bad_handles() {
        let reg = CallbackRegistry::new();
        assert_eq!(reg.event_register(0, nop_event), Err(MptError::InvalidHandle));
        assert_eq!(
            reg.reset_register(MAX_DRIVERS as u8, nop_reset),
            Err(MptError::InvalidHandle)
        );
        let h = reg.register(nop_reply, DriverClass::ScsiInitiator).unwrap();
        reg.event_register(h, nop_event).unwrap();
        reg.reset_register(h, nop_reset).unwrap();
        reg.event_deregister(h).unwrap();
        reg.reset_deregister(h).unwrap();
    }

    #[test]
    fn deregister_clears_all_tables() {
        let reg = CallbackRegistry::new();
        let h = reg.register(nop_reply, DriverClass::Lan).unwrap();
        reg.event_register(h, nop_event).unwrap();
        reg.reset_register(h, nop_reset).unwrap();
        reg.deregister(h).unwrap();
        assert!(reg.reply_callback(h).is_none());
        assert!(reg.class_handle(DriverClass::Lan).is_none());
        let mut resets = 0;
        reg.for_each_reset_handler(|_, _| resets += 1);
        assert_eq!(resets, 0);
    }

    #[test]
    fn reset_handlers_run_in_descending_order() {
        extern crate std;
        use std::vec::Vec;

        let reg = CallbackRegistry::new();
        let a = reg.register(nop_reply, DriverClass::ScsiInitiator).unwrap();
        let b = reg.register(nop_reply, DriverClass::Lan).unwrap();
        reg.reset_register(a, nop_reset).unwrap();
        reg.reset_register(b, nop_reset).unwrap();
        let mut order = Vec::new();
        reg.for_each_reset_handler(|h, _| order.push(h));
        assert_eq!(order, [a, b]);
    }

    #[test]
    fn class_lookup() {
        let reg = CallbackRegistry::new();
        assert!(reg.class_handle(DriverClass::Lan).is_none());
        let h = reg.register(nop_reply, DriverClass::Lan).unwrap();
        assert_eq!(reg.class_handle(DriverClass::Lan), Some(h));
    }
}
