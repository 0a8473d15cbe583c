//! Doorbell handshake protocol.
//!
//! Synchronous, polled, word-granular exchange with the IOC over the
//! doorbell and interrupt-status registers. Used only for the operations
//! that must work before the frame-based fast path exists: IOC facts,
//! IOCInit, PortEnable, firmware upload, task management.
//!
//! The firmware enforces a strict word-at-a-time handshake with an explicit
//! acknowledgement per word. Skipping an ack wait or failing to clear the
//! interrupt-status register between steps desynchronizes both sides
//! irrecoverably, so every step re-clears interrupt status and every wait
//! carries an explicit bounded timeout.

use crate::error::MptError;
use crate::hw::SleepFlag;
use crate::ioc::Ioc;
use crate::msg::{self, DefaultReply};
use crate::regs::{self, IntStatus};

/// Size of the reply accumulation buffer, in bytes.
const REPLY_ACCUM_BYTES: usize = 128;
/// Same, in 16-bit half-words.
const REPLY_ACCUM_HWORDS: usize = REPLY_ACCUM_BYTES / 2;

impl Ioc {
    /// Performs a full doorbell exchange: sends `request` (whole 32-bit
    /// words) and accumulates the reply into `reply_out`.
    ///
    /// Returns the number of reply bytes copied out, bounded by both the
    /// reply's own message length and `reply_out.len()`. Each phase fails
    /// with its own error on timeout.
    pub(crate) fn handshake_req_reply_wait(
        &self,
        request: &[u8],
        reply_out: &mut [u8],
        timeout_s: u32,
        flag: SleepFlag,
    ) -> Result<usize, MptError> {
        if request.is_empty() || request.len() % 4 != 0 {
            return Err(MptError::InvalidParameter);
        }
        let words = request.len() / 4;

        self.handshake_send(request, words, timeout_s, flag)?;
        let got = self.wait_for_doorbell_reply(reply_out, timeout_s, flag)?;

        log::trace!(
            "{}: handshake function {:#04x} complete, {} reply bytes",
            self.name,
            request[3],
            got
        );
        Ok(got)
    }

    /// Frames an arbitrary prepared request over the doorbell on behalf of
    /// a registered driver. The reply is delivered through the reply FIFO
    /// to the driver's callback, not through the doorbell.
    ///
    /// Used for task management, which must work even when the request
    /// FIFO path is suspect.
    pub fn send_handshake_request(
        &self,
        handle: u8,
        request: &[u8],
        timeout_s: u32,
        flag: SleepFlag,
    ) -> Result<(), MptError> {
        if request.len() < core::mem::size_of::<msg::MsgHeader>() || request.len() % 4 != 0 {
            return Err(MptError::InvalidParameter);
        }
        if handle as usize >= crate::registry::MAX_DRIVERS {
            return Err(MptError::InvalidHandle);
        }

        let mut buf = [0u8; REPLY_ACCUM_BYTES];
        if request.len() > buf.len() {
            return Err(MptError::InvalidParameter);
        }
        buf[..request.len()].copy_from_slice(request);
        // Context at byte offset 8: no originating pool frame.
        let context = msg::make_context(handle, msg::HANDSHAKE_FRAME_INDEX);
        buf[8..12].copy_from_slice(&context.to_le_bytes());

        let words = request.len() / 4;
        self.handshake_send(&buf[..request.len()], words, timeout_s, flag)
    }

    /// Phases 1-3 of the exchange: initiate, ack, per-word transfer.
    fn handshake_send(
        &self,
        request: &[u8],
        words: usize,
        timeout_s: u32,
        flag: SleepFlag,
    ) -> Result<(), MptError> {
        let int_status = IntStatus::from_bits_truncate(self.hw.read32(regs::INT_STATUS));
        if int_status.contains(IntStatus::IOP_DOORBELL_ACTIVE) {
            return Err(MptError::DoorbellInUse);
        }

        self.hw.write32(regs::INT_STATUS, 0);
        self.hw.write32(
            regs::DOORBELL,
            (u32::from(msg::FUNCTION_HANDSHAKE) << regs::DOORBELL_FUNCTION_SHIFT)
                | ((words as u32) << regs::DOORBELL_ADD_DWORDS_SHIFT),
        );

        // The IOC acknowledges the initiation with a doorbell interrupt
        // carrying a 16-bit ack word we read and discard.
        self.wait_for_doorbell_int(timeout_s, flag)
            .map_err(|_| MptError::HandshakeTimeout)?;
        let _ack = self.hw.read32(regs::DOORBELL) & regs::DOORBELL_DATA_MASK;
        self.hw.write32(regs::INT_STATUS, 0);

        for chunk in request.chunks_exact(4) {
            let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            self.hw.write32(regs::DOORBELL, word);
            self.wait_for_doorbell_ack(timeout_s, flag)?;
        }
        Ok(())
    }

    /// Phase 4: accumulate the doorbell reply, 16 bits per interrupt.
    ///
    /// The total length is known once the first two half-words (which
    /// contain the reply's MessageLength) have arrived; a buggy or stale
    /// length never writes past the accumulation buffer.
    fn wait_for_doorbell_reply(
        &self,
        reply_out: &mut [u8],
        timeout_s: u32,
        flag: SleepFlag,
    ) -> Result<usize, MptError> {
        let mut hwords = [0u16; REPLY_ACCUM_HWORDS];

        for slot in hwords.iter_mut().take(2) {
            self.wait_for_doorbell_int(timeout_s, flag)
                .map_err(|_| MptError::ReplyTimeout)?;
            *slot = (self.hw.read32(regs::DOORBELL) & regs::DOORBELL_DATA_MASK) as u16;
            self.hw.write32(regs::INT_STATUS, 0);
        }

        // MessageLength (32-bit words) lives in the low byte of the second
        // half-word; see DefaultReply byte offset 2.
        let msg_words = (hwords[1] & 0x00FF) as usize;
        let total_hwords = (2 * msg_words).max(2);

        for i in 2..total_hwords {
            self.wait_for_doorbell_int(timeout_s, flag)
                .map_err(|_| MptError::ReplyTimeout)?;
            let hword = (self.hw.read32(regs::DOORBELL) & regs::DOORBELL_DATA_MASK) as u16;
            if i < REPLY_ACCUM_HWORDS {
                hwords[i] = hword;
            }
            self.hw.write32(regs::INT_STATUS, 0);
        }

        let avail = total_hwords.min(REPLY_ACCUM_HWORDS) * 2;
        let copy = avail.min(reply_out.len());
        for (i, out) in reply_out.iter_mut().enumerate().take(copy) {
            let hword = hwords[i / 2];
            *out = if i % 2 == 0 {
                (hword & 0xFF) as u8
            } else {
                (hword >> 8) as u8
            };
        }
        Ok(copy)
    }

    /// Bounded wait for the doorbell-interrupt bit.
    pub(crate) fn wait_for_doorbell_int(
        &self,
        timeout_s: u32,
        flag: SleepFlag,
    ) -> Result<(), MptError> {
        let mut cntdn = u64::from(timeout_s) * 1000;
        while cntdn > 0 {
            let int_status = IntStatus::from_bits_truncate(self.hw.read32(regs::INT_STATUS));
            if int_status.contains(IntStatus::DOORBELL) {
                return Ok(());
            }
            self.hw.pause(flag, 1000);
            cntdn -= 1;
        }
        Err(MptError::HandshakeTimeout)
    }

    /// Bounded wait for the IOC to consume the last doorbell write
    /// (doorbell-active bit clearing).
    pub(crate) fn wait_for_doorbell_ack(
        &self,
        timeout_s: u32,
        flag: SleepFlag,
    ) -> Result<(), MptError> {
        let mut cntdn = u64::from(timeout_s) * 1000;
        while cntdn > 0 {
            let int_status = IntStatus::from_bits_truncate(self.hw.read32(regs::INT_STATUS));
            if !int_status.contains(IntStatus::IOP_DOORBELL_ACTIVE) {
                return Ok(());
            }
            self.hw.pause(flag, 1000);
            cntdn -= 1;
        }
        Err(MptError::DoorbellAckTimeout)
    }

    /// Runs a handshake exchange and checks the reply's IOC status.
    ///
    /// Convenience wrapper for request/reply pairs where the caller wants
    /// the typed reply on success and a status error otherwise.
    pub(crate) fn handshake_checked<Req: Copy, Reply: Copy>(
        &self,
        request: &Req,
        timeout_s: u32,
        flag: SleepFlag,
    ) -> Result<Reply, MptError> {
        let req_bytes = unsafe {
            // SAFETY: Req is a #[repr(C)] wire struct; viewing it as bytes
            // is the definition of serialization here.
            core::slice::from_raw_parts(
                (request as *const Req).cast::<u8>(),
                core::mem::size_of::<Req>(),
            )
        };
        let mut reply_buf = [0u8; REPLY_ACCUM_BYTES];
        let reply_len = core::mem::size_of::<Reply>().min(REPLY_ACCUM_BYTES);
        let got = self.handshake_req_reply_wait(
            req_bytes,
            &mut reply_buf[..reply_len],
            timeout_s,
            flag,
        )?;
        if got < core::mem::size_of::<DefaultReply>().min(reply_len) {
            return Err(MptError::ReplyTimeout);
        }

        // SAFETY: reply_buf is zero-initialized and at least size_of::<Reply>()
        // bytes; Reply is a #[repr(C)] wire struct valid for any bit pattern.
        let reply = unsafe { core::ptr::read_unaligned(reply_buf.as_ptr().cast::<Reply>()) };

        // Every doorbell reply starts with the default reply layout.
        let header =
            unsafe { core::ptr::read_unaligned(reply_buf.as_ptr().cast::<DefaultReply>()) };
        let status = header.status();
        if status != msg::IOCSTATUS_SUCCESS {
            if header.has_log_info() {
                crate::drain::log_ioc_log_info(self, header.ioc_log_info);
            }
            return Err(MptError::BadStatus(status));
        }
        Ok(reply)
    }
}
