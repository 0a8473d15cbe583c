//! Request/reply frame pool.
//!
//! One contiguous DMA region per adapter, carved into four aligned arenas:
//! reply frames, request frames, chain buffers, and sense buffers. Request
//! frames are addressed by index; a frame's identity travels on the wire as
//! the 16-bit index inside its message context, derived from the frame's
//! byte offset divided by the frame size, never from a pointer value.
//!
//! Ownership: a frame is exclusively owned by whoever holds it off the free
//! list, from [`FramePool::acquire`] until the reply path or an explicit
//! [`FramePool::release`] returns it. The free list is protected by a single
//! lock shared by the acquire path (process context) and the release path
//! (interrupt context); embedders must keep interrupts off while the lock is
//! held on the acquire side.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ptr;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use crate::error::MptError;
use crate::hw::HostServices;
use crate::msg::{self, DefaultReply, MsgHeader};

/// Alignment of the frame arenas within the pool region.
pub const FRAME_ALIGN: usize = 128;

/// Sizing parameters for one adapter's pool, negotiated from IOC Facts.
#[derive(Debug, Clone, Copy)]
pub struct PoolParams {
    /// Number of request frames (bounded by the IOC's global credits).
    pub req_depth: u16,
    /// Request frame size in bytes (multiple of [`FRAME_ALIGN`]).
    pub req_frame_size: usize,
    /// Number of reply frames to prime the reply FIFO with.
    pub reply_depth: u16,
    /// Reply frame size in bytes (multiple of [`FRAME_ALIGN`]).
    pub reply_frame_size: usize,
    /// Number of chain buffers (sized like request frames).
    pub chain_buffers: u16,
    /// Sense buffer bytes per request frame.
    pub sense_buffer_size: usize,
}

/// A request frame checked out of the pool.
///
/// Plain capability value: copying it does not duplicate ownership, which
/// stays with whoever is responsible for submitting or releasing the frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameRef {
    index: u16,
    virt: *mut u8,
    phys: u64,
}

// SAFETY: FrameRef is an index plus addresses into the pool region; access
// discipline is the pool's ownership protocol, not aliasing rules on the
// struct itself.
unsafe impl Send for FrameRef {}
unsafe impl Sync for FrameRef {}

impl FrameRef {
    /// The frame's index within the request arena.
    #[must_use]
    pub fn index(&self) -> u16 {
        self.index
    }

    /// The frame's bus-visible physical address.
    #[must_use]
    pub fn phys(&self) -> u64 {
        self.phys
    }

    /// Raw pointer to the frame memory.
    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.virt
    }

    /// Reads the generic request header.
    #[must_use]
    pub fn header(&self) -> MsgHeader {
        // SAFETY: Frames are FRAME_ALIGN-aligned and at least one request
        // frame long; MsgHeader is the first 12 bytes of every frame.
        unsafe { ptr::read(self.virt.cast::<MsgHeader>()) }
    }

    /// Stamps the message context field (byte offset 8).
    pub fn set_msg_context(&self, context: u32) {
        // SAFETY: See `header`; msg_context is within the frame.
        unsafe {
            (*self.virt.cast::<MsgHeader>()).msg_context = context;
        }
    }

    /// Copies a fully built request message into the frame.
    pub fn write_msg<T: Copy>(&self, value: &T) {
        // SAFETY: Frame memory is exclusively owned by the holder of this
        // checked-out frame and large enough for every request type the
        // engine builds (asserted against the frame size at pool creation).
        unsafe {
            ptr::write(self.virt.cast::<T>(), *value);
        }
    }

    /// Reads the frame memory as a message of type `T`.
    #[must_use]
    pub fn read_msg<T: Copy>(&self) -> T {
        // SAFETY: See `write_msg`.
        unsafe { ptr::read(self.virt.cast::<T>()) }
    }
}

/// A reply frame delivered by the IOC, resolved from the reply FIFO.
#[derive(Debug, Clone, Copy)]
pub struct ReplyRef {
    virt: *const u8,
    phys: u64,
}

// SAFETY: Same rationale as FrameRef; reply frames are read-only to the
// host between FIFO delivery and write-back.
unsafe impl Send for ReplyRef {}
unsafe impl Sync for ReplyRef {}

impl ReplyRef {
    /// The reply frame's bus-visible physical address.
    #[must_use]
    pub fn phys(&self) -> u64 {
        self.phys
    }

    /// Raw pointer to the reply memory.
    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.virt
    }

    /// Reads the generic reply header.
    #[must_use]
    pub fn default_reply(&self) -> DefaultReply {
        // SAFETY: Reply frames are FRAME_ALIGN-aligned and at least
        // DefaultReply-sized.
        unsafe { ptr::read(self.virt.cast::<DefaultReply>()) }
    }

    /// Reads the reply as a full message of type `T`.
    #[must_use]
    pub fn read_msg<T: Copy>(&self) -> T {
        // SAFETY: T is a wire reply struct no larger than a reply frame
        // (asserted against the frame size at pool creation).
        unsafe { ptr::read(self.virt.cast::<T>()) }
    }
}

/// The per-adapter frame pool.
pub struct FramePool {
    hw: Arc<dyn HostServices>,
    pool_phys: u64,
    pool_len: usize,
    reply_phys: u64,
    reply_virt: *mut u8,
    reply_frame_size: usize,
    reply_depth: u16,
    req_phys: u64,
    req_virt: *mut u8,
    req_frame_size: usize,
    req_depth: u16,
    sense_phys: u64,
    /// Free request frame indices, used as a LIFO stack.
    free: Mutex<Vec<u16>>,
    /// Per-frame in-flight marker; guards against double release.
    in_flight: Vec<AtomicBool>,
}

// SAFETY: All raw pointers reference the pool's own DMA region; mutation is
// serialized by the free-list lock plus the frame ownership protocol.
unsafe impl Send for FramePool {}
unsafe impl Sync for FramePool {}

/// Rounds `len` up to the next multiple of `align`.
const fn align_up(len: usize, align: usize) -> usize {
    (len + align - 1) & !(align - 1)
}

impl FramePool {
    /// Allocates the pool region and populates the free list.
    ///
    /// The single allocation holds, in order: reply frames, request frames,
    /// chain buffers, sense buffers, each sub-region aligned to
    /// [`FRAME_ALIGN`].
    pub fn new(hw: Arc<dyn HostServices>, params: PoolParams) -> Result<Self, MptError> {
        if params.req_depth == 0
            || params.reply_depth == 0
            || params.req_frame_size < 64
            || params.reply_frame_size < core::mem::size_of::<DefaultReply>()
        {
            return Err(MptError::InvalidParameter);
        }
        let req_frame_size = align_up(params.req_frame_size, FRAME_ALIGN);
        let reply_frame_size = align_up(params.reply_frame_size, FRAME_ALIGN);

        let reply_len = reply_frame_size * params.reply_depth as usize;
        let req_len = req_frame_size * params.req_depth as usize;
        let chain_len = req_frame_size * params.chain_buffers as usize;
        let sense_len =
            align_up(params.sense_buffer_size, 4) * params.req_depth as usize;

        let pool_len = align_up(reply_len, FRAME_ALIGN)
            + align_up(req_len, FRAME_ALIGN)
            + align_up(chain_len, FRAME_ALIGN)
            + align_up(sense_len, FRAME_ALIGN);

        let pool_phys = hw
            .alloc_dma(pool_len, FRAME_ALIGN)
            .map_err(|_| MptError::NoDmaMemory)?;
        let pool_virt = hw.phys_to_virt(pool_phys);

        // SAFETY: Freshly allocated region of pool_len bytes.
        unsafe { ptr::write_bytes(pool_virt, 0, pool_len) };

        let reply_phys = pool_phys;
        let reply_virt = pool_virt;
        let req_off = align_up(reply_len, FRAME_ALIGN);
        let req_phys = pool_phys + req_off as u64;
        // SAFETY: req_off < pool_len by construction.
        let req_virt = unsafe { pool_virt.add(req_off) };
        let sense_off = req_off
            + align_up(req_len, FRAME_ALIGN)
            + align_up(chain_len, FRAME_ALIGN);
        let sense_phys = pool_phys + sense_off as u64;

        let mut free = Vec::with_capacity(params.req_depth as usize);
        // Reverse push order so the LIFO pops index 0 first.
        for index in (0..params.req_depth).rev() {
            free.push(index);
        }
        let mut in_flight = Vec::with_capacity(params.req_depth as usize);
        in_flight.resize_with(params.req_depth as usize, || AtomicBool::new(false));

        Ok(Self {
            hw,
            pool_phys,
            pool_len,
            reply_phys,
            reply_virt,
            reply_frame_size,
            reply_depth: params.reply_depth,
            req_phys,
            req_virt,
            req_frame_size,
            req_depth: params.req_depth,
            sense_phys,
            free: Mutex::new(free),
            in_flight,
        })
    }

    /// Checks a request frame out of the free list and stamps its message
    /// context with `(request_index, callback_handle)`.
    ///
    /// Returns `None` on exhaustion; this is a normal, recoverable
    /// condition the caller reports as busy.
    pub fn acquire(&self, handle: u8) -> Option<FrameRef> {
        let index = self.free.lock().pop()?;
        self.in_flight[index as usize].store(true, Ordering::Release);
        let frame = self.frame(index);
        frame.set_msg_context(msg::make_context(handle, index));
        Some(frame)
    }

    /// Returns a frame to the free list.
    ///
    /// Releasing a frame that is not in flight is refused and logged
    /// instead of corrupting the free list.
    pub fn release(&self, index: u16) {
        if index >= self.req_depth {
            log::warn!("frame release: index {index} out of bounds");
            return;
        }
        if !self.in_flight[index as usize].swap(false, Ordering::AcqRel) {
            log::warn!("frame release: index {index} already free");
            return;
        }
        self.free.lock().push(index);
    }

    /// Translates a request frame index into a frame reference.
    ///
    /// Pure address arithmetic; returns `None` if the index is outside the
    /// request arena.
    #[must_use]
    pub fn index_to_frame(&self, index: u16) -> Option<FrameRef> {
        if index >= self.req_depth {
            return None;
        }
        Some(self.frame(index))
    }

    /// Translates a frame reference back to its index.
    #[must_use]
    pub fn frame_to_index(&self, frame: &FrameRef) -> u16 {
        frame.index
    }

    fn frame(&self, index: u16) -> FrameRef {
        let offset = index as usize * self.req_frame_size;
        FrameRef {
            index,
            // SAFETY: index < req_depth, so offset is within the arena.
            virt: unsafe { self.req_virt.add(offset) },
            phys: self.req_phys + offset as u64,
        }
    }

    /// Resolves a reply frame from the physical address delivered in a
    /// non-turbo reply descriptor. Returns `None` when the address falls
    /// outside the reply arena or is misaligned (defensive: firmware has
    /// been observed handing back garbage).
    #[must_use]
    pub fn reply_frame_by_phys(&self, phys: u64) -> Option<ReplyRef> {
        let end = self.reply_phys + (self.reply_frame_size * self.reply_depth as usize) as u64;
        if phys < self.reply_phys || phys >= end {
            return None;
        }
        let offset = (phys - self.reply_phys) as usize;
        if offset % self.reply_frame_size != 0 {
            return None;
        }
        Some(ReplyRef {
            // SAFETY: offset is within the reply arena.
            virt: unsafe { self.reply_virt.add(offset) },
            phys,
        })
    }

    /// Physical address of reply frame `i`, for FIFO priming.
    #[must_use]
    pub fn reply_frame_phys(&self, i: u16) -> u64 {
        debug_assert!(i < self.reply_depth);
        self.reply_phys + (i as usize * self.reply_frame_size) as u64
    }

    /// Number of reply frames in the reply arena.
    #[must_use]
    pub fn reply_depth(&self) -> u16 {
        self.reply_depth
    }

    /// Number of request frames in the request arena.
    #[must_use]
    pub fn req_depth(&self) -> u16 {
        self.req_depth
    }

    /// Request frame size in bytes.
    #[must_use]
    pub fn req_frame_size(&self) -> usize {
        self.req_frame_size
    }

    /// Reply frame size in bytes.
    #[must_use]
    pub fn reply_frame_size(&self) -> usize {
        self.reply_frame_size
    }

    /// Number of request frames currently on the free list.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free.lock().len()
    }

    /// Upper 32 bits of the request arena base (for IOCInit).
    #[must_use]
    pub fn request_high_addr(&self) -> u32 {
        (self.req_phys >> 32) as u32
    }

    /// Upper 32 bits of the sense arena base (for IOCInit).
    #[must_use]
    pub fn sense_high_addr(&self) -> u32 {
        (self.sense_phys >> 32) as u32
    }

    /// Repopulates the free list with every request frame.
    ///
    /// Used when re-priming the FIFOs after a reset: any frame that was in
    /// flight belongs to a request the reset destroyed.
    pub fn reset_free_list(&self) {
        let mut free = self.free.lock();
        free.clear();
        for index in (0..self.req_depth).rev() {
            free.push(index);
        }
        for flag in &self.in_flight {
            flag.store(false, Ordering::Release);
        }
    }
}

impl Drop for FramePool {
    fn drop(&mut self) {
        // SAFETY: The adapter disables interrupts and quiesces the IOC
        // before dropping the pool; phys/len match the single allocation.
        unsafe { self.hw.free_dma(self.pool_phys, self.pool_len) };
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::msg::{context_handle, context_index};
    use std::boxed::Box;
    use std::vec;

    /// Minimal host backing one leaked allocation; phys == virt address.
    struct TestHw;

    impl HostServices for TestHw {
        fn read32(&self, _offset: u32) -> u32 {
            0
        }
        fn write32(&self, _offset: u32, _value: u32) {}
        fn alloc_dma(&self, len: usize, _align: usize) -> Result<u64, MptError> {
            let buf = vec![0u8; len + FRAME_ALIGN].into_boxed_slice();
            let base = Box::leak(buf).as_mut_ptr() as u64;
            Ok(align_up(base as usize, FRAME_ALIGN) as u64)
        }
        unsafe fn free_dma(&self, _phys: u64, _len: usize) {}
        fn phys_to_virt(&self, phys: u64) -> *mut u8 {
            phys as *mut u8
        }
        fn now_us(&self) -> u64 {
            0
        }
        fn delay_us(&self, _us: u64) {}
        fn sleep_us(&self, _us: u64) {}
    }

    fn pool(depth: u16) -> FramePool {
        FramePool::new(
            Arc::new(TestHw),
            PoolParams {
                req_depth: depth,
                req_frame_size: 128,
                reply_depth: 8,
                reply_frame_size: 128,
                chain_buffers: 4,
                sense_buffer_size: 64,
            },
        )
        .unwrap()
    }

    #[test]
    fn acquire_stamps_context() {
        let pool = pool(4);
        let frame = pool.acquire(12).unwrap();
        let ctx = frame.header().msg_context;
        assert_eq!(context_handle(ctx), 12);
        assert_eq!(context_index(ctx), frame.index());
    }

    #[test]
    fn index_translation_round_trip() {
        let pool = pool(4);
        let frame = pool.acquire(1).unwrap();
        let index = pool.frame_to_index(&frame);
        let again = pool.index_to_frame(index).unwrap();
        assert_eq!(again.phys(), frame.phys());
        assert_eq!(pool.frame_to_index(&again), index);
        assert!(pool.index_to_frame(4).is_none());
    }

    #[test]
    fn exhaustion_then_reuse() {
        let pool = pool(3);
        let mut frames = vec![];
        while let Some(f) = pool.acquire(1) {
            frames.push(f);
        }
        assert_eq!(frames.len(), 3);
        assert!(pool.acquire(1).is_none());

        let released = frames.pop().unwrap();
        pool.release(released.index());
        let next = pool.acquire(1).unwrap();
        assert_eq!(next.index(), released.index());
    }

    #[test]
    fn conservation_under_release() {
        let pool = pool(4);
        let a = pool.acquire(1).unwrap();
        let b = pool.acquire(1).unwrap();
        assert_eq!(pool.free_count(), 2);
        pool.release(a.index());
        pool.release(b.index());
        assert_eq!(pool.free_count(), 4);
        // Double release is refused, free list length stays bounded.
        pool.release(a.index());
        assert_eq!(pool.free_count(), 4);
        pool.release(999);
        assert_eq!(pool.free_count(), 4);
    }

    #[test]
    fn reply_frame_bounds() {
        let pool = pool(2);
        let good = pool.reply_frame_phys(3);
        assert!(pool.reply_frame_by_phys(good).is_some());
        assert!(pool.reply_frame_by_phys(good + 4).is_none());
        let past_end = pool.reply_frame_phys(7) + 128;
        assert!(pool.reply_frame_by_phys(past_end).is_none());
    }

    #[test]
    fn reset_free_list_reclaims_in_flight() {
        let pool = pool(3);
        let _a = pool.acquire(1).unwrap();
        let _b = pool.acquire(1).unwrap();
        assert_eq!(pool.free_count(), 1);
        pool.reset_free_list();
        assert_eq!(pool.free_count(), 3);
    }
}
