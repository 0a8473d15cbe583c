//! Host service contract between the engine and its embedder.
//!
//! The engine drives one IOC through a small memory-mapped register window
//! and a handful of host facilities (DMA memory, a monotonic clock, delay
//! primitives). [`HostServices`] captures exactly that surface so the same
//! engine can sit on a kernel MMIO mapping, a user-space VFIO region, or
//! the in-memory simulator used by the test suite.
//!
//! Interrupt delivery is intentionally not part of this trait: the embedder
//! wires its interrupt source (ISR, IRQ thread, eventfd) to
//! [`Ioc::interrupt`](crate::ioc::Ioc::interrupt) itself.

use crate::error::MptError;

/// Whether the calling context may yield to a scheduler while waiting.
///
/// Threaded through every bounded wait in the engine. `NoSleep` callers get
/// busy `delay_us` pauses; `CanSleep` callers get cooperative `sleep_us`
/// pauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepFlag {
    /// The caller may block/yield.
    CanSleep,
    /// The caller is in atomic or interrupt context and must spin.
    NoSleep,
}

/// Services the embedder provides to the engine.
///
/// Register accessors take byte offsets into the chip register window (see
/// [`crate::regs`]). All accesses must behave as volatile MMIO: no caching,
/// no reordering against other accesses to the same window.
pub trait HostServices: Send + Sync {
    /// Reads a 32-bit chip register at the given byte offset.
    fn read32(&self, offset: u32) -> u32;

    /// Writes a 32-bit chip register at the given byte offset.
    fn write32(&self, offset: u32, value: u32);

    /// Allocates `len` bytes of DMA-capable memory with the given alignment.
    ///
    /// Returns the bus-visible physical base address. The region must stay
    /// mapped until freed with [`free_dma`](Self::free_dma).
    fn alloc_dma(&self, len: usize, align: usize) -> Result<u64, MptError>;

    /// Frees DMA memory previously allocated with [`alloc_dma`](Self::alloc_dma).
    ///
    /// # Safety
    ///
    /// The caller must ensure the controller holds no references to the
    /// region (FIFOs drained, interrupts off) and that `phys`/`len` match a
    /// previous allocation.
    unsafe fn free_dma(&self, phys: u64, len: usize);

    /// Translates a DMA physical address into a host pointer.
    fn phys_to_virt(&self, phys: u64) -> *mut u8;

    /// Returns a monotonic microsecond timestamp.
    fn now_us(&self) -> u64;

    /// Busy-delays for at least `us` microseconds without yielding.
    fn delay_us(&self, us: u64);

    /// Delays for at least `us` microseconds, yielding to the scheduler if
    /// one exists. Embedders without a scheduler may forward to
    /// [`delay_us`](Self::delay_us).
    fn sleep_us(&self, us: u64);

    /// Pauses for `us` microseconds using the strategy `flag` allows.
    fn pause(&self, flag: SleepFlag, us: u64) {
        match flag {
            SleepFlag::CanSleep => self.sleep_us(us),
            SleepFlag::NoSleep => self.delay_us(us),
        }
    }
}
