//! Message-passing engine for Fusion-MPT class storage controllers.
//!
//! This crate implements the host side of the MPT message-passing
//! interface: the request/reply frame pool, the doorbell handshake
//! protocol, the protocol-driver callback registry, the bring-up and
//! recovery state machine, the interrupt reply drain loop, and the
//! blocking config page request engine.
//!
//! It is deliberately free of any bus, platform, or scheduler knowledge:
//! the embedder supplies a [`HostServices`] implementation covering
//! register access, DMA-capable memory, and time, and drives
//! [`Ioc::interrupt`] from its interrupt path. Protocol drivers (SCSI
//! initiator/target, LAN, management) sit on top through the
//! [`CallbackRegistry`].
//!
//! ```ignore
//! let registry = Arc::new(CallbackRegistry::new());
//! let ioc = Ioc::new(0, hw, registry.clone(), IocConfig::default());
//! ioc.bring_up(SleepFlag::CanSleep)?;
//! ```

#![no_std]

extern crate alloc;

pub mod bringup;
pub mod config;
mod doorbell;
mod drain;
pub mod error;
pub mod frame;
pub mod hw;
pub mod ioc;
pub mod msg;
pub mod registry;
pub mod regs;

pub use bringup::ResetOutcome;
pub use config::ConfigRequest;
pub use error::MptError;
pub use frame::{FramePool, FrameRef, PoolParams, ReplyRef};
pub use hw::{HostServices, SleepFlag};
pub use ioc::{Ioc, IocConfig, IocFacts, IocState, PortFacts};
pub use registry::{
    CallbackRegistry, DriverClass, EventHandler, FrameDisposition, ReplyCallback,
    ResetHandler, ResetPhase,
};
