//! End-to-end engine scenarios against the behavioral IOC simulator.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use mpt::msg::{self, MsgHeader};
use mpt::regs;
use mpt::{
    CallbackRegistry, ConfigRequest, DriverClass, FrameDisposition, FrameRef, HostServices,
    Ioc, IocConfig, IocState, MptError, ReplyRef, ResetOutcome, ResetPhase, SleepFlag,
};
use mpt_sim::{SimConfig, SimIoc};

/// One simulated adapter plus an optional interrupt service thread.
struct Rig {
    sim: Arc<SimIoc>,
    ioc: Arc<Ioc>,
    irq_stop: Option<Arc<AtomicBool>>,
    irq: Option<JoinHandle<()>>,
}

fn rig(knobs: SimConfig) -> Rig {
    let sim = SimIoc::new(knobs);
    let registry = Arc::new(CallbackRegistry::new());
    let hw: Arc<dyn HostServices> = sim.clone();
    let ioc = Ioc::new(0, hw, registry, IocConfig::default());
    Rig {
        sim,
        ioc,
        irq_stop: None,
        irq: None,
    }
}

impl Rig {
    /// Spawns a thread that services interrupts the way a wired IRQ line
    /// would.
    fn start_irq(&mut self) {
        let stop = Arc::new(AtomicBool::new(false));
        let ioc = self.ioc.clone();
        let flag = stop.clone();
        self.irq = Some(std::thread::spawn(move || {
            while !flag.load(Ordering::Acquire) {
                ioc.interrupt();
                std::thread::yield_now();
            }
        }));
        self.irq_stop = Some(stop);
    }

    fn stop_irq(&mut self) {
        if let Some(stop) = self.irq_stop.take() {
            stop.store(true, Ordering::Release);
        }
        if let Some(handle) = self.irq.take() {
            let _ = handle.join();
        }
    }

    /// Brings the adapter up with interrupt service running, then stops
    /// the service thread so the test can drive the drain loop itself.
    fn bring_up_quiesced(&mut self) -> ResetOutcome {
        self.start_irq();
        let outcome = self.ioc.bring_up(SleepFlag::CanSleep).expect("bring-up");
        self.stop_irq();
        self.ioc.interrupt();
        outcome
    }

    fn free_count(&self) -> usize {
        self.ioc.pool_ref().expect("pool").free_count()
    }
}

impl Drop for Rig {
    fn drop(&mut self) {
        self.stop_irq();
    }
}

// ---------------------------------------------------------------------------
// Bring-up / recovery
// ---------------------------------------------------------------------------

#[test]
fn cold_bring_up_from_ready_needs_no_reset() {
    let mut rig = rig(SimConfig::default());
    let outcome = rig.bring_up_quiesced();

    assert_eq!(outcome, ResetOutcome::NoReset);
    assert!(rig.ioc.is_active());
    assert_eq!(rig.ioc.ioc_state(), IocState::Operational);
    assert_eq!(rig.sim.diag_resets(), 0);

    let facts = rig.ioc.facts().expect("facts cached");
    assert_eq!(facts.global_credits, 24);
    assert_eq!(facts.request_frame_size, 128);
    assert_eq!(rig.ioc.port_facts().len(), 1);
    assert_eq!(rig.ioc.port_facts()[0].port_type, msg::PORT_TYPE_SCSI);

    // The enable reply carried the events-changed event.
    assert!(rig.ioc.recent_events().contains(&msg::EVENT_EVENT_CHANGE));
}

#[test]
fn bring_up_from_reset_state_goes_hard() {
    let mut rig = rig(SimConfig {
        initial_state: regs::IOC_STATE_RESET,
        ..SimConfig::default()
    });
    let outcome = rig.bring_up_quiesced();
    assert_eq!(outcome, ResetOutcome::HardReset);
    assert_eq!(rig.sim.diag_resets(), 1);
    assert!(rig.ioc.is_active());
}

#[test]
fn fault_state_forces_diagnostic_reset() {
    let mut rig = rig(SimConfig {
        initial_state: regs::IOC_STATE_FAULT,
        fault_code: 0x2622,
        ..SimConfig::default()
    });
    let outcome = rig.bring_up_quiesced();
    assert_eq!(outcome, ResetOutcome::HardReset);
    assert_eq!(rig.sim.diag_resets(), 1);
}

#[test]
fn wedged_doorbell_forces_diagnostic_reset() {
    let mut rig = rig(SimConfig {
        stuck_doorbell: true,
        ..SimConfig::default()
    });
    let outcome = rig.bring_up_quiesced();
    assert_eq!(outcome, ResetOutcome::HardReset);
    assert_eq!(rig.sim.diag_resets(), 1);
}

#[test]
fn peer_owned_adapter_is_left_alone() {
    let mut rig = rig(SimConfig {
        initial_state: regs::IOC_STATE_OPERATIONAL,
        who_init: regs::WHO_INIT_PCI_PEER,
        ..SimConfig::default()
    });
    rig.start_irq();
    let err = rig.ioc.bring_up(SleepFlag::CanSleep).unwrap_err();
    rig.stop_irq();

    assert_eq!(err, MptError::OwnedByPeer);
    assert!(!rig.ioc.is_active());
    assert_eq!(rig.sim.diag_resets(), 0);
    assert_eq!(rig.sim.unit_resets(), 0);
}

#[test]
fn warm_operational_adapter_gets_soft_reset() {
    let mut rig = rig(SimConfig::default());
    rig.bring_up_quiesced();

    // Second bring-up finds our own warm firmware OPERATIONAL.
    rig.start_irq();
    let outcome = rig.ioc.bring_up(SleepFlag::CanSleep).expect("re-bring-up");
    rig.stop_irq();

    assert_eq!(outcome, ResetOutcome::SoftReset);
    assert_eq!(rig.sim.diag_resets(), 0);
    assert!(rig.sim.unit_resets() >= 1);
    assert!(rig.ioc.is_active());
}

#[test]
fn transient_facts_failures_are_retried() {
    let mut rig = rig(SimConfig {
        fail_facts: 2,
        ..SimConfig::default()
    });
    rig.bring_up_quiesced();
    assert!(rig.sim.facts_requests() >= 3);
    assert!(rig.ioc.facts().is_some());
}

#[test]
fn recovery_always_goes_hard() {
    let mut rig = rig(SimConfig::default());
    rig.bring_up_quiesced();

    rig.start_irq();
    let outcome = rig
        .ioc
        .hard_reset_recover(SleepFlag::CanSleep)
        .expect("recovery");
    rig.stop_irq();

    assert_eq!(outcome, ResetOutcome::HardReset);
    assert_eq!(rig.sim.diag_resets(), 1);
    assert!(rig.ioc.is_active());
}

#[test]
fn reset_hooks_run_pre_then_post() {
    static PHASES: Mutex<Vec<ResetPhase>> = Mutex::new(Vec::new());
    fn nop_reply(_: &Ioc, _: Option<FrameRef>, _: Option<ReplyRef>) -> FrameDisposition {
        FrameDisposition::Free
    }
    fn on_reset(_: &Ioc, phase: ResetPhase) {
        PHASES.lock().unwrap().push(phase);
    }

    let mut rig = rig(SimConfig::default());
    rig.bring_up_quiesced();
    let handle = rig
        .ioc
        .register(nop_reply, DriverClass::ScsiInitiator)
        .expect("handle");
    rig.ioc.reset_register(handle, on_reset).unwrap();

    rig.start_irq();
    rig.ioc.hard_reset_recover(SleepFlag::CanSleep).unwrap();
    rig.stop_irq();

    assert_eq!(
        *PHASES.lock().unwrap(),
        [ResetPhase::PreReset, ResetPhase::PostReset]
    );
}

// ---------------------------------------------------------------------------
// Firmware image cache
// ---------------------------------------------------------------------------

#[test]
fn firmware_upload_caches_and_restages() {
    let mut rig = rig(SimConfig {
        fw_image_size: 1024,
        ..SimConfig::default()
    });
    rig.bring_up_quiesced();
    assert_eq!(rig.ioc.fw_image().map(|(_, len)| len), Some(1024));

    rig.start_irq();
    let outcome = rig.ioc.hard_reset_recover(SleepFlag::CanSleep).unwrap();
    rig.stop_irq();

    assert_eq!(outcome, ResetOutcome::HardReset);
    assert_eq!(rig.sim.restaged_words(), 256);
}

#[test]
fn short_firmware_upload_is_discarded() {
    let mut rig = rig(SimConfig {
        fw_image_size: 1024,
        fw_upload_shortfall: 4,
        ..SimConfig::default()
    });
    let outcome = rig.bring_up_quiesced();
    // A failed image cache costs the restage optimization, not bring-up.
    assert_eq!(outcome, ResetOutcome::NoReset);
    assert!(rig.ioc.fw_image().is_none());
    assert!(rig.ioc.is_active());
}

// ---------------------------------------------------------------------------
// Config page engine
// ---------------------------------------------------------------------------

#[test]
fn config_header_then_data_read() {
    let mut rig = rig(SimConfig::default());
    rig.bring_up_quiesced();
    rig.start_irq();

    let mut header_req = ConfigRequest::header_for(msg::CONFIG_PAGE_TYPE_IOC, 1, 0);
    rig.ioc
        .config(&mut header_req, SleepFlag::CanSleep)
        .expect("header fetch");
    assert_eq!(header_req.header.page_length, 4);

    let buf_len = 16usize;
    let phys = rig.sim.alloc_dma(buf_len, 4).expect("dma");
    let mut read_req = ConfigRequest {
        action: msg::CONFIG_ACTION_PAGE_READ_CURRENT,
        page_address: 0,
        header: header_req.header,
        page_buffer: phys,
        page_buffer_len: buf_len as u32,
        timeout_ms: 0,
    };
    rig.ioc
        .config(&mut read_req, SleepFlag::CanSleep)
        .expect("page read");

    let virt = rig.sim.phys_to_virt(phys);
    let page = unsafe { std::slice::from_raw_parts(virt, buf_len) };
    assert!(page.iter().all(|&b| b == 0x5A));
}

#[test]
fn config_rejected_from_interrupt_context() {
    let rig = rig(SimConfig::default());
    let mut req = ConfigRequest::header_for(msg::CONFIG_PAGE_TYPE_IOC, 1, 0);
    assert_eq!(
        rig.ioc.config(&mut req, SleepFlag::NoSleep),
        Err(MptError::FromInterruptContext)
    );
}

#[test]
fn config_rejected_before_bring_up() {
    let rig = rig(SimConfig::default());
    let mut req = ConfigRequest::header_for(msg::CONFIG_PAGE_TYPE_IOC, 1, 0);
    assert_eq!(
        rig.ioc.config(&mut req, SleepFlag::CanSleep),
        Err(MptError::NotReady)
    );
}

#[test]
fn config_timeout_triggers_recovery_and_unblocks() {
    let mut rig = rig(SimConfig::default());
    rig.bring_up_quiesced();

    // No interrupt service and no replies: the request must time out,
    // trigger recovery, and return rather than hang.
    rig.sim.set_drop_config_replies(true);
    let mut req = ConfigRequest::header_for(msg::CONFIG_PAGE_TYPE_IOC, 1, 0);
    let err = rig.ioc.config(&mut req, SleepFlag::CanSleep).unwrap_err();

    assert_eq!(err, MptError::AdapterReset);
    assert_eq!(rig.sim.diag_resets(), 1);
    assert!(rig.ioc.is_active());

    // The recovered adapter serves config traffic again.
    rig.sim.set_drop_config_replies(false);
    rig.start_irq();
    let mut req = ConfigRequest::header_for(msg::CONFIG_PAGE_TYPE_IOC, 1, 0);
    rig.ioc
        .config(&mut req, SleepFlag::CanSleep)
        .expect("config after recovery");
}

// ---------------------------------------------------------------------------
// Drain loop dispatch
// ---------------------------------------------------------------------------

#[test]
fn turbo_reply_routes_to_driver_and_frees_frame() {
    static HITS: AtomicUsize = AtomicUsize::new(0);
    static HAD_FRAME: AtomicBool = AtomicBool::new(false);
    static HAD_REPLY: AtomicBool = AtomicBool::new(false);
    fn on_reply(_: &Ioc, frame: Option<FrameRef>, reply: Option<ReplyRef>) -> FrameDisposition {
        HITS.fetch_add(1, Ordering::Relaxed);
        HAD_FRAME.store(frame.is_some(), Ordering::Relaxed);
        HAD_REPLY.store(reply.is_some(), Ordering::Relaxed);
        FrameDisposition::Free
    }

    let mut rig = rig(SimConfig::default());
    rig.bring_up_quiesced();
    let handle = rig
        .ioc
        .register(on_reply, DriverClass::ScsiInitiator)
        .expect("handle");

    let before = rig.free_count();
    let frame = rig.ioc.acquire_frame(handle).expect("frame");
    frame.write_msg(&MsgHeader {
        function: msg::FUNCTION_SCSI_IO,
        ..MsgHeader::default()
    });
    rig.ioc.submit_frame(handle, frame);

    assert_eq!(rig.ioc.interrupt(), 1);
    assert_eq!(HITS.load(Ordering::Relaxed), 1);
    assert!(HAD_FRAME.load(Ordering::Relaxed));
    assert!(!HAD_REPLY.load(Ordering::Relaxed));
    assert_eq!(rig.free_count(), before);
}

#[test]
fn lan_free_pattern_recycles_without_callback() {
    static HITS: AtomicUsize = AtomicUsize::new(0);
    fn on_reply(_: &Ioc, _: Option<FrameRef>, _: Option<ReplyRef>) -> FrameDisposition {
        HITS.fetch_add(1, Ordering::Relaxed);
        FrameDisposition::Keep
    }

    let mut rig = rig(SimConfig::default());
    rig.bring_up_quiesced();
    let handle = rig.ioc.register(on_reply, DriverClass::Lan).expect("handle");

    let before = rig.free_count();
    let frame = rig.ioc.acquire_frame(handle).expect("frame");
    rig.sim.inject_turbo(
        (regs::CONTEXT_REPLY_TYPE_LAN << regs::CONTEXT_REPLY_TYPE_SHIFT)
            | regs::CONTEXT_LAN_FREE_NO_CALLBACK
            | u32::from(frame.index()),
    );

    assert_eq!(rig.ioc.interrupt(), 1);
    assert_eq!(HITS.load(Ordering::Relaxed), 0);
    assert_eq!(rig.free_count(), before);
}

#[test]
fn turbo_reply_for_doorbell_request_has_no_frame() {
    static HITS: AtomicUsize = AtomicUsize::new(0);
    static HAD_FRAME: AtomicBool = AtomicBool::new(true);
    fn on_reply(_: &Ioc, frame: Option<FrameRef>, _: Option<ReplyRef>) -> FrameDisposition {
        HITS.fetch_add(1, Ordering::Relaxed);
        HAD_FRAME.store(frame.is_some(), Ordering::Relaxed);
        FrameDisposition::Free
    }

    let mut rig = rig(SimConfig::default());
    rig.bring_up_quiesced();
    let handle = rig
        .ioc
        .register(on_reply, DriverClass::ScsiInitiator)
        .expect("handle");

    let before = rig.free_count();
    rig.sim
        .inject_turbo(msg::make_context(handle, msg::HANDSHAKE_FRAME_INDEX));
    assert_eq!(rig.ioc.interrupt(), 1);
    assert_eq!(HITS.load(Ordering::Relaxed), 1);
    // Doorbell-framed requests have no pool frame; nothing to recycle.
    assert!(!HAD_FRAME.load(Ordering::Relaxed));
    assert_eq!(rig.free_count(), before);
}

#[test]
fn garbage_turbo_index_is_skipped() {
    let mut rig = rig(SimConfig::default());
    rig.bring_up_quiesced();
    let before = rig.free_count();
    // Context index far outside the request arena.
    rig.sim.inject_turbo(0x0000_F000);
    assert_eq!(rig.ioc.interrupt(), 1);
    assert_eq!(rig.free_count(), before);
    assert!(rig.ioc.is_active());
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[test]
fn event_dispatch_records_and_acks() {
    static LAST_EVENT: AtomicU32 = AtomicU32::new(0);
    fn nop_reply(_: &Ioc, _: Option<FrameRef>, _: Option<ReplyRef>) -> FrameDisposition {
        FrameDisposition::Free
    }
    fn on_event(_: &Ioc, event: &msg::EventNotificationReply) {
        LAST_EVENT.store(event.event, Ordering::Relaxed);
    }

    let mut rig = rig(SimConfig::default());
    rig.bring_up_quiesced();
    let handle = rig
        .ioc
        .register(nop_reply, DriverClass::ScsiInitiator)
        .expect("handle");
    rig.ioc.event_register(handle, on_event).unwrap();

    rig.sim.inject_event(msg::EVENT_RESCAN, true);
    assert!(rig.ioc.interrupt() >= 1);
    // Second pass drains the turbo ack for our EventAck request.
    rig.ioc.interrupt();

    assert_eq!(LAST_EVENT.load(Ordering::Relaxed), msg::EVENT_RESCAN);
    assert!(rig.ioc.recent_events().contains(&msg::EVENT_RESCAN));
    assert_eq!(rig.sim.event_acks(), 1);
}

// ---------------------------------------------------------------------------
// Frames through the adapter surface
// ---------------------------------------------------------------------------

#[test]
fn pool_exhaustion_surfaces_as_busy_and_recovers() {
    let mut rig = rig(SimConfig::default());
    rig.bring_up_quiesced();

    let mut frames = Vec::new();
    while let Some(frame) = rig.ioc.acquire_frame(1) {
        frames.push(frame);
    }
    assert!(!frames.is_empty());
    assert!(rig.ioc.acquire_frame(1).is_none());
    assert_eq!(rig.free_count(), 0);

    let frame = frames.pop().unwrap();
    rig.ioc.release_frame(frame);
    assert!(rig.ioc.acquire_frame(1).is_some());
}

#[test]
fn double_release_is_refused() {
    let mut rig = rig(SimConfig::default());
    rig.bring_up_quiesced();

    let frame = rig.ioc.acquire_frame(1).expect("frame");
    let before = rig.free_count();
    rig.ioc.release_frame(frame);
    assert_eq!(rig.free_count(), before + 1);
    rig.ioc.release_frame(frame);
    assert_eq!(rig.free_count(), before + 1);
}

#[test]
fn inactive_adapter_hands_out_no_frames() {
    let mut rig = rig(SimConfig::default());
    rig.bring_up_quiesced();
    rig.ioc.shutdown();
    assert!(rig.ioc.acquire_frame(1).is_none());
}

// ---------------------------------------------------------------------------
// Bound sibling adapters
// ---------------------------------------------------------------------------

/// A primary rig plus a bound sibling adapter over its own simulator.
fn bound_rig(knobs_a: SimConfig, knobs_b: SimConfig) -> (Rig, Arc<SimIoc>, Arc<Ioc>) {
    let rig = rig(knobs_a);
    let sim_b = SimIoc::new(knobs_b);
    let hw: Arc<dyn HostServices> = sim_b.clone();
    let ioc_b = Ioc::new(
        1,
        hw,
        Arc::new(CallbackRegistry::new()),
        IocConfig {
            name: String::from("ioc1"),
            ..IocConfig::default()
        },
    );
    Ioc::bind(&rig.ioc, &ioc_b);
    (rig, sim_b, ioc_b)
}

#[test]
fn bound_sibling_rides_along_on_bring_up() {
    let (mut rig, _sim_b, ioc_b) = bound_rig(SimConfig::default(), SimConfig::default());
    let outcome = rig.bring_up_quiesced();
    assert_eq!(outcome, ResetOutcome::NoReset);
    assert!(rig.ioc.is_active());

    // The sibling got its own facts, FIFO priming, and re-enable.
    assert!(ioc_b.facts().is_some());
    assert!(ioc_b.pool_ref().is_some());
    assert!(ioc_b.is_active());
}

#[test]
fn sibling_facts_failure_is_not_fatal_to_primary() {
    let (mut rig, _sim_b, ioc_b) = bound_rig(
        SimConfig::default(),
        SimConfig {
            fail_facts: u32::MAX,
            ..SimConfig::default()
        },
    );
    let outcome = rig.bring_up_quiesced();
    assert_eq!(outcome, ResetOutcome::NoReset);
    assert!(rig.ioc.is_active());
    assert!(ioc_b.facts().is_none());
    assert!(!ioc_b.is_active());
}

#[test]
fn sibling_priming_survives_primary_pool_failure() {
    // A reply queue this deep cannot fit the DMA arena, so the primary's
    // pool allocation fails; the sibling's priming must still happen.
    let (mut rig, _sim_b, ioc_b) = bound_rig(
        SimConfig {
            reply_depth: 40_000,
            ..SimConfig::default()
        },
        SimConfig::default(),
    );
    rig.start_irq();
    let err = rig.ioc.bring_up(SleepFlag::CanSleep).unwrap_err();
    rig.stop_irq();

    assert_eq!(err, MptError::FifoAllocFailed);
    assert!(rig.ioc.pool_ref().is_none());
    assert!(!rig.ioc.is_active());
    assert!(ioc_b.pool_ref().is_some());
}

// ---------------------------------------------------------------------------
// Doorbell-framed driver requests
// ---------------------------------------------------------------------------

#[test]
fn handshake_request_reply_routes_via_fifo() {
    static HITS: AtomicUsize = AtomicUsize::new(0);
    static HAD_FRAME: AtomicBool = AtomicBool::new(true);
    fn on_reply(_: &Ioc, frame: Option<FrameRef>, _: Option<ReplyRef>) -> FrameDisposition {
        HITS.fetch_add(1, Ordering::Relaxed);
        HAD_FRAME.store(frame.is_some(), Ordering::Relaxed);
        FrameDisposition::Free
    }

    let mut rig = rig(SimConfig::default());
    rig.bring_up_quiesced();
    let handle = rig
        .ioc
        .register(on_reply, DriverClass::ScsiInitiator)
        .expect("handle");

    let mut request = [0u8; 16];
    request[3] = msg::FUNCTION_SCSI_TASK_MGMT;
    rig.ioc
        .send_handshake_request(handle, &request, 5, SleepFlag::CanSleep)
        .expect("handshake request");

    assert_eq!(rig.ioc.interrupt(), 1);
    assert_eq!(HITS.load(Ordering::Relaxed), 1);
    // Doorbell-framed requests have no originating pool frame.
    assert!(!HAD_FRAME.load(Ordering::Relaxed));
}
