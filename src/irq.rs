//! Interrupt fabric: one servicing context, grounded in
//! `platform/linux/intr.c` but reimplemented portably per the original's own
//! design notes — a single `mio::Poll` loop unifies device-fd readiness,
//! software-raised signals (via a shared `mio::Waker`), and the periodic
//! tick (a poll timeout stands in for the 1 ms `SIGALRM`).
//!
//! The two-phase builder/`RunningFabric` split mirrors the resilient
//! reactor thread pattern: registrations happen on a pre-run builder that
//! already holds the waker, so handler closures can capture a way to raise
//! further signals before the servicing thread exists.

use std::collections::VecDeque;
use std::sync::{Arc, Barrier, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use mio::{Events, Poll, Token, Waker};

use crate::device::Device;
use crate::error::FabricError;
use crate::event::EventBus;
use crate::protocol::ProtocolRegistry;
use crate::timer::TimerService;

/// Reserved signals, always part of the fabric's sensitivity mask.
pub const IRQ_TERMINATE: u32 = 0;
pub const IRQ_SOFTIRQ: u32 = 1;
pub const IRQ_EVENT: u32 = 2;
pub const IRQ_TIMER_TICK: u32 = 3;
/// Drivers must register their own IRQs at or above this number.
pub const IRQ_BASE: u32 = 4;

const WAKER_TOKEN: Token = Token(usize::MAX);

/// A handle any context can use to deliver a signal to the servicing
/// thread. Cloned into handler closures at registration time, before the
/// servicing thread exists.
#[derive(Clone)]
pub struct IrqRaiser {
    pending: Arc<Mutex<VecDeque<u32>>>,
    waker: Arc<Waker>,
}

impl IrqRaiser {
    pub fn raise_irq(&self, irq: u32) {
        self.pending.lock().unwrap().push_back(irq);
        // A failed wake means the servicing thread's poll is already
        // about to return (waker registration is edge-triggered but
        // coalescing-safe) or the thread has exited; either way, dropping
        // the raise is correct shutdown behavior, not lost work.
        let _ = self.waker.wake();
    }
}

struct IrqRegistration {
    irq: u32,
    #[allow(dead_code)]
    name: String,
    shared: bool,
    handler: Box<dyn Fn() + Send>,
}

/// Pre-run builder. Accepts IRQ, device, and (for the owned
/// protocol/timer/event registries) higher-level registrations; `run`
/// consumes it and returns a [`RunningFabric`].
pub struct Fabric {
    poll: Poll,
    waker: Arc<Waker>,
    pending: Arc<Mutex<VecDeque<u32>>>,
    registrations: Vec<IrqRegistration>,
    kept_alive_sources: Vec<Box<dyn mio::event::Source + Send>>,
    protocols: Arc<ProtocolRegistry>,
    timers: Arc<TimerService>,
    events: Arc<EventBus>,
    tick_interval: Duration,
}

impl Fabric {
    pub fn new(
        protocols: Arc<ProtocolRegistry>,
        timers: Arc<TimerService>,
        events: Arc<EventBus>,
        tick_interval: Duration,
    ) -> Result<Self, FabricError> {
        let poll = Poll::new().map_err(FabricError::Poll)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN).map_err(FabricError::Poll)?);
        Ok(Self {
            poll,
            waker,
            pending: Arc::new(Mutex::new(VecDeque::new())),
            registrations: Vec::new(),
            kept_alive_sources: Vec::new(),
            protocols,
            timers,
            events,
            tick_interval,
        })
    }

    /// A raiser usable by registration closures built before the servicing
    /// thread exists.
    #[must_use]
    pub fn raiser(&self) -> IrqRaiser {
        IrqRaiser { pending: self.pending.clone(), waker: self.waker.clone() }
    }

    /// Register a handler on `irq`. Duplicate IRQ numbers are only allowed
    /// when both the existing and the new registration declare `shared`.
    pub fn irq(&mut self, irq: u32, name: &str, shared: bool, handler: Box<dyn Fn() + Send>) -> Result<(), FabricError> {
        if irq < IRQ_BASE {
            return Err(FabricError::ReservedIrq(irq));
        }
        let conflict = self.registrations.iter().any(|r| r.irq == irq && !(r.shared && shared));
        if conflict {
            return Err(FabricError::IrqConflict { irq });
        }
        self.registrations.push(IrqRegistration { irq, name: name.to_string(), shared, handler });
        Ok(())
    }

    /// Register a raw, non-device pollable source (e.g. a signal fd) with
    /// a handler that runs whenever it becomes readable.
    pub fn register_source(
        &mut self,
        irq: u32,
        name: &str,
        mut source: Box<dyn mio::event::Source + Send>,
        handler: Box<dyn Fn() + Send>,
    ) -> Result<(), FabricError> {
        self.poll
            .registry()
            .register(source.as_mut(), Token(irq as usize), mio::Interest::READABLE)
            .map_err(FabricError::Poll)?;
        self.kept_alive_sources.push(source);
        self.irq(irq, name, false, handler)
    }

    /// Register a device. If it exposes a real pollable source (the Linux
    /// tap driver), that source is registered with `Poll`; a source-less
    /// device (the in-memory pair driver) relies on an external
    /// `raise_irq` after data is injected. Either way, the handler drains
    /// every available frame into the protocol registry, then raises
    /// SOFTIRQ — matching the level-triggered contract: all currently
    /// available frames are pumped before the handler returns.
    pub fn register_device(
        &mut self,
        irq: u32,
        name: &str,
        device: Arc<Device>,
        source: Option<Box<dyn mio::event::Source + Send>>,
    ) -> Result<(), FabricError> {
        let protocols = self.protocols.clone();
        let raiser = self.raiser();
        let handler: Box<dyn Fn() + Send> = Box::new(move || {
            while let Some((ethertype, payload)) = device.ops.poll_rx() {
                match protocols.input(ethertype, payload, device.clone()) {
                    Ok(true) => raiser.raise_irq(IRQ_SOFTIRQ),
                    Ok(false) => {}
                    Err(err) => tracing::warn!(%err, device = %device.name, "dropping ingress frame"),
                }
            }
        });

        match source {
            Some(source) => self.register_source(irq, name, source, handler),
            None => self.irq(irq, name, false, handler),
        }
    }

    /// Spawn the servicing thread and block until it is armed.
    pub fn run(self) -> Result<RunningFabric, FabricError> {
        let barrier = Arc::new(Barrier::new(2));
        let thread_barrier = barrier.clone();

        let mut poll = self.poll;
        let pending = self.pending.clone();
        let waker = self.waker.clone();
        let tick_interval = self.tick_interval;
        let protocols = self.protocols;
        let timers = self.timers;
        let events = self.events;
        let registrations = self.registrations;
        let kept_alive_sources = self.kept_alive_sources;

        let handle = std::thread::Builder::new()
            .name("tapstack-servicing".to_string())
            .spawn(move || {
                let _kept_alive_sources = kept_alive_sources;
                let mut mio_events = Events::with_capacity(64);
                thread_barrier.wait();

                'servicing: loop {
                    if let Err(err) = poll.poll(&mut mio_events, Some(tick_interval)) {
                        if err.kind() == std::io::ErrorKind::Interrupted {
                            continue;
                        }
                        tracing::warn!(%err, "poll failed");
                        continue;
                    }

                    if mio_events.is_empty() {
                        timers.on_tick(Instant::now());
                        continue;
                    }

                    for event in &mio_events {
                        if event.token() == WAKER_TOKEN {
                            loop {
                                let signal = pending.lock().unwrap().pop_front();
                                let Some(signal) = signal else { break };
                                match signal {
                                    IRQ_TERMINATE => break 'servicing,
                                    IRQ_SOFTIRQ => protocols.drain_all(),
                                    IRQ_EVENT => events.fire_all(),
                                    other => dispatch(&registrations, other),
                                }
                            }
                        } else {
                            dispatch(&registrations, event.token().0 as u32);
                        }
                    }
                }

                tracing::debug!("servicing thread exiting");
            })
            .map_err(FabricError::SpawnFailed)?;

        barrier.wait();
        Ok(RunningFabric { raiser: IrqRaiser { pending, waker }, join: Mutex::new(Some(handle)) })
    }
}

/// Reverse-registration (LIFO) order, no return-value inspection — every
/// handler registered for `irq` runs.
fn dispatch(registrations: &[IrqRegistration], irq: u32) {
    for reg in registrations.iter().rev() {
        if reg.irq == irq {
            (reg.handler)();
        }
    }
}

/// A running fabric. `shutdown` signals TERMINATE and joins the servicing
/// thread; idempotent because the join handle is taken on first use.
pub struct RunningFabric {
    raiser: IrqRaiser,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl RunningFabric {
    pub fn raise_irq(&self, irq: u32) {
        self.raiser.raise_irq(irq);
    }

    #[must_use]
    pub fn raiser(&self) -> IrqRaiser {
        self.raiser.clone()
    }

    pub fn shutdown(&self) {
        self.raiser.raise_irq(IRQ_TERMINATE);
        if let Some(handle) = self.join.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RunningFabric {
    fn drop(&mut self) {
        self.shutdown();
    }
}
