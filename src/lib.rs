//! Userspace packet pipeline core: interrupt fabric, device/protocol
//! registry, ARP resolver and cache, periodic timer service, all attached
//! to a link-layer device (a tap interface in production, an in-memory
//! pair in tests). ICMP/UDP/TCP, IP forwarding/fragmentation, and the tap
//! fd's OS-specific acquisition live above or beside this core as
//! collaborators, not inside it.

pub mod arp;
pub mod config;
pub mod device;
pub mod drivers;
pub mod error;
pub mod ethernet;
pub mod event;
pub mod irq;
pub mod protocol;
pub mod sched;
pub mod timer;

use std::sync::Arc;
use std::time::Instant;

use device::{Device, DeviceRegistry, DeviceRegistryBuilder};
use protocol::{InputEntry, ProtocolHandler, ProtocolRegistry, ProtocolRegistryBuilder};

pub use arp::ArpTable;
pub use config::{ArpRetryPolicy, StackConfig};
pub use error::CoreError;
pub use irq::{Fabric, RunningFabric};
pub use timer::TimerService;

#[derive(Debug)]
struct ArpProtocolHandler {
    arp: Arc<ArpTable>,
}

impl ProtocolHandler for ArpProtocolHandler {
    fn handle(&self, entry: InputEntry) {
        if let Err(err) = self.arp.input_handler(&entry.device, &entry.payload) {
            tracing::warn!(%err, "arp input handler failed");
        }
    }
}

#[derive(Debug)]
struct ArpSweepTimer {
    arp: Arc<ArpTable>,
    devices: Arc<DeviceRegistry>,
    policy: ArpRetryPolicy,
}

impl timer::TimerHandler for ArpSweepTimer {
    fn fire(&self) {
        self.arp.sweep_incomplete(&self.policy, &self.devices, Instant::now());
    }
}

/// Registries assembled before `run`. Devices and the ARP protocol handler
/// are wired up here; the fabric itself (and per-device IRQ/mio-source
/// registration, which is driver-specific) is built separately via
/// [`Stack::fabric`] so callers can attach whichever drivers they need.
#[derive(Debug)]
pub struct StackBuilder {
    devices: DeviceRegistryBuilder,
    protocols: ProtocolRegistryBuilder,
    config: StackConfig,
}

impl StackBuilder {
    #[must_use]
    pub fn new(config: StackConfig) -> Self {
        Self { devices: DeviceRegistryBuilder::new(), protocols: ProtocolRegistryBuilder::new(), config }
    }

    #[must_use]
    pub fn devices_mut(&mut self) -> &mut DeviceRegistryBuilder {
        &mut self.devices
    }

    pub fn register_protocol(
        &mut self,
        ethertype: u16,
        handler: Box<dyn ProtocolHandler>,
    ) -> Result<(), error::ProtocolError> {
        self.protocols.register(ethertype, handler, self.config.protocol_fifo_depth)
    }

    /// Freeze the registries, wire the ARP protocol handler and retry
    /// sweep, and return the assembled [`Stack`].
    pub fn build(mut self) -> Result<Stack, error::ProtocolError> {
        let arp = Arc::new(ArpTable::new());
        self.protocols.register(arp::ETHERTYPE_ARP, Box::new(ArpProtocolHandler { arp: arp.clone() }), self.config.protocol_fifo_depth)?;

        let devices = Arc::new(self.devices.build());
        let protocols = Arc::new(self.protocols.build());
        let timers = Arc::new(TimerService::new());
        let events = Arc::new(event::EventBus::new());

        timers.register(
            std::time::Duration::from_millis(100),
            Box::new(ArpSweepTimer { arp: arp.clone(), devices: devices.clone(), policy: self.config.arp_retry }),
            Instant::now(),
        );

        Ok(Stack { devices, protocols, timers, events, arp, config: self.config })
    }
}

/// The assembled, pre-run registries. Construct a [`Fabric`] from it, hang
/// per-device IRQ/source registrations off that fabric, then call `run`.
#[derive(Debug)]
pub struct Stack {
    pub devices: Arc<DeviceRegistry>,
    pub protocols: Arc<ProtocolRegistry>,
    pub timers: Arc<TimerService>,
    pub events: Arc<event::EventBus>,
    pub arp: Arc<ArpTable>,
    pub config: StackConfig,
}

impl Stack {
    pub fn fabric(&self) -> Result<Fabric, error::FabricError> {
        Fabric::new(self.protocols.clone(), self.timers.clone(), self.events.clone(), self.config.tick_interval)
    }

    #[must_use]
    pub fn device(&self, name: &str) -> Option<Arc<Device>> {
        self.devices.by_name(name)
    }
}
