//! Device registry & transmit path, grounded in `net.c`'s
//! `net_device_alloc`/`net_device_register`/`net_device_output`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::DeviceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Ethernet,
    Loopback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Ipv4,
}

/// A per-(device, address-family) binding. The IPv4 variant carries the
/// unicast address, netmask, and derived broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interface {
    pub family: AddressFamily,
    pub unicast: [u8; 4],
    pub netmask: [u8; 4],
    pub broadcast: [u8; 4],
}

impl Interface {
    #[must_use]
    pub fn new_ipv4(unicast: [u8; 4], netmask: [u8; 4]) -> Self {
        let mut broadcast = [0u8; 4];
        for i in 0..4 {
            broadcast[i] = unicast[i] | !netmask[i];
        }
        Self { family: AddressFamily::Ipv4, unicast, netmask, broadcast }
    }
}

/// Capability-set abstraction for a link-layer driver: open/close are
/// optional (default to success), transmit is mandatory.
pub trait DeviceOps: std::fmt::Debug + Send + Sync {
    fn open(&self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn close(&self) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Frame the payload and hand it to the OS/backing transport.
    fn transmit(
        &self,
        src: [u8; 6],
        ethertype: u16,
        payload: &[u8],
        dst: [u8; 6],
    ) -> Result<(), DeviceError>;

    /// Pop one already-received, already-decoded frame if available. The
    /// IRQ handler installed for this device calls this in a loop until it
    /// returns `None`, draining everything currently available before
    /// returning — the level-triggered contract from the driver interface.
    fn poll_rx(&self) -> Option<(u16, Vec<u8>)>;
}

#[derive(Debug)]
pub struct Device {
    pub name: String,
    pub kind: DeviceKind,
    pub mtu: usize,
    pub hwaddr: [u8; 6],
    pub broadcast: [u8; 6],
    up: AtomicBool,
    pub ops: Box<dyn DeviceOps>,
    ifaces: Mutex<Vec<Interface>>,
}

impl Device {
    #[must_use]
    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }

    pub fn open(&self) -> Result<(), DeviceError> {
        if self.is_up() {
            return Err(DeviceError::AlreadyUp(self.name.clone()));
        }
        self.ops.open()?;
        self.up.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn close(&self) -> Result<(), DeviceError> {
        if !self.is_up() {
            return Err(DeviceError::NotUp(self.name.clone()));
        }
        self.ops.close()?;
        self.up.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub fn output(&self, ethertype: u16, data: &[u8], dst: [u8; 6]) -> Result<(), DeviceError> {
        if !self.is_up() {
            return Err(DeviceError::NotUp(self.name.clone()));
        }
        if data.len() > self.mtu {
            return Err(DeviceError::TooLong { len: data.len(), mtu: self.mtu });
        }
        self.ops.transmit(self.hwaddr, ethertype, data, dst)
    }

    pub fn add_iface(&self, iface: Interface) -> Result<(), DeviceError> {
        let mut ifaces = self.ifaces.lock().unwrap();
        if ifaces.iter().any(|existing| existing.family == iface.family) {
            return Err(DeviceError::DuplicateInterface(self.name.clone()));
        }
        ifaces.push(iface);
        Ok(())
    }

    #[must_use]
    pub fn get_iface(&self, family: AddressFamily) -> Option<Interface> {
        self.ifaces.lock().unwrap().iter().find(|i| i.family == family).copied()
    }
}

/// Builds the device registry before `run`; append-only, prefix-insertion
/// (new devices are registered, each gets the next `net{i}` name).
#[derive(Debug, Default)]
pub struct DeviceRegistryBuilder {
    devices: Vec<Device>,
    next_index: u32,
}

impl DeviceRegistryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        kind: DeviceKind,
        mtu: usize,
        hwaddr: [u8; 6],
        broadcast: [u8; 6],
        ops: Box<dyn DeviceOps>,
    ) -> String {
        let name = format!("net{}", self.next_index);
        self.next_index += 1;
        self.devices.insert(
            0,
            Device { name: name.clone(), kind, mtu, hwaddr, broadcast, up: AtomicBool::new(false), ops, ifaces: Mutex::new(Vec::new()) },
        );
        name
    }

    #[must_use]
    pub fn build(self) -> DeviceRegistry {
        DeviceRegistry { devices: self.devices.into_iter().map(std::sync::Arc::new).collect() }
    }
}

/// Immutable after `run` — no lock required to read it.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    devices: Vec<std::sync::Arc<Device>>,
}

impl DeviceRegistry {
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<std::sync::Arc<Device>> {
        self.devices.iter().find(|d| d.name == name).cloned()
    }

    #[must_use]
    pub fn iter(&self) -> impl Iterator<Item = &std::sync::Arc<Device>> {
        self.devices.iter()
    }
}
