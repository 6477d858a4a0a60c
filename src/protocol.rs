//! Protocol registry & input queues, grounded in `net.c`'s
//! `net_protocol_register`/`net_input_handler`/softirq drain.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::device::Device;
use crate::error::ProtocolError;

/// One received frame, queued between ISR-context `input` and the
/// servicing-context softirq drainer.
#[derive(Debug, Clone)]
pub struct InputEntry {
    pub device: Arc<Device>,
    pub payload: Vec<u8>,
}

pub trait ProtocolHandler: std::fmt::Debug + Send + Sync {
    fn handle(&self, entry: InputEntry);
}

struct Registration {
    ethertype: u16,
    handler: Box<dyn ProtocolHandler>,
    fifo: Mutex<VecDeque<InputEntry>>,
    fifo_depth: usize,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration").field("ethertype", &self.ethertype).finish_non_exhaustive()
    }
}

/// Append-only before `run`; duplicate ethertypes are rejected.
#[derive(Debug, Default)]
pub struct ProtocolRegistryBuilder {
    registrations: Vec<Registration>,
}

impl ProtocolRegistryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        ethertype: u16,
        handler: Box<dyn ProtocolHandler>,
        fifo_depth: usize,
    ) -> Result<(), ProtocolError> {
        if self.registrations.iter().any(|r| r.ethertype == ethertype) {
            return Err(ProtocolError::AlreadyRegistered(ethertype));
        }
        self.registrations.insert(0, Registration { ethertype, handler, fifo: Mutex::new(VecDeque::new()), fifo_depth });
        Ok(())
    }

    #[must_use]
    pub fn build(self) -> ProtocolRegistry {
        ProtocolRegistry { registrations: self.registrations }
    }
}

/// Immutable membership after `run`; FIFO contents still mutate under each
/// registration's own mutex during the running phase.
#[derive(Debug)]
pub struct ProtocolRegistry {
    registrations: Vec<Registration>,
}

impl ProtocolRegistry {
    /// ISR-context entry point: find the matching registration, enqueue,
    /// and let the caller raise SOFTIRQ. A miss is a silent drop (`Ok(())`).
    pub fn input(&self, ethertype: u16, payload: Vec<u8>, device: Arc<Device>) -> Result<bool, ProtocolError> {
        let Some(reg) = self.registrations.iter().find(|r| r.ethertype == ethertype) else {
            return Ok(false);
        };
        let mut fifo = reg.fifo.lock().unwrap();
        if fifo.len() >= reg.fifo_depth {
            return Err(ProtocolError::FifoFull(ethertype));
        }
        fifo.push_back(InputEntry { device, payload });
        Ok(true)
    }

    /// Drain every registration's FIFO on the servicing context. Handlers
    /// for distinct ethertypes never overlap because this runs serially on
    /// one thread.
    pub fn drain_all(&self) {
        for reg in &self.registrations {
            loop {
                let entry = {
                    let mut fifo = reg.fifo.lock().unwrap();
                    fifo.pop_front()
                };
                match entry {
                    Some(entry) => reg.handler.handle(entry),
                    None => break,
                }
            }
        }
    }

    #[must_use]
    pub fn pending_len(&self, ethertype: u16) -> usize {
        self.registrations
            .iter()
            .find(|r| r.ethertype == ethertype)
            .map_or(0, |r| r.fifo.lock().unwrap().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceKind, DeviceOps, DeviceRegistryBuilder};
    use crate::error::DeviceError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct NullOps;
    impl DeviceOps for NullOps {
        fn transmit(&self, _src: [u8; 6], _ethertype: u16, _payload: &[u8], _dst: [u8; 6]) -> Result<(), DeviceError> {
            Ok(())
        }
        fn poll_rx(&self) -> Option<(u16, Vec<u8>)> {
            None
        }
    }

    #[derive(Debug)]
    struct CountingHandler(Arc<AtomicUsize>);
    impl ProtocolHandler for CountingHandler {
        fn handle(&self, _entry: InputEntry) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn test_device() -> Arc<Device> {
        let mut builder = DeviceRegistryBuilder::new();
        builder.register(DeviceKind::Ethernet, 1500, [1; 6], [0xff; 6], Box::new(NullOps));
        builder.build().by_name("net0").unwrap()
    }

    #[test]
    fn input_then_drain_invokes_handler_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut builder = ProtocolRegistryBuilder::new();
        builder.register(0x0806, Box::new(CountingHandler(count.clone())), 8).unwrap();
        let registry = builder.build();

        let dev = test_device();
        assert!(registry.input(0x0806, vec![1, 2, 3], dev).unwrap());
        assert_eq!(registry.pending_len(0x0806), 1);
        registry.drain_all();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(registry.pending_len(0x0806), 0);
    }

    #[test]
    fn input_for_unregistered_ethertype_is_silent_drop() {
        let registry = ProtocolRegistryBuilder::new().build();
        let dev = test_device();
        assert!(!registry.input(0x0800, vec![], dev).unwrap());
    }

    #[test]
    fn duplicate_registration_rejected() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut builder = ProtocolRegistryBuilder::new();
        builder.register(0x0806, Box::new(CountingHandler(count.clone())), 8).unwrap();
        assert!(builder.register(0x0806, Box::new(CountingHandler(count)), 8).is_err());
    }

    #[test]
    fn fifo_full_rejects_push() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut builder = ProtocolRegistryBuilder::new();
        builder.register(0x0806, Box::new(CountingHandler(count)), 1).unwrap();
        let registry = builder.build();
        let dev = test_device();
        registry.input(0x0806, vec![1], dev.clone()).unwrap();
        assert!(matches!(registry.input(0x0806, vec![2], dev), Err(ProtocolError::FifoFull(0x0806))));
    }
}
