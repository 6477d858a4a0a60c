//! A back-to-back pair of in-memory devices. Supplements the original's
//! tap-only driver layer for portability: tests and examples exercise the
//! full ingress/egress pipeline without `/dev/net/tun` or root.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::device::DeviceOps;
use crate::error::DeviceError;

#[derive(Debug, Default)]
pub struct PairDevice {
    rx: Mutex<VecDeque<(u16, Vec<u8>)>>,
    peer: Mutex<Option<Arc<PairDevice>>>,
}

impl PairDevice {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Connect two ends: frames transmitted on one arrive on the other's
    /// `poll_rx`.
    pub fn link(a: &Arc<PairDevice>, b: &Arc<PairDevice>) {
        *a.peer.lock().unwrap() = Some(b.clone());
        *b.peer.lock().unwrap() = Some(a.clone());
    }

    /// Synthesize ingress directly, bypassing any linked peer — used to
    /// drive unit tests that only need one end of the pair.
    pub fn inject(&self, ethertype: u16, payload: Vec<u8>) {
        self.rx.lock().unwrap().push_back((ethertype, payload));
    }
}

/// Peer linking requires shared ownership, so `DeviceOps` is implemented
/// on the `Arc` handle rather than the bare struct — a device registration
/// boxes this same `Arc`, keeping both ends of the pair alive and linked.
impl DeviceOps for Arc<PairDevice> {
    fn transmit(&self, _src: [u8; 6], ethertype: u16, payload: &[u8], _dst: [u8; 6]) -> Result<(), DeviceError> {
        if let Some(peer) = self.peer.lock().unwrap().as_ref() {
            peer.rx.lock().unwrap().push_back((ethertype, payload.to_vec()));
        }
        Ok(())
    }

    fn poll_rx(&self) -> Option<(u16, Vec<u8>)> {
        self.rx.lock().unwrap().pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linked_pair_delivers_frames() {
        let a = PairDevice::new();
        let b = PairDevice::new();
        PairDevice::link(&a, &b);

        a.transmit([0; 6], 0x0800, &[1, 2, 3], [0xff; 6]).unwrap();
        assert_eq!(b.poll_rx(), Some((0x0800, vec![1, 2, 3])));
        assert_eq!(b.poll_rx(), None);
    }

    #[test]
    fn unlinked_transmit_is_dropped_silently() {
        let a = PairDevice::new();
        a.transmit([0; 6], 0x0800, &[1], [0xff; 6]).unwrap();
        assert_eq!(a.poll_rx(), None);
    }
}
