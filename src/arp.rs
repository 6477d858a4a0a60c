//! ARP resolver & cache, grounded 1:1 in `arp.c`: a bounded 32-slot table
//! with FREE/INCOMPLETE/RESOLVED/STATIC states, request/reply emission, and
//! RFC-826 merge-flag input handling.

use std::sync::Mutex;
use std::time::Instant;

use crate::config::ArpRetryPolicy;
use crate::device::{AddressFamily, Device, DeviceKind, DeviceRegistry, Interface};
use crate::error::{ArpError, DeviceError};

pub const CACHE_SIZE: usize = 32;
const HARDWARE_TYPE_ETHERNET: u16 = 1;
const PROTOCOL_TYPE_IPV4: u16 = 0x0800;
const OPCODE_REQUEST: u16 = 1;
const OPCODE_REPLY: u16 = 2;
pub const ETHERTYPE_ARP: u16 = 0x0806;
pub const WIRE_LEN: usize = 28;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpState {
    Free,
    Incomplete,
    Resolved,
    Static,
}

#[derive(Debug, Clone, Copy)]
struct ArpSlot {
    state: ArpState,
    pa: [u8; 4],
    ha: [u8; 6],
    timestamp: Instant,
    attempts: u32,
}

impl ArpSlot {
    fn free(now: Instant) -> Self {
        Self { state: ArpState::Free, pa: [0; 4], ha: [0; 6], timestamp: now, attempts: 0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Found([u8; 6]),
    Incomplete,
    Error,
}

#[derive(Debug, Clone, Copy)]
pub struct ArpPacket {
    pub opcode: u16,
    pub sha: [u8; 6],
    pub spa: [u8; 4],
    pub tha: [u8; 6],
    pub tpa: [u8; 4],
}

impl ArpPacket {
    #[must_use]
    pub fn encode(&self) -> [u8; WIRE_LEN] {
        let mut out = [0u8; WIRE_LEN];
        out[0..2].copy_from_slice(&HARDWARE_TYPE_ETHERNET.to_be_bytes());
        out[2..4].copy_from_slice(&PROTOCOL_TYPE_IPV4.to_be_bytes());
        out[4] = 6;
        out[5] = 4;
        out[6..8].copy_from_slice(&self.opcode.to_be_bytes());
        out[8..14].copy_from_slice(&self.sha);
        out[14..18].copy_from_slice(&self.spa);
        out[18..24].copy_from_slice(&self.tha);
        out[24..28].copy_from_slice(&self.tpa);
        out
    }

    pub fn decode(frame: &[u8]) -> Result<Self, ArpError> {
        if frame.len() < WIRE_LEN {
            return Err(ArpError::InvalidFrame(frame.len()));
        }
        let hardware_type = u16::from_be_bytes([frame[0], frame[1]]);
        let protocol_type = u16::from_be_bytes([frame[2], frame[3]]);
        let hlen = frame[4];
        let plen = frame[5];
        if hardware_type != HARDWARE_TYPE_ETHERNET || protocol_type != PROTOCOL_TYPE_IPV4 || hlen != 6 || plen != 4 {
            return Err(ArpError::UnsupportedAddressFamily);
        }
        let opcode = u16::from_be_bytes([frame[6], frame[7]]);
        let mut sha = [0u8; 6];
        sha.copy_from_slice(&frame[8..14]);
        let mut spa = [0u8; 4];
        spa.copy_from_slice(&frame[14..18]);
        let mut tha = [0u8; 6];
        tha.copy_from_slice(&frame[18..24]);
        let mut tpa = [0u8; 4];
        tpa.copy_from_slice(&frame[24..28]);
        Ok(Self { opcode, sha, spa, tha, tpa })
    }
}

#[derive(Debug)]
struct Table {
    slots: [ArpSlot; CACHE_SIZE],
    /// Device each INCOMPLETE slot should re-request on, for the retry sweep.
    incomplete_dev: [Option<String>; CACHE_SIZE],
}

/// Fixed 32-slot address-resolution table, guarded by one mutex.
#[derive(Debug)]
pub struct ArpTable {
    table: Mutex<Table>,
}

impl Default for ArpTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ArpTable {
    #[must_use]
    pub fn new() -> Self {
        let now = Instant::now();
        Self { table: Mutex::new(Table { slots: [ArpSlot::free(now); CACHE_SIZE], incomplete_dev: std::array::from_fn(|_| None) }) }
    }

    /// Linear scan for a non-FREE entry with the given protocol address.
    fn select(table: &Table, pa: [u8; 4]) -> Option<usize> {
        table.slots.iter().position(|s| s.state != ArpState::Free && s.pa == pa)
    }

    /// First FREE slot, else evict the oldest non-STATIC entry.
    fn alloc(table: &mut Table, now: Instant) -> usize {
        if let Some(idx) = table.slots.iter().position(|s| s.state == ArpState::Free) {
            return idx;
        }
        let idx = table
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.state != ArpState::Static)
            .min_by_key(|(_, s)| s.timestamp)
            .map(|(idx, _)| idx)
            .expect("cache has no evictable slot: all 32 entries are STATIC");
        table.slots[idx] = ArpSlot::free(now);
        table.incomplete_dev[idx] = None;
        idx
    }

    /// Overwrite hardware address of an existing entry; `false` on miss.
    ///
    /// A `Static` slot is reported as merged but left untouched — it's
    /// pinned and exempt from every transition except the administrative
    /// `clear_static`, so incoming traffic must neither overwrite it nor
    /// fall through to `insert` and create a duplicate `pa`.
    fn update(table: &mut Table, pa: [u8; 4], ha: [u8; 6], now: Instant) -> bool {
        match Self::select(table, pa) {
            Some(idx) if table.slots[idx].state == ArpState::Static => true,
            Some(idx) => {
                table.slots[idx].ha = ha;
                table.slots[idx].state = ArpState::Resolved;
                table.slots[idx].timestamp = now;
                true
            }
            None => false,
        }
    }

    fn insert(table: &mut Table, pa: [u8; 4], ha: [u8; 6], now: Instant) {
        let idx = Self::alloc(table, now);
        table.slots[idx] = ArpSlot { state: ArpState::Resolved, pa, ha, timestamp: now, attempts: 0 };
        table.incomplete_dev[idx] = None;
    }

    /// Administrative path: a STATIC entry is exempt from eviction/expiry
    /// and never transitions except back to FREE on shutdown.
    pub fn insert_static(&self, pa: [u8; 4], ha: [u8; 6]) {
        let now = Instant::now();
        let mut table = self.table.lock().unwrap();
        let idx = Self::alloc(&mut table, now);
        table.slots[idx] = ArpSlot { state: ArpState::Static, pa, ha, timestamp: now, attempts: 0 };
        table.incomplete_dev[idx] = None;
    }

    /// Drop every STATIC entry back to FREE; called on shutdown.
    pub fn clear_static(&self) {
        let now = Instant::now();
        let mut table = self.table.lock().unwrap();
        for idx in 0..CACHE_SIZE {
            if table.slots[idx].state == ArpState::Static {
                table.slots[idx] = ArpSlot::free(now);
            }
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<([u8; 4], [u8; 6], ArpState)> {
        self.table
            .lock()
            .unwrap()
            .slots
            .iter()
            .filter(|s| s.state != ArpState::Free)
            .map(|s| (s.pa, s.ha, s.state))
            .collect()
    }

    pub fn request(&self, device: &Device, iface: &Interface, target_pa: [u8; 4]) -> Result<(), DeviceError> {
        let packet = ArpPacket { opcode: OPCODE_REQUEST, sha: device.hwaddr, spa: iface.unicast, tha: [0; 6], tpa: target_pa };
        device.output(ETHERTYPE_ARP, &packet.encode(), device.broadcast)
    }

    fn reply(&self, device: &Device, iface: &Interface, requester: &ArpPacket) -> Result<(), DeviceError> {
        let packet = ArpPacket { opcode: OPCODE_REPLY, sha: device.hwaddr, spa: iface.unicast, tha: requester.sha, tpa: requester.spa };
        device.output(ETHERTYPE_ARP, &packet.encode(), requester.sha)
    }

    /// RFC-826 merge-flag semantics: a packet addressed to us always
    /// causes an insert; a packet not addressed to us only updates an
    /// existing entry.
    pub fn input_handler(&self, device: &Device, payload: &[u8]) -> Result<(), DeviceError> {
        let packet = match ArpPacket::decode(payload) {
            Ok(p) => p,
            Err(err) => {
                tracing::warn!(%err, device = %device.name, "malformed arp frame dropped");
                return Ok(());
            }
        };

        let now = Instant::now();
        let merged = {
            let mut table = self.table.lock().unwrap();
            Self::update(&mut table, packet.spa, packet.sha, now)
        };

        let Some(iface) = device.get_iface(AddressFamily::Ipv4) else { return Ok(()) };
        if iface.unicast != packet.tpa {
            return Ok(());
        }
        if !merged {
            let mut table = self.table.lock().unwrap();
            Self::insert(&mut table, packet.spa, packet.sha, now);
        }
        if packet.opcode == OPCODE_REQUEST {
            self.reply(device, &iface, &packet)?;
        }
        Ok(())
    }

    /// Non-blocking resolution. Fails fast for non-Ethernet devices or
    /// non-IPv4 interfaces; otherwise returns the three-valued outcome.
    pub fn resolve(&self, device: &Device, pa: [u8; 4]) -> Resolution {
        if device.kind != DeviceKind::Ethernet {
            return Resolution::Error;
        }
        let Some(iface) = device.get_iface(AddressFamily::Ipv4) else {
            return Resolution::Error;
        };

        let now = Instant::now();
        enum Action {
            EmitRequest,
            Found([u8; 6]),
        }
        let action = {
            let mut table = self.table.lock().unwrap();
            match Self::select(&table, pa) {
                None => {
                    let idx = Self::alloc(&mut table, now);
                    table.slots[idx] = ArpSlot { state: ArpState::Incomplete, pa, ha: [0; 6], timestamp: now, attempts: 0 };
                    table.incomplete_dev[idx] = Some(device.name.clone());
                    Action::EmitRequest
                }
                Some(idx) if table.slots[idx].state == ArpState::Incomplete => Action::EmitRequest,
                Some(idx) => Action::Found(table.slots[idx].ha),
            }
        };

        match action {
            Action::EmitRequest => {
                let _ = self.request(device, &iface, pa);
                Resolution::Incomplete
            }
            Action::Found(ha) => Resolution::Found(ha),
        }
    }

    /// Timer-driven sweep answering the open design question on INCOMPLETE
    /// entry expiry: retransmit with backoff up to `policy.max_retries`,
    /// then free the slot so it doesn't permanently waste cache space.
    pub fn sweep_incomplete(&self, policy: &ArpRetryPolicy, registry: &DeviceRegistry, now: Instant) {
        let mut resends: Vec<(String, [u8; 4])> = Vec::new();
        {
            let mut table = self.table.lock().unwrap();
            for idx in 0..CACHE_SIZE {
                if table.slots[idx].state != ArpState::Incomplete {
                    continue;
                }
                let elapsed = now.saturating_duration_since(table.slots[idx].timestamp);
                if elapsed < policy.delay_for_attempt(table.slots[idx].attempts) {
                    continue;
                }
                if table.slots[idx].attempts >= policy.max_retries {
                    table.slots[idx] = ArpSlot::free(now);
                    table.incomplete_dev[idx] = None;
                    continue;
                }
                table.slots[idx].attempts += 1;
                table.slots[idx].timestamp = now;
                if let Some(dev_name) = &table.incomplete_dev[idx] {
                    resends.push((dev_name.clone(), table.slots[idx].pa));
                }
            }
        }
        for (dev_name, pa) in resends {
            let Some(device) = registry.by_name(&dev_name) else { continue };
            let Some(iface) = device.get_iface(AddressFamily::Ipv4) else { continue };
            let _ = self.request(&device, &iface, pa);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceKind, DeviceOps, DeviceRegistryBuilder};
    use std::sync::Mutex as StdMutex;

    #[derive(Debug, Default)]
    struct RecordingOps {
        transmitted: StdMutex<Vec<(u16, Vec<u8>, [u8; 6])>>,
    }
    impl DeviceOps for RecordingOps {
        fn transmit(&self, _src: [u8; 6], ethertype: u16, payload: &[u8], dst: [u8; 6]) -> Result<(), DeviceError> {
            self.transmitted.lock().unwrap().push((ethertype, payload.to_vec(), dst));
            Ok(())
        }
        fn poll_rx(&self) -> Option<(u16, Vec<u8>)> {
            None
        }
    }

    fn setup() -> (DeviceRegistry, std::sync::Arc<Device>) {
        let mut builder = DeviceRegistryBuilder::new();
        builder.register(DeviceKind::Ethernet, 1500, [0xaa; 6], [0xff; 6], Box::new(RecordingOps::default()));
        let registry = builder.build();
        let dev = registry.by_name("net0").unwrap();
        dev.add_iface(Interface::new_ipv4([10, 0, 0, 1], [255, 255, 255, 0])).unwrap();
        dev.open().unwrap();
        (registry, dev)
    }

    #[test]
    fn s1_input_resolves_handler_and_populates_cache() {
        let (_registry, dev) = setup();
        let table = ArpTable::new();
        let packet = ArpPacket { opcode: OPCODE_REPLY, sha: [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff], spa: [10, 0, 0, 2], tha: [0xaa; 6], tpa: [10, 0, 0, 1] };
        table.input_handler(&dev, &packet.encode()).unwrap();
        let snapshot = table.snapshot();
        assert_eq!(snapshot, vec![([10, 0, 0, 2], [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff], ArpState::Resolved)]);
    }

    #[test]
    fn s2_request_addressed_to_us_inserts_and_replies() {
        let (_registry, dev) = setup();
        let table = ArpTable::new();
        let packet = ArpPacket { opcode: OPCODE_REQUEST, sha: [0xaa; 6], spa: [10, 0, 0, 2], tha: [0; 6], tpa: [10, 0, 0, 1] };
        table.input_handler(&dev, &packet.encode()).unwrap();

        assert_eq!(table.snapshot(), vec![([10, 0, 0, 2], [0xaa; 6], ArpState::Resolved)]);
    }

    #[test]
    fn s3_resolve_on_empty_cache_is_incomplete_then_retries() {
        let (_registry, dev) = setup();
        let table = ArpTable::new();
        assert_eq!(table.resolve(&dev, [10, 0, 0, 3]), Resolution::Incomplete);
        assert_eq!(table.resolve(&dev, [10, 0, 0, 3]), Resolution::Incomplete);
        let snapshot = table.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].2, ArpState::Incomplete);
    }

    #[test]
    fn s4_eviction_picks_oldest_timestamp() {
        let (_registry, dev) = setup();
        let table = ArpTable::new();
        {
            let mut t = table.table.lock().unwrap();
            for i in 0..CACHE_SIZE {
                t.slots[i] = ArpSlot {
                    state: ArpState::Resolved,
                    pa: [0, 0, 0, i as u8],
                    ha: [i as u8; 6],
                    timestamp: Instant::now() + std::time::Duration::from_millis(i as u64),
                    attempts: 0,
                };
            }
        }
        assert_eq!(table.resolve(&dev, [0, 0, 0, 200]), Resolution::Incomplete);
        let snapshot = table.snapshot();
        assert!(snapshot.iter().any(|(pa, _, state)| *pa == [0, 0, 0, 200] && *state == ArpState::Incomplete));
        assert!(!snapshot.iter().any(|(pa, ..)| *pa == [0, 0, 0, 0]));
    }

    #[test]
    fn static_entry_survives_incoming_packet_for_same_pa() {
        let (_registry, dev) = setup();
        let table = ArpTable::new();
        table.insert_static([10, 0, 0, 2], [0x11; 6]);

        let packet = ArpPacket { opcode: OPCODE_REPLY, sha: [0x22; 6], spa: [10, 0, 0, 2], tha: [0xaa; 6], tpa: [10, 0, 0, 1] };
        table.input_handler(&dev, &packet.encode()).unwrap();

        let snapshot = table.snapshot();
        assert_eq!(snapshot, vec![([10, 0, 0, 2], [0x11; 6], ArpState::Static)]);
    }

    #[test]
    fn malformed_frame_is_dropped_without_error() {
        let (_registry, dev) = setup();
        let table = ArpTable::new();
        assert!(table.input_handler(&dev, &[0u8; 4]).is_ok());
        assert!(table.snapshot().is_empty());
    }
}
