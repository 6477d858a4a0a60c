//! Real Linux tap driver, grounded in
//! `platform/linux/driver/ether_tap.c`: opens `/dev/net/tun`, attaches with
//! `TUNSETIFF`, and exposes the fd non-blocking so the fabric's servicing
//! thread can poll it like any other source.
//!
//! The original drives this off a dedicated real-time signal per frame
//! readiness (`fcntl(F_SETSIG)`); the portable reimplementation folds that
//! into the same `mio::Poll` loop everything else uses, via [`TapSource`].

use std::fs::OpenOptions;
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;

use crate::device::DeviceOps;
use crate::error::DeviceError;
use crate::ethernet;

const IFF_TAP: libc::c_short = 0x0002;
const IFF_NO_PI: libc::c_short = 0x1000;
// _IOW('T', 202, int), the fixed ioctl request number for TUNSETIFF on Linux.
const TUNSETIFF: libc::c_ulong = 0x4004_54ca;

#[repr(C)]
struct IfReq {
    name: [libc::c_char; libc::IFNAMSIZ],
    flags: libc::c_short,
    _padding: [u8; 22],
}

#[derive(Debug)]
pub struct TapDevice {
    file: File,
}

impl TapDevice {
    /// Open and attach to a tap interface named `name` (created if it
    /// doesn't already exist and the process has `CAP_NET_ADMIN`).
    pub fn open(name: &str) -> std::io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).custom_flags(libc::O_NONBLOCK).open("/dev/net/tun")?;

        let mut req: IfReq = unsafe { std::mem::zeroed() };
        for (dst, src) in req.name.iter_mut().zip(name.as_bytes()) {
            *dst = *src as libc::c_char;
        }
        req.flags = IFF_TAP | IFF_NO_PI;

        // SAFETY: `file` is a valid, open fd for /dev/net/tun and `req` is a
        // properly initialized ifreq; TUNSETIFF is the standard tap attach
        // ioctl documented in linux/if_tun.h.
        let res = unsafe { libc::ioctl(file.as_raw_fd(), TUNSETIFF as _, std::ptr::addr_of_mut!(req)) };
        if res < 0 {
            return Err(std::io::Error::last_os_error());
        }

        Ok(Self { file })
    }

    #[must_use]
    pub fn raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    #[must_use]
    pub fn source(&self) -> TapSource {
        TapSource(self.raw_fd())
    }
}

impl DeviceOps for TapDevice {
    fn transmit(&self, src: [u8; 6], ethertype: u16, payload: &[u8], dst: [u8; 6]) -> Result<(), DeviceError> {
        let frame = ethernet::encode(ethernet::EthernetHeader { dst, src, ethertype }, payload);
        (&self.file).write_all(&frame).map_err(DeviceError::Io)
    }

    fn poll_rx(&self) -> Option<(u16, Vec<u8>)> {
        let mut buf = [0u8; 65536];
        let n = (&self.file).read(&mut buf).ok()?;
        let (header, payload) = ethernet::decode(&buf[..n]).ok()?;
        Some((header.ethertype, payload.to_vec()))
    }
}

/// Owned `mio::event::Source` wrapper around the tap fd, since
/// `mio::unix::SourceFd` borrows its fd and can't be stored past the
/// registration call.
#[derive(Debug)]
pub struct TapSource(RawFd);

impl mio::event::Source for TapSource {
    fn register(&mut self, registry: &mio::Registry, token: mio::Token, interests: mio::Interest) -> std::io::Result<()> {
        mio::unix::SourceFd(&self.0).register(registry, token, interests)
    }

    fn reregister(&mut self, registry: &mio::Registry, token: mio::Token, interests: mio::Interest) -> std::io::Result<()> {
        mio::unix::SourceFd(&self.0).reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &mio::Registry) -> std::io::Result<()> {
        mio::unix::SourceFd(&self.0).deregister(registry)
    }
}
