use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;

use libc::{c_char, c_short};
use tender_common::hypercall::{DeviceKind, DeviceRecord};
use tracing::{debug, instrument, Span};

use super::Module;
use crate::error::TenderError::TapAttachFailed;
use crate::seccomp::{ArgCondition, ArgLen, CmpOp, SandboxPolicy};
use crate::{log_then_return, new_error, Result};

/// The MTU reported to the guest
pub const NET_MTU: u64 = 1500;
/// The largest frame the guest may send: the MTU plus an ethernet header
const MAX_FRAME: u64 = NET_MTU + 14;

const IFNAMSIZ: usize = 16;
const TUNSETIFF: libc::c_ulong = 0x4004_54ca;
const IFF_TAP: c_short = 0x0002;
const IFF_NO_PI: c_short = 0x1000;

// struct ifreq, as far as TUNSETIFF looks at it
#[repr(C)]
struct IfReq {
    name: [c_char; IFNAMSIZ],
    flags: c_short,
    _pad: [u8; 22],
}

/// A network device: a TAP interface, or any descriptor that carries one
/// ethernet frame per `read`/`write`.
///
/// The guest can only reach the device through `read` and `write` on its
/// descriptor, plus `ppoll` to wait for incoming frames. A `write` carries at
/// most one frame of `NET_MTU` bytes plus its ethernet header.
#[derive(Debug)]
pub struct NetModule {
    file: File,
    mac: [u8; 6],
}

impl NetModule {
    /// Attach to the existing TAP interface `ifname`
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn attach_tap(ifname: &str, mac: [u8; 6]) -> Result<Self> {
        if ifname.is_empty() || ifname.len() >= IFNAMSIZ || ifname.contains('\0') {
            log_then_return!(TapAttachFailed(
                ifname.to_string(),
                "invalid interface name".to_string()
            ));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open("/dev/net/tun")
            .map_err(|e| TapAttachFailed(ifname.to_string(), e.to_string()))?;

        let mut ifr = IfReq {
            name: [0; IFNAMSIZ],
            flags: IFF_TAP | IFF_NO_PI,
            _pad: [0; 22],
        };
        for (dst, src) in ifr.name.iter_mut().zip(ifname.bytes()) {
            *dst = src as c_char;
        }
        if unsafe { libc::ioctl(file.as_raw_fd(), TUNSETIFF as _, &mut ifr as *mut IfReq) } != 0 {
            log_then_return!(TapAttachFailed(
                ifname.to_string(),
                std::io::Error::last_os_error().to_string()
            ));
        }
        debug!("attached to tap interface {}", ifname);
        Ok(Self::new(file, mac))
    }

    /// Use an already open descriptor, which is switched to non-blocking
    /// mode
    pub fn from_fd(fd: OwnedFd, mac: [u8; 6]) -> Result<Self> {
        let raw = fd.as_raw_fd();
        let flags = unsafe { libc::fcntl(raw, libc::F_GETFL) };
        if flags < 0 || unsafe { libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(Self::new(File::from(fd), mac))
    }

    fn new(file: File, mac: [u8; 6]) -> Self {
        Self { file, mac }
    }

    /// The MAC address reported to the guest
    pub fn mac(&self) -> [u8; 6] {
        self.mac
    }

    fn fd(&self) -> u64 {
        self.file.as_raw_fd() as u64
    }
}

/// Parse a MAC address written as six colon separated hex octets
pub fn parse_mac(s: &str) -> Result<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut octets = s.split(':');
    for byte in mac.iter_mut() {
        let octet = octets
            .next()
            .filter(|o| o.len() == 2)
            .ok_or_else(|| new_error!("malformed MAC address {}", s))?;
        *byte = u8::from_str_radix(octet, 16)
            .map_err(|_| new_error!("malformed MAC address {}", s))?;
    }
    if octets.next().is_some() {
        return Err(new_error!("malformed MAC address {}", s));
    }
    Ok(mac)
}

impl Module for NetModule {
    fn name(&self) -> &'static str {
        "net"
    }

    fn setup(&mut self, policy: &mut SandboxPolicy) -> Result<()> {
        let fd = self.fd();
        policy.add_rule(libc::SYS_read, vec![ArgCondition::eq(0, fd)]);
        policy.add_rule(
            libc::SYS_write,
            vec![
                ArgCondition::eq(0, fd),
                ArgCondition::new(2, ArgLen::Qword, CmpOp::Le, MAX_FRAME),
            ],
        );
        Ok(())
    }

    fn device(&self) -> Option<DeviceRecord> {
        let mut mac = [0u8; 8];
        mac[..6].copy_from_slice(&self.mac);
        Some(DeviceRecord {
            kind: DeviceKind::Net as u32,
            hostfd: self.file.as_raw_fd(),
            mtu: NET_MTU,
            mac,
            ..Default::default()
        })
    }
}
