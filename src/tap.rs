//! TAP device access. The device path from the configuration is opened
//! read/write and non-blocking so the reactor can drive it. When the path
//! is the Linux clone device, the configured interface name is attached
//! with `TUNSETIFF`; a pre-materialized device node needs no ioctl.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use anyhow::{bail, Context, Result};

const TUNSETIFF: libc::c_ulong = 0x400454ca;
const IFF_TAP: libc::c_short = 0x0002;
const IFF_NO_PI: libc::c_short = 0x1000;
const IFNAMSIZ: usize = libc::IFNAMSIZ;

#[repr(C)]
struct IfReqFlags {
    ifr_name: [libc::c_char; IFNAMSIZ],
    ifr_flags: libc::c_short,
    _pad: [u8; 24 - std::mem::size_of::<libc::c_short>()],
}

pub struct Tap {
    file: File,
}

impl Tap {
    pub fn open(path: &Path, interface: Option<&str>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_NOCTTY)
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        if let Some(name) = interface {
            attach_interface(&file, name)
                .with_context(|| format!("failed to attach TAP interface {name}"))?;
        }
        Ok(Self { file })
    }
}

impl Read for Tap {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for Tap {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl AsRawFd for Tap {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

fn attach_interface(file: &File, name: &str) -> Result<()> {
    if name.len() >= IFNAMSIZ {
        bail!("interface name too long: {name}");
    }
    let mut ifr = IfReqFlags {
        ifr_name: [0; IFNAMSIZ],
        ifr_flags: IFF_TAP | IFF_NO_PI,
        _pad: [0; 24 - std::mem::size_of::<libc::c_short>()],
    };
    for (slot, byte) in ifr.ifr_name.iter_mut().zip(name.as_bytes()) {
        *slot = *byte as libc::c_char;
    }
    let rc = unsafe { libc::ioctl(file.as_raw_fd(), TUNSETIFF as _, &ifr) };
    if rc < 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(())
}
