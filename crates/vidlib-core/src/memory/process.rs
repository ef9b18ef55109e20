//! # Live Process Memory
//!
//! Reads another process (or this one) on Linux using `process_vm_readv`.
//! Unlike dereferencing a raw pointer, a bad address comes back as `EFAULT`
//! and is reported as [`VidlibError::MemoryRead`] instead of crashing.
//!
//! Mappings come from `/proc/<pid>/maps`; they are used to locate the main
//! module base and to answer readability checks.
//!
//! ## Platform Support
//!
//! - **Linux**: supported
//! - **Other platforms**: [`ProcessMemory::attach`] returns `InvalidArgument`

use std::fs;

use tracing::debug;

use super::{read_error, PointerWidth, ReadMemory};
use crate::error::{Result, VidlibError};
use crate::types::{Address, MemoryRegion};

/// Memory of a running process
#[derive(Debug, Clone)]
pub struct ProcessMemory
{
    pid: u32,
    width: PointerWidth,
}

impl ProcessMemory
{
    /// Read the memory of process `pid`.
    ///
    /// ## Errors
    ///
    /// - `InvalidArgument`: unsupported platform, or the process does not exist
    pub fn attach(pid: u32, width: PointerWidth) -> Result<Self>
    {
        if !cfg!(target_os = "linux") {
            return Err(VidlibError::InvalidArgument(
                "live process memory is only supported on Linux".to_string(),
            ));
        }
        if fs::metadata(format!("/proc/{pid}")).is_err() {
            return Err(VidlibError::InvalidArgument(format!("process {pid} not found")));
        }
        debug!(pid, ?width, "Attached process memory reader");
        Ok(Self { pid, width })
    }

    /// Read the memory of the current process.
    pub fn current() -> Result<Self>
    {
        Self::attach(std::process::id(), PointerWidth::native())
    }

    /// Process id being read.
    pub fn pid(&self) -> u32
    {
        self.pid
    }

    /// Current mappings of the process.
    ///
    /// ## Errors
    ///
    /// `Io` if `/proc/<pid>/maps` cannot be read.
    pub fn regions(&self) -> Result<Vec<MemoryRegion>>
    {
        let maps = fs::read_to_string(format!("/proc/{}/maps", self.pid))?;
        Ok(maps.lines().filter_map(MemoryRegion::parse_maps_line).collect())
    }

    /// Lowest mapped address of the module whose file name is `module_name`.
    ///
    /// This is the base address a symbol database's offsets are relative to.
    ///
    /// ## Errors
    ///
    /// `Io` if the mappings cannot be read.
    pub fn module_base(&self, module_name: &str) -> Result<Option<Address>>
    {
        let base = self
            .regions()?
            .into_iter()
            .filter(|region| region.file_name() == Some(module_name))
            .map(|region| region.start)
            .min();
        Ok(base)
    }

    #[cfg(target_os = "linux")]
    #[allow(unsafe_code)]
    fn read_remote(&self, address: Address, buf: &mut [u8]) -> Result<()>
    {
        let Ok(remote_base) = usize::try_from(address.value()) else {
            return Err(read_error(address, "address exceeds the native pointer width"));
        };
        let local = libc::iovec {
            iov_base: buf.as_mut_ptr().cast(),
            iov_len: buf.len(),
        };
        let remote = libc::iovec {
            iov_base: remote_base as *mut libc::c_void,
            iov_len: buf.len(),
        };
        let pid = libc::pid_t::try_from(self.pid).map_err(|_| read_error(address, "pid out of range"))?;

        // SAFETY: `local` describes `buf`, which is valid for writes of `buf.len()` bytes for
        // the duration of the call. The remote iovec is only interpreted by the kernel in the
        // address space of `pid`; invalid remote ranges are reported through `errno`.
        let read = unsafe { libc::process_vm_readv(pid, &local, 1, &remote, 1, 0) };
        if read < 0 {
            return Err(read_error(address, std::io::Error::last_os_error().to_string()));
        }
        if usize::try_from(read).ok() != Some(buf.len()) {
            return Err(read_error(address, format!("short read ({read} of {} bytes)", buf.len())));
        }
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    fn read_remote(&self, address: Address, _buf: &mut [u8]) -> Result<()>
    {
        Err(read_error(address, "live process memory is only supported on Linux"))
    }
}

impl ReadMemory for ProcessMemory
{
    fn read_into(&self, address: Address, buf: &mut [u8]) -> Result<()>
    {
        if buf.is_empty() {
            return Ok(());
        }
        self.read_remote(address, buf)
    }

    fn pointer_width(&self) -> PointerWidth
    {
        self.width
    }

    fn is_readable(&self, address: Address, len: usize) -> bool
    {
        if address.is_null() {
            return false;
        }
        match self.regions() {
            Ok(regions) => MemoryRegion::covers(&regions, address, len as u64),
            Err(e) => {
                debug!(pid = self.pid, error = %e, "Failed to read process mappings");
                false
            }
        }
    }
}
