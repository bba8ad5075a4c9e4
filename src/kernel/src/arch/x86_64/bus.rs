//! Register buses: I/O ports and physical MMIO through the bootloader's
//! physical memory window.

use core::ptr;

use kestrel_hal::{MmioBus, PortBus};
use x86_64::instructions::port::Port;
use x86_64::VirtAddr;

/// The processor's I/O port space.
#[derive(Debug, Clone, Copy, Default)]
pub struct X86Ports;

impl PortBus for X86Ports {
    fn read_u8(&self, port: u16) -> u8 {
        // SAFETY: port access has no memory effects; device drivers own the
        // meaning of each port.
        unsafe { Port::<u8>::new(port).read() }
    }

    fn write_u8(&self, port: u16, value: u8) {
        // SAFETY: as above.
        unsafe { Port::<u8>::new(port).write(value) }
    }
}

/// Physical MMIO reached through the complete physical memory mapping.
#[derive(Debug, Clone, Copy)]
pub struct PhysMmio {
    offset: VirtAddr,
}

impl PhysMmio {
    /// Accessor for a physical mapping starting at `offset`.
    pub fn new(offset: VirtAddr) -> Self {
        Self { offset }
    }

    fn ptr(&self, addr: usize) -> *mut u32 {
        (self.offset + addr as u64).as_mut_ptr()
    }
}

impl MmioBus for PhysMmio {
    fn read_u32(&self, addr: usize) -> u32 {
        // SAFETY: the bootloader maps all physical memory at `offset`; the
        // callers only pass aligned device register addresses.
        unsafe { ptr::read_volatile(self.ptr(addr)) }
    }

    fn write_u32(&self, addr: usize, value: u32) {
        // SAFETY: as above.
        unsafe { ptr::write_volatile(self.ptr(addr), value) }
    }
}
