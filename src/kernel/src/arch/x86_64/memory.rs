//! Page table access and the boot frame allocator.

use bootloader::bootinfo::{MemoryMap, MemoryRegionType};
use x86_64::registers::control::Cr3;
use x86_64::structures::paging::{
    FrameAllocator, OffsetPageTable, PageTable, PageTableFlags, PhysFrame, Size4KiB,
};
use x86_64::{PhysAddr, VirtAddr};

/// Returns an [`OffsetPageTable`] over the active level 4 table.
///
/// # Safety
///
/// All physical memory must be mapped at `physical_memory_offset`, and this
/// must be called once to avoid aliasing `&mut` references.
pub unsafe fn init_mapper(physical_memory_offset: VirtAddr) -> OffsetPageTable<'static> {
    // SAFETY: upheld by the caller.
    unsafe {
        let level_4_table = active_level_4_table(physical_memory_offset);
        OffsetPageTable::new(level_4_table, physical_memory_offset)
    }
}

unsafe fn active_level_4_table(physical_memory_offset: VirtAddr) -> &'static mut PageTable {
    let (level_4_table_frame, _) = Cr3::read();
    let virt = physical_memory_offset + level_4_table_frame.start_address().as_u64();
    // SAFETY: the caller guarantees the physical mapping.
    unsafe { &mut *virt.as_mut_ptr::<PageTable>() }
}

/// Returns `true` if `addr` is mapped in the active address space. Walks
/// the tables read-only so it is safe on the fatal path.
pub fn is_mapped(physical_memory_offset: VirtAddr, addr: VirtAddr) -> bool {
    let (frame, _) = Cr3::read();
    let mut table_addr = frame.start_address();
    let indices = [addr.p4_index(), addr.p3_index(), addr.p2_index(), addr.p1_index()];
    for (level, index) in indices.into_iter().enumerate() {
        let virt = physical_memory_offset + table_addr.as_u64();
        // SAFETY: page tables live in physical memory, which is mapped at
        // the offset; the table is only read.
        let table = unsafe { &*virt.as_ptr::<PageTable>() };
        let entry = &table[index];
        if !entry.flags().contains(PageTableFlags::PRESENT) {
            return false;
        }
        if level > 0 && entry.flags().contains(PageTableFlags::HUGE_PAGE) {
            return true;
        }
        table_addr = entry.addr();
    }
    true
}

/// Hands out usable frames from the bootloader's memory map.
pub struct BootInfoFrameAllocator {
    memory_map: &'static MemoryMap,
    next: usize,
}

impl BootInfoFrameAllocator {
    /// Creates an allocator over `memory_map`.
    ///
    /// # Safety
    ///
    /// Every region marked usable must really be unused.
    pub unsafe fn init(memory_map: &'static MemoryMap) -> Self {
        BootInfoFrameAllocator { memory_map, next: 0 }
    }

    fn usable_frames(&self) -> impl Iterator<Item = PhysFrame> {
        self.memory_map
            .iter()
            .filter(|r| r.region_type == MemoryRegionType::Usable)
            .map(|r| r.range.start_addr()..r.range.end_addr())
            .flat_map(|r| r.step_by(4096))
            .map(|addr| PhysFrame::containing_address(PhysAddr::new(addr)))
    }
}

// SAFETY: each usable frame is returned at most once.
unsafe impl FrameAllocator<Size4KiB> for BootInfoFrameAllocator {
    fn allocate_frame(&mut self) -> Option<PhysFrame> {
        let frame = self.usable_frames().nth(self.next);
        self.next += 1;
        frame
    }
}
