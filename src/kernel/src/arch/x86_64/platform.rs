//! Boot-time assembly of the x86_64 [`Platform`].
//!
//! The platform addresses are the fixed PC defaults. Firmware table
//! discovery is not done; the redirection controller is looked for at its
//! default address and the legacy pair is used when it does not answer.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;

use kestrel_common::{CoreId, IrqLine, IrqOverride};
use kestrel_hal::{ClockSource, InterruptController, MmioBus};
use log::{info, warn};
use x86_64::VirtAddr;

use super::bus::{PhysMmio, X86Ports};
use super::cpu::X86Cpu;
use super::{gdt, idt, pic};
use crate::config::{EngineConfig, LOCAL_VECTOR_BASE, SPURIOUS_VECTOR};
use crate::engine::{InterruptEngine, Platform};
use crate::hpet::Hpet;
use crate::irq::ioapic::{IoApicInfo, IoApicSet};
use crate::irq::lapic::LocalApic;
use crate::irq::legacy::LegacyPic;
use crate::services::Services;

/// Default local APIC window.
pub const LAPIC_BASE: usize = 0xFEE0_0000;
/// Default redirection controller window.
pub const IOAPIC_BASE: usize = 0xFEC0_0000;
/// Default HPET block.
pub const HPET_BASE: usize = 0xFED0_0000;
/// Global line the HPET drives in legacy replacement mode.
const TIMER_GLOBAL_LINE: u32 = 2;
/// Size of each core's monitor stack.
pub const MONITOR_STACK_SIZE: usize = 16 * 1024;
/// Local timer calibration window.
const CALIBRATION_MS: u64 = 10;

/// Loads the descriptor tables on the executing core.
pub fn init_cpu() {
    gdt::init();
    idt::init();
}

fn ioapic_present(mmio: &dyn MmioBus) -> bool {
    mmio.write_u32(IOAPIC_BASE, 1);
    let version = mmio.read_u32(IOAPIC_BASE + 0x10);
    version != 0 && version != u32::MAX
}

/// Brings up the interrupt hardware of the boot core and wires it into a
/// single-core engine. The heap must be ready and interrupts disabled.
///
/// # Panics
///
/// Panics if no HPET answers at its default address or the boot core's
/// local APIC id is not 0.
pub fn bring_up(phys_offset: VirtAddr, services: Services) -> InterruptEngine {
    let mmio: Arc<dyn MmioBus> = Arc::new(PhysMmio::new(phys_offset));

    pic::init_masked();

    let lapic = LocalApic::new(mmio.clone(), LAPIC_BASE, LOCAL_VECTOR_BASE);
    let boot_core = CoreId(lapic.id());
    lapic.enable(boot_core, SPURIOUS_VECTOR);

    let use_ioapic = ioapic_present(mmio.as_ref());
    let hpet = match Hpet::new(mmio.clone(), HPET_BASE) {
        Some(hpet) => hpet,
        None => panic!("no HPET at {:#x}", HPET_BASE),
    };
    hpet.start(use_ioapic);
    let window = hpet.frequency() * CALIBRATION_MS / 1000;
    lapic.calibrate(&hpet, window);

    let mut config = EngineConfig::new(1);
    let shared: Box<dyn InterruptController> = if use_ioapic {
        config = config.with_override(IrqOverride {
            source: IrqLine::SCHEDULER_TIMER,
            global_line: TIMER_GLOBAL_LINE,
            polarity: None,
            trigger: None,
        });
        Box::new(IoApicSet::new(
            Box::new(PhysMmio::new(phys_offset)),
            Arc::new(lapic.clone()),
            &[IoApicInfo {
                base: IOAPIC_BASE,
                line_base: 0,
            }],
        ))
    } else {
        warn!("platform: no IOAPIC, using the legacy PIC pair");
        Box::new(LegacyPic::new(Box::new(X86Ports)))
    };

    let stack = vec![0u8; MONITOR_STACK_SIZE].leak();
    let stack_top = stack.as_ptr() as usize + MONITOR_STACK_SIZE;
    config = config.with_monitor_stack(boot_core, stack_top & !0xF);
    info!("platform: boot core {} with {}", boot_core, shared.name());

    let platform = Platform {
        cpu: Arc::new(X86Cpu::new(lapic.clone(), phys_offset)),
        clock: Arc::new(hpet.clone()),
        scheduler_timer: Box::new(hpet),
        local_timer: Box::new(lapic.clone()),
        broadcast: Box::new(lapic.clone()),
        shared,
        local: Arc::new(lapic),
    };
    InterruptEngine::new(config, platform, services)
}
