//! Bring-up of the cascaded 8259 pair.
//!
//! After initialization the pair is only driven through
//! [`crate::irq::legacy::LegacyPic`], or left fully masked when the
//! redirection controllers take over.

use pic8259::ChainedPics;

/// The offset of the master chip. Lines 0..7 arrive on vectors 32..39.
pub const PIC_1_OFFSET: u8 = crate::config::DEVICE_VECTOR_BASE;

/// The offset of the slave chip. Lines 8..15 arrive on vectors 40..47.
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

/// Remaps the pair onto the device vectors and masks every input.
pub fn init_masked() {
    // SAFETY: the offsets place both chips above the exception vectors and
    // the ports are the standard ones.
    let mut pics = unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) };
    // SAFETY: runs once at boot with interrupts disabled.
    unsafe {
        pics.initialize();
        pics.write_masks(0xFF, 0xFF);
    }
}
