//! # CMSDK UART
//!
//! Polled transmit driver for the ARM CMSDK APB UART, as found at
//! `0x4000_4000` (UART0) on the MPS2 AN385 board QEMU emulates.

use crate::console::ByteSink;

/// UART0 base address on MPS2 AN385.
pub const UART0_BASE: usize = 0x4000_4000;

// Register offsets, in words
const DATA: usize = 0;
const STATE: usize = 1;
const CTRL: usize = 2;
const BAUDDIV: usize = 4;

const STATE_TX_FULL: u32 = 1 << 0;
const CTRL_TX_ENABLE: u32 = 1 << 0;

/// Baud divisor written at init. QEMU ignores the rate but wants a
/// non-zero value.
const BAUD_DIVISOR: u32 = 16;

pub struct CmsdkUart {
    regs: *mut u32,
}

// SAFETY: every access is a single volatile register read or write.
unsafe impl Send for CmsdkUart {}
unsafe impl Sync for CmsdkUart {}

impl CmsdkUart {
    /// # Safety
    ///
    /// `base` must point at a CMSDK UART register block (or memory laid out
    /// like one) that stays valid for the lifetime of the driver.
    pub const unsafe fn new(base: usize) -> Self {
        Self { regs: base as *mut u32 }
    }

    fn read(&self, reg: usize) -> u32 {
        // SAFETY: guaranteed by the contract of `new`.
        unsafe { self.regs.add(reg).read_volatile() }
    }

    fn write(&self, reg: usize, value: u32) {
        // SAFETY: guaranteed by the contract of `new`.
        unsafe { self.regs.add(reg).write_volatile(value) }
    }

    /// Set the baud divisor and enable the transmitter.
    pub fn init(&self) {
        self.write(BAUDDIV, BAUD_DIVISOR);
        self.write(CTRL, CTRL_TX_ENABLE);
    }

    pub fn write_byte(&self, byte: u8) {
        while self.read(STATE) & STATE_TX_FULL != 0 {
            core::hint::spin_loop();
        }
        self.write(DATA, byte as u32);
    }
}

impl ByteSink for CmsdkUart {
    fn write_bytes(&self, bytes: &[u8]) -> usize {
        for &byte in bytes {
            self.write_byte(byte);
        }
        bytes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_and_transmit() {
        let regs: &'static mut [u32; 5] = Box::leak(Box::new([0; 5]));
        let base = regs.as_mut_ptr();
        let uart = unsafe { CmsdkUart::new(base as usize) };

        uart.init();
        assert_eq!(unsafe { base.add(BAUDDIV).read() }, 16);
        assert_eq!(unsafe { base.add(CTRL).read() }, 1);

        assert_eq!(uart.write_bytes(b"ok"), 2);
        // Only the last byte is visible in the data register
        assert_eq!(unsafe { base.add(DATA).read() }, b'k' as u32);
    }
}
