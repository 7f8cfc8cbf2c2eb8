//! Tightly coupled memory of the ARM946ES and its derivatives.
//!
//! Two on-chip RAM windows, ITCM (32 KiB) and DTCM (16 KiB), sit in front
//! of the bus: a data access whose physical address falls inside an enabled
//! window is served from the backing array directly. Base and size come
//! from CP15 c9; the enable bits live in the 946 control register. A
//! disabled window parks its base at `0xFFFF_FFFF` so no address matches.

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};

use crate::cpu::core::Arm7Cpu;
use crate::cpu::cp15::{copro_creg, copro_op2, copro_op3, CACHE_TYPE_ID};

pub(crate) const ITCM_SIZE: usize = 0x8000;
pub(crate) const DTCM_SIZE: usize = 0x4000;

const CTRL_DTCM_ENABLE: u32 = 1 << 16;
const CTRL_ITCM_ENABLE: u32 = 1 << 18;

/// Chip ID of the ARM946E-S rev 0.
const CHIP_ID_946: u32 = 0x4105_9461;

/// TCM type: 32 KiB instruction, 16 KiB data.
const TCM_SIZE_ID: u32 = (6 << 6) | (5 << 18);

#[serde_as]
#[derive(Clone, Serialize, Deserialize)]
pub struct Tcm {
    /// The 946 keeps its own control register, separate from the MMU
    /// cores' CP15 c1.
    pub control: u32,
    pub itcm_reg: u32,
    pub dtcm_reg: u32,
    itcm_base: u32,
    itcm_end: u32,
    dtcm_base: u32,
    dtcm_end: u32,
    #[serde_as(as = "Bytes")]
    itcm: Box<[u8; ITCM_SIZE]>,
    #[serde_as(as = "Bytes")]
    dtcm: Box<[u8; DTCM_SIZE]>,
}

impl Default for Tcm {
    fn default() -> Self {
        Self {
            control: 0x78,
            itcm_reg: 0,
            dtcm_reg: 0,
            itcm_base: 0xFFFF_FFFF,
            itcm_end: 0,
            dtcm_base: 0xFFFF_FFFF,
            dtcm_end: 0,
            itcm: Box::new([0; ITCM_SIZE]),
            dtcm: Box::new([0; DTCM_SIZE]),
        }
    }
}

impl Tcm {
    pub(crate) fn refresh_dtcm(&mut self) {
        if self.control & CTRL_DTCM_ENABLE != 0 {
            self.dtcm_base = self.dtcm_reg & !0xFFF;
            let size = 512 << ((self.dtcm_reg & 0x3F) >> 1);
            self.dtcm_end = self.dtcm_base + size;
        } else {
            self.dtcm_base = 0xFFFF_FFFF;
            self.dtcm_end = 0;
        }
    }

    pub(crate) fn refresh_itcm(&mut self) {
        if self.control & CTRL_ITCM_ENABLE != 0 {
            // The instruction TCM is fixed at the bottom of the address
            // space on this core.
            self.itcm_base = 0;
            let size = 512 << ((self.itcm_reg & 0x3F) >> 1);
            self.itcm_end = self.itcm_base + size;
        } else {
            self.itcm_base = 0xFFFF_FFFF;
            self.itcm_end = 0;
        }
    }

    fn in_itcm(&self, address: u32) -> bool {
        address >= self.itcm_base && address <= self.itcm_end
    }

    fn in_dtcm(&self, address: u32) -> bool {
        address >= self.dtcm_base && address <= self.dtcm_end
    }

    fn array_read_word(data: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ])
    }

    fn array_write_word(data: &mut [u8], offset: usize, value: u32) {
        data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Word read through the overlay. `None` means the address belongs to
    /// the bus. Misaligned addresses rotate like the external path does.
    pub(crate) fn try_read_word(&self, address: u32) -> Option<u32> {
        let (data, mask): (&[u8], u32) = if self.in_itcm(address) {
            (self.itcm.as_ref(), ITCM_SIZE as u32 - 1)
        } else if self.in_dtcm(address) {
            (self.dtcm.as_ref(), DTCM_SIZE as u32 - 1)
        } else {
            return None;
        };

        let aligned = (address & !3) & mask;
        let word = Self::array_read_word(data, aligned as usize);
        let rotate = 8 * (address & 3);
        Some(word.rotate_right(rotate))
    }

    pub(crate) fn try_read_half_word(&self, address: u32) -> Option<u16> {
        let address = address & !1;
        let (data, mask): (&[u8], u32) = if self.in_itcm(address) {
            (self.itcm.as_ref(), ITCM_SIZE as u32 - 1)
        } else if self.in_dtcm(address) {
            (self.dtcm.as_ref(), DTCM_SIZE as u32 - 1)
        } else {
            return None;
        };

        let offset = (address & mask) as usize;
        Some(u16::from_le_bytes([data[offset], data[offset + 1]]))
    }

    pub(crate) fn try_read_byte(&self, address: u32) -> Option<u8> {
        if self.in_itcm(address) {
            Some(self.itcm[(address & (ITCM_SIZE as u32 - 1)) as usize])
        } else if self.in_dtcm(address) {
            Some(self.dtcm[(address & (DTCM_SIZE as u32 - 1)) as usize])
        } else {
            None
        }
    }

    /// Word write through the overlay. Returns `false` when the address
    /// belongs to the bus.
    pub(crate) fn try_write_word(&mut self, address: u32, value: u32) -> bool {
        let address = address & !3;
        if self.in_itcm(address) {
            let offset = (address & (ITCM_SIZE as u32 - 1)) as usize;
            Self::array_write_word(self.itcm.as_mut(), offset, value);
            true
        } else if self.in_dtcm(address) {
            let offset = (address & (DTCM_SIZE as u32 - 1)) as usize;
            Self::array_write_word(self.dtcm.as_mut(), offset, value);
            true
        } else {
            false
        }
    }

    pub(crate) fn try_write_half_word(&mut self, address: u32, value: u16) -> bool {
        let address = address & !1;
        if self.in_itcm(address) {
            let offset = (address & (ITCM_SIZE as u32 - 1)) as usize;
            self.itcm[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
            true
        } else if self.in_dtcm(address) {
            let offset = (address & (DTCM_SIZE as u32 - 1)) as usize;
            self.dtcm[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
            true
        } else {
            false
        }
    }

    pub(crate) fn try_write_byte(&mut self, address: u32, value: u8) -> bool {
        if self.in_itcm(address) {
            self.itcm[(address & (ITCM_SIZE as u32 - 1)) as usize] = value;
            true
        } else if self.in_dtcm(address) {
            self.dtcm[(address & (DTCM_SIZE as u32 - 1)) as usize] = value;
            true
        } else {
            false
        }
    }
}

impl Arm7Cpu {
    pub(crate) fn cp15_read_946(&mut self, opcode: u32) -> u32 {
        let tcm = self.tcm.as_ref().expect("946 register bank without TCM");
        let creg = copro_creg(opcode);
        let op2 = copro_op2(opcode);
        let op3 = copro_op3(opcode);

        match creg {
            0 => match op2 {
                0 => CHIP_ID_946,
                1 => CACHE_TYPE_ID,
                2 => TCM_SIZE_ID,
                _ => 0,
            },
            1 => tcm.control,
            9 if op3 == 1 => {
                if op2 == 0 {
                    tcm.dtcm_reg
                } else {
                    tcm.itcm_reg
                }
            }
            _ => 0,
        }
    }

    pub(crate) fn cp15_write_946(&mut self, opcode: u32, data: u32) {
        let tcm = self.tcm.as_mut().expect("946 register bank without TCM");
        let creg = copro_creg(opcode);
        let op2 = copro_op2(opcode);
        let op3 = copro_op3(opcode);

        match creg {
            1 => {
                tcm.control = data;
                tcm.refresh_dtcm();
                tcm.refresh_itcm();
            }
            // Protection unit cacheability, bufferability and region
            // registers: accepted, no modelled effect.
            2 | 3 | 5 | 6 | 7 => {}
            9 if op3 == 1 => {
                if op2 == 0 {
                    tcm.dtcm_reg = data;
                    tcm.refresh_dtcm();
                } else if op2 == 1 {
                    tcm.itcm_reg = data;
                    tcm.refresh_itcm();
                }
            }
            _ => {}
        }
    }
}
