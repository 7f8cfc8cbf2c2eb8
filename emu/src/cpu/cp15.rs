//! CP15 system control coprocessor.
//!
//! Register reads and writes arrive here from the MRC/MCR handlers. The
//! generic bank covers the MMU-equipped cores; the ARM946ES overlay with
//! its TCM region registers lives in [`tcm`](super::tcm).

use logger::log;
use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::cpu::core::Arm7Cpu;

pub const COPRO_CTRL_MMU_EN: u32 = 1 << 0;
pub const COPRO_CTRL_ADDRFAULT_EN: u32 = 1 << 1;
pub const COPRO_CTRL_DCACHE_EN: u32 = 1 << 2;
pub const COPRO_CTRL_WRITEBUF_EN: u32 = 1 << 3;
pub const COPRO_CTRL_ENDIAN: u32 = 1 << 7;
pub const COPRO_CTRL_SYSTEM: u32 = 1 << 8;
pub const COPRO_CTRL_ROM: u32 = 1 << 9;
pub const COPRO_CTRL_ICACHE_EN: u32 = 1 << 12;
pub const COPRO_CTRL_INTVEC_ADJUST: u32 = 1 << 13;

/// Writable control register bits; everything else reads back as wired.
const COPRO_CTRL_MASK: u32 = COPRO_CTRL_MMU_EN
    | COPRO_CTRL_ADDRFAULT_EN
    | COPRO_CTRL_DCACHE_EN
    | COPRO_CTRL_WRITEBUF_EN
    | COPRO_CTRL_ENDIAN
    | COPRO_CTRL_SYSTEM
    | COPRO_CTRL_ROM
    | COPRO_CTRL_ICACHE_EN
    | COPRO_CTRL_INTVEC_ADJUST;

/// The translation table base must be 16 KiB aligned.
const TTB_BASE_MASK: u32 = 0xFFFF_C000;

/// Cache type reported through c0, shared by the cores this device family
/// models.
pub(crate) const CACHE_TYPE_ID: u32 = 0x0F0D_2112;

/// Field extraction for the coprocessor operand encoding: CRn in bits
/// 19..16, opcode2 in bits 7..5, CRm in bits 3..0, coprocessor number in
/// bits 11..8.
pub(crate) fn copro_creg(opcode: u32) -> u32 {
    opcode.get_bits(16..=19)
}

pub(crate) fn copro_op2(opcode: u32) -> u32 {
    opcode.get_bits(5..=7)
}

pub(crate) fn copro_op3(opcode: u32) -> u32 {
    opcode.get_bits(0..=3)
}

pub(crate) fn copro_num(opcode: u32) -> u32 {
    opcode.get_bits(8..=11)
}

/// CP15 register bank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cp15 {
    pub control: u32,
    pub ttb: u32,
    /// `ttb` masked down to the 16 KiB table alignment, the value the
    /// walker indexes from.
    pub ttb_base: u32,
    pub domain_access_control: u32,
    /// Per-domain access control, pre-shifted into bits 7..6 so it can be
    /// OR-ed straight into a fault table index.
    pub decoded_access_control: [u8; 16],
    /// Fault status, data at 0 and prefetch at 1.
    pub fault_status: [u32; 2],
    pub fault_address: u32,
    pub fcse_pid: u32,
    /// Remap distance derived from the PID: 32 MiB per process slot.
    pub pid_offset: u32,
    pub copro_id: u32,
}

impl Default for Cp15 {
    fn default() -> Self {
        Self {
            control: 0,
            ttb: 0,
            ttb_base: 0,
            domain_access_control: 0,
            decoded_access_control: [0; 16],
            fault_status: [0; 2],
            fault_address: 0,
            fcse_pid: 0,
            pid_offset: 0,
            copro_id: 0,
        }
    }
}

impl Cp15 {
    pub fn mmu_enabled(&self) -> bool {
        self.control & COPRO_CTRL_MMU_EN != 0
    }
}

impl Arm7Cpu {
    pub(crate) fn cp15_read(&mut self, opcode: u32) -> u32 {
        if self.tcm.is_some() {
            return self.cp15_read_946(opcode);
        }

        let creg = copro_creg(opcode);
        let op2 = copro_op2(opcode);
        let op3 = copro_op3(opcode);

        match creg {
            0 => match op2 {
                // Main ID
                0 => self.cp15.copro_id,
                // Cache type
                1 => CACHE_TYPE_ID,
                // TCM, TLB and MPU type: none present
                2..=4 => 0,
                _ => 0,
            },
            // Control: bits 4-6 always read back as 1
            1 => self.cp15.control | 0x70,
            2 => self.cp15.ttb,
            3 => self.cp15.domain_access_control,
            5 => match op3 {
                0 => self.cp15.fault_status[0],
                1 => self.cp15.fault_status[1],
                _ => 0,
            },
            6 => self.cp15.fault_address,
            13 => self.cp15.fcse_pid,
            14 => {
                log("cp15: read from breakpoint register");
                0
            }
            15 => {
                log("cp15: read from test/clock/idle register");
                0
            }
            _ => {
                log(format!("cp15: read from reserved register c{creg}"));
                0
            }
        }
    }

    pub(crate) fn cp15_write(&mut self, opcode: u32, data: u32) {
        if self.tcm.is_some() {
            self.cp15_write_946(opcode, data);
            return;
        }

        let creg = copro_creg(opcode);
        let op3 = copro_op3(opcode);

        match creg {
            1 => {
                let old_enable = self.cp15.control & COPRO_CTRL_MMU_EN;
                self.cp15.control = data & COPRO_CTRL_MASK;
                if (self.cp15.control & COPRO_CTRL_MMU_EN) != old_enable {
                    self.mode_changed = true;
                }
                // S and R feed the permission function, so the decision
                // table is stale now.
                self.update_fault_table();
            }
            2 => {
                self.cp15.ttb = data;
                self.cp15.ttb_base = data & TTB_BASE_MASK;
            }
            3 => {
                self.cp15.domain_access_control = data;
                for i in (0..32).step_by(2) {
                    self.cp15.decoded_access_control[i >> 1] = (((data >> i) & 3) << 6) as u8;
                }
            }
            5 => match op3 {
                0 => self.cp15.fault_status[0] = data,
                1 => self.cp15.fault_status[1] = data,
                _ => log(format!("cp15: write to unknown fault status slot {op3}")),
            },
            6 => self.cp15.fault_address = data,
            7 => {
                // Cache operations: this core has no cache state to flush.
            }
            8 => {
                // TLB operations: translations are never cached, nothing
                // to invalidate.
            }
            9 => log(format!("cp15: read buffer operation {data:#010X} ignored")),
            13 => {
                self.cp15.fcse_pid = data;
                self.cp15.pid_offset = ((data >> 25) & 0x7F) * 0x0200_0000;
            }
            14 => log(format!("cp15: write to breakpoint register {data:#010X}")),
            15 => log(format!("cp15: write to test/clock/idle register {data:#010X}")),
            _ => log(format!("cp15: write to reserved register c{creg} = {data:#010X}")),
        }
    }

    /// XScale CP14: c1 exposes the free-running clock counter. Writes are
    /// accepted and dropped.
    pub(crate) fn cp14_read(&mut self, opcode: u32) -> u32 {
        match copro_creg(opcode) {
            1 => self.total_cycles() as u32,
            _ => 0,
        }
    }

    pub(crate) fn cp14_write(&mut self, opcode: u32, data: u32) {
        log(format!(
            "cp14: write {data:#010X} to register c{}",
            copro_creg(opcode)
        ));
    }
}
