//! Architecture 5 extensions.
//!
//! The NV condition space (BLX immediate, PLD) executes unconditionally on
//! v5 cores, and the enhanced-DSP saturating and signed halfword multiply
//! operations live in the misc region of the normal condition space.

use logger::log;

use crate::bitwise::Bits;
use crate::cpu::alu::{saturating_add, saturating_double, saturating_sub};
use crate::cpu::arm::instructions::{SaturatingOp, SignedMultiplyOp};
use crate::cpu::core::Arm7Cpu;

impl Arm7Cpu {
    /// Decodes and executes an opcode from the NV condition space.
    pub(crate) fn execute_v5_extension(&mut self, opcode: u32) {
        if opcode.get_bits(25..=27) == 0b101 {
            // BLX immediate: switches to Thumb, the H bit supplies the
            // halfword step of the target.
            let h = u32::from(opcode.get_bit(24));
            let offset = (opcode.get_bits(0..=23).sign_extended(24) as i32) << 2;
            let pc = self.registers.program_counter();

            self.registers.set_register_at(14, pc.wrapping_add(4));

            let target = pc
                .wrapping_add(8)
                .wrapping_add(offset as u32)
                .wrapping_add(h << 1);
            let mut cpsr = self.cpsr();
            cpsr.set_state_bit(true);
            self.set_cpsr(cpsr);
            self.set_pc(target & !1);
            self.spend(2);
        } else if opcode & 0x0D70_F000 == 0x0550_F000 {
            // PLD is a prefetch hint with no architectural effect.
        } else {
            log(format!("unhandled NV-space opcode {opcode:#010X}"));
            self.undefined_trap();
        }
    }

    pub(crate) fn saturating_arithmetic(&mut self, op: SaturatingOp, rn: u32, rd: u32, rm: u32) {
        if !self.config.enhanced_dsp {
            self.undefined_trap();
            return;
        }

        let operand = self.reg(rm);
        let base = self.reg(rn);

        let (value, saturated) = match op {
            SaturatingOp::QAdd => saturating_add(operand, base),
            SaturatingOp::QSub => saturating_sub(operand, base),
            SaturatingOp::QDAdd => {
                let (doubled, sat1) = saturating_double(base);
                let (value, sat2) = saturating_add(operand, doubled);
                (value, sat1 || sat2)
            }
            SaturatingOp::QDSub => {
                let (doubled, sat1) = saturating_double(base);
                let (value, sat2) = saturating_sub(operand, doubled);
                (value, sat1 || sat2)
            }
        };

        self.set_reg(rd, value);
        if saturated {
            let mut cpsr = self.cpsr();
            cpsr.set_sticky_overflow(true);
            self.registers.set_cpsr_raw(cpsr.into());
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn signed_multiply(
        &mut self,
        op: SignedMultiplyOp,
        x: bool,
        y: bool,
        rd: u32,
        rn: u32,
        rs: u32,
        rm: u32,
    ) {
        if !self.config.enhanced_dsp {
            self.undefined_trap();
            return;
        }

        let half = |value: u32, top: bool| {
            if top {
                (value >> 16) as i16 as i32
            } else {
                value as i16 as i32
            }
        };

        match op {
            SignedMultiplyOp::Smul => {
                let product = half(self.reg(rm), x).wrapping_mul(half(self.reg(rs), y));
                self.set_reg(rd, product as u32);
            }
            SignedMultiplyOp::Smla => {
                let product = half(self.reg(rm), x).wrapping_mul(half(self.reg(rs), y));
                let (value, overflow) = product.overflowing_add(self.reg(rn) as i32);
                self.set_reg(rd, value as u32);
                if overflow {
                    let mut cpsr = self.cpsr();
                    cpsr.set_sticky_overflow(true);
                    self.registers.set_cpsr_raw(cpsr.into());
                }
                self.spend(1);
            }
            SignedMultiplyOp::Smlaw => {
                let product =
                    (i64::from(self.reg(rm) as i32) * i64::from(half(self.reg(rs), y))) >> 16;
                if x {
                    // SMULWy: no accumulate.
                    self.set_reg(rd, product as u32);
                } else {
                    let (value, overflow) = (product as i32).overflowing_add(self.reg(rn) as i32);
                    self.set_reg(rd, value as u32);
                    if overflow {
                        let mut cpsr = self.cpsr();
                        cpsr.set_sticky_overflow(true);
                        self.registers.set_cpsr_raw(cpsr.into());
                    }
                }
                self.spend(1);
            }
            SignedMultiplyOp::Smlal => {
                // Accumulates into RdHi:RdLo; rn is the low destination in
                // this encoding.
                let product = i64::from(half(self.reg(rm), x).wrapping_mul(half(self.reg(rs), y)));
                let acc = ((u64::from(self.reg(rd)) << 32) | u64::from(self.reg(rn))) as i64;
                let sum = acc.wrapping_add(product) as u64;
                self.set_reg(rn, sum as u32);
                self.set_reg(rd, (sum >> 32) as u32);
                self.spend(2);
            }
        }
        self.spend(1);
    }
}
