//! Exception delivery.
//!
//! Exceptions are latched as pending flags and serviced at the top of the
//! execute loop, before the next instruction fetch. Servicing switches to
//! the target mode, captures the return address in the new bank's R14 and
//! the old CPSR in its SPSR, masks interrupts, forces ARM state and jumps
//! to the vector.

use serde::{Deserialize, Serialize};

use crate::cpu::core::Arm7Cpu;
use crate::cpu::cpu_modes::Mode;
use crate::cpu::registers::REG_LR;

/// Architectural exception sources, ordered by vector address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    Reset,
    Undefined,
    SoftwareInterrupt,
    PrefetchAbort,
    DataAbort,
    Irq,
    Fiq,
}

impl Exception {
    pub const fn vector_offset(self) -> u32 {
        match self {
            Self::Reset => 0x00,
            Self::Undefined => 0x04,
            Self::SoftwareInterrupt => 0x08,
            Self::PrefetchAbort => 0x0C,
            Self::DataAbort => 0x10,
            Self::Irq => 0x18,
            Self::Fiq => 0x1C,
        }
    }

    pub const fn target_mode(self) -> Mode {
        match self {
            Self::Reset | Self::SoftwareInterrupt => Mode::Supervisor,
            Self::Undefined => Mode::Undefined,
            Self::PrefetchAbort | Self::DataAbort => Mode::Abort,
            Self::Irq => Mode::Irq,
            Self::Fiq => Mode::Fiq,
        }
    }
}

/// Host-visible interrupt and abort lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputLine {
    Irq,
    Fiq,
    AbortData,
    AbortPrefetch,
    Undefined,
}

/// Latched exception requests plus the aggregate fast check the execute
/// loop polls. `update` must run after every flag mutation.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct PendingExceptions {
    pub irq: bool,
    pub fiq: bool,
    pub abort_data: bool,
    pub abort_prefetch: bool,
    pub undefined: bool,
    pub swi: bool,
    pub any: bool,
}

impl PendingExceptions {
    pub fn update(&mut self) {
        self.any = self.irq
            || self.fiq
            || self.abort_data
            || self.abort_prefetch
            || self.undefined
            || self.swi;
    }
}

impl Arm7Cpu {
    /// Latches the state of an interrupt or abort line.
    pub fn set_input_line(&mut self, line: InputLine, state: bool) {
        match line {
            InputLine::Irq => self.pending.irq = state,
            InputLine::Fiq => self.pending.fiq = state,
            InputLine::AbortData => self.pending.abort_data = state,
            InputLine::AbortPrefetch => self.pending.abort_prefetch = state,
            InputLine::Undefined => self.pending.undefined = state,
        }
        self.pending.update();
    }

    /// Services the highest-priority pending exception, if any is
    /// deliverable. Data aborts outrank FIQ, FIQ outranks IRQ, then
    /// prefetch abort, undefined and SWI. Masked interrupts stay pending.
    pub(crate) fn service_pending(&mut self) {
        let cpsr = self.cpsr();

        if self.pending.abort_data {
            self.enter_exception(Exception::DataAbort);
            self.pending.abort_data = false;
        } else if self.pending.fiq && !cpsr.fiq_disable() {
            self.enter_exception(Exception::Fiq);
            self.pending.fiq = false;
        } else if self.pending.irq && !cpsr.irq_disable() {
            self.enter_exception(Exception::Irq);
            self.pending.irq = false;
        } else if self.pending.abort_prefetch {
            self.enter_exception(Exception::PrefetchAbort);
            self.pending.abort_prefetch = false;
        } else if self.pending.undefined {
            self.enter_exception(Exception::Undefined);
            self.pending.undefined = false;
        } else if self.pending.swi {
            self.enter_exception(Exception::SoftwareInterrupt);
            self.pending.swi = false;
        }

        self.pending.update();
    }

    /// Performs the architectural exception entry sequence. R15 points at
    /// the instruction that is about to execute, except for data aborts and
    /// the trapping instructions (SWI, undefined), where the faulting
    /// instruction has already advanced it.
    pub(crate) fn enter_exception(&mut self, kind: Exception) {
        let old_cpsr = self.cpsr();
        let pc = self.registers.program_counter();

        let return_address = match kind {
            // Saved as faulting PC + 8: R15 has moved past the aborted
            // instruction already.
            Exception::DataAbort => pc.wrapping_add(4),
            // Saved as faulting/preempted PC + 4.
            Exception::Fiq | Exception::Irq | Exception::PrefetchAbort => pc.wrapping_add(4),
            // R15 already points at the instruction after the trap, which
            // is exactly the return address.
            Exception::SoftwareInterrupt | Exception::Undefined => pc,
            Exception::Reset => 0,
        };

        let mut new_cpsr = old_cpsr;
        new_cpsr.set_mode(kind.target_mode());
        new_cpsr.set_irq_disable(true);
        if matches!(kind, Exception::Fiq | Exception::Reset) {
            new_cpsr.set_fiq_disable(true);
        }
        new_cpsr.set_state_bit(false);

        // Switch first so R14 and SPSR land in the target mode's bank.
        self.set_cpsr(new_cpsr);
        self.registers.set_spsr(old_cpsr);
        self.registers.set_register_at(REG_LR, return_address);

        self.registers
            .set_program_counter(self.config.vector_base + kind.vector_offset());
        self.prefetch.invalidate();
        self.spend(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::core::tests::{make_cpu, write_words};
    use crate::cpu::cp15::COPRO_CTRL_MMU_EN;
    use crate::cpu::psr::Psr;
    use pretty_assertions::assert_eq;

    /// B . (branch to self), handy as a vector landing pad.
    const HALT: u32 = 0xEAFF_FFFE;

    fn unmasked_user(cpu: &mut crate::cpu::core::Arm7Cpu) {
        let mut cpsr = Psr::from(Mode::User);
        cpu.set_cpsr(cpsr);
        cpsr.set_irq_disable(false);
        cpsr.set_fiq_disable(false);
        cpu.set_cpsr(cpsr);
        cpu.mode_changed = false;
    }

    #[test]
    fn pending_any_tracks_the_disjunction() {
        let mut cpu = make_cpu();

        cpu.set_input_line(InputLine::Irq, true);
        assert!(cpu.pending.any);

        cpu.set_input_line(InputLine::Irq, false);
        assert!(!cpu.pending.any);

        cpu.set_input_line(InputLine::Undefined, true);
        cpu.set_input_line(InputLine::AbortPrefetch, true);
        assert!(cpu.pending.any);

        cpu.service_pending();
        cpu.service_pending();
        assert!(!cpu.pending.any);
    }

    #[test]
    fn irq_entry_sequence() {
        let mut cpu = make_cpu();
        write_words(&cpu, 0x18, &[HALT]);
        write_words(&cpu, 0x100, &[0xE1A0_0000]);
        unmasked_user(&mut cpu);
        cpu.registers.set_program_counter(0x100);
        let old_cpsr = cpu.cpsr();

        cpu.set_input_line(InputLine::Irq, true);
        cpu.execute(8);

        assert_eq!(cpu.cpsr().mode(), Mode::Irq);
        assert!(cpu.cpsr().irq_disable());
        assert!(!cpu.cpsr().fiq_disable());
        assert_eq!(cpu.registers.spsr(), old_cpsr);
        assert_eq!(cpu.reg(14), 0x104);
        assert_eq!(cpu.registers.program_counter(), 0x18);
        assert!(!cpu.pending.irq);
    }

    #[test]
    fn masked_irq_stays_pending() {
        let mut cpu = make_cpu();
        write_words(&cpu, 0x100, &[0xE1A0_0000]);
        cpu.registers.set_program_counter(0x100);

        // Reset state masks IRQ with the I bit.
        cpu.set_input_line(InputLine::Irq, true);
        cpu.execute(1);

        assert_eq!(cpu.cpsr().mode(), Mode::Supervisor);
        assert!(cpu.pending.irq);
        assert_eq!(cpu.registers.program_counter(), 0x104);
    }

    #[test]
    fn fiq_outranks_irq_and_data_abort_outranks_both() {
        let mut cpu = make_cpu();
        write_words(&cpu, 0x1C, &[HALT]);
        write_words(&cpu, 0x10, &[HALT]);
        unmasked_user(&mut cpu);
        cpu.registers.set_program_counter(0x100);

        cpu.set_input_line(InputLine::Irq, true);
        cpu.set_input_line(InputLine::Fiq, true);
        cpu.service_pending();
        assert_eq!(cpu.cpsr().mode(), Mode::Fiq);
        assert!(cpu.pending.irq);

        let mut cpu = make_cpu();
        unmasked_user(&mut cpu);
        cpu.set_input_line(InputLine::Fiq, true);
        cpu.set_input_line(InputLine::AbortData, true);
        cpu.service_pending();
        assert_eq!(cpu.cpsr().mode(), Mode::Abort);
        assert!(cpu.pending.fiq);
    }

    #[test]
    fn fiq_entry_masks_fiq_too() {
        let mut cpu = make_cpu();
        unmasked_user(&mut cpu);
        cpu.registers.set_program_counter(0x100);

        cpu.set_input_line(InputLine::Fiq, true);
        cpu.service_pending();

        assert_eq!(cpu.cpsr().mode(), Mode::Fiq);
        assert!(cpu.cpsr().irq_disable());
        assert!(cpu.cpsr().fiq_disable());
        assert_eq!(cpu.reg(14), 0x104);
        assert_eq!(cpu.registers.program_counter(), 0x1C);
    }

    #[test]
    fn swi_enters_supervisor_with_the_next_pc_in_lr() {
        let mut cpu = make_cpu();
        write_words(&cpu, 0x08, &[HALT]);
        write_words(&cpu, 0x100, &[0xEF00_0000]);
        unmasked_user(&mut cpu);
        cpu.registers.set_program_counter(0x100);

        cpu.execute(8);

        assert_eq!(cpu.cpsr().mode(), Mode::Supervisor);
        assert_eq!(cpu.reg(14), 0x104);
        assert_eq!(cpu.registers.program_counter(), 0x08);
        assert!(!cpu.pending.swi);
    }

    #[test]
    fn undefined_instruction_enters_undefined_mode() {
        let mut cpu = make_cpu();
        write_words(&cpu, 0x04, &[HALT]);
        write_words(&cpu, 0x100, &[0xE7F0_00F0]);
        unmasked_user(&mut cpu);
        cpu.registers.set_program_counter(0x100);

        cpu.execute(8);

        assert_eq!(cpu.cpsr().mode(), Mode::Undefined);
        assert_eq!(cpu.reg(14), 0x104);
        assert_eq!(cpu.registers.program_counter(), 0x04);
    }

    #[test]
    fn high_vector_base_is_honored() {
        let mut cpu = make_cpu();
        cpu.config.vector_base = 0xFFFF_0000;
        unmasked_user(&mut cpu);
        cpu.registers.set_program_counter(0x100);

        cpu.set_input_line(InputLine::Irq, true);
        cpu.service_pending();

        assert_eq!(cpu.registers.program_counter(), 0xFFFF_0018);
    }

    #[test]
    fn data_abort_on_unmapped_page_end_to_end() {
        let mut cpu = make_cpu();
        const TTB: u32 = 0x4000;

        // Identity-map the first megabyte as a full-access section; leave
        // the 0xC0000000 entry unmapped.
        write_words(&cpu, TTB, &[0x0000_0C00 | 0x02]);
        write_words(&cpu, 0x10, &[HALT]);
        // LDR R1, [R0]
        write_words(&cpu, 0x100, &[0xE590_1000]);

        let cp15_op = |creg: u32| (creg << 16) | (15 << 8);
        cpu.cp15_write(cp15_op(2), TTB);
        cpu.cp15_write(cp15_op(3), 0x5555_5555);
        cpu.cp15_write(cp15_op(1), COPRO_CTRL_MMU_EN);
        cpu.mode_changed = false;

        cpu.registers.set_program_counter(0x100);
        cpu.set_reg(0, 0xC000_0000);
        let old_cpsr = cpu.cpsr();

        cpu.execute(10);

        assert_eq!(cpu.cpsr().mode(), Mode::Abort);
        assert_eq!(cpu.registers.spsr(), old_cpsr);
        // LR_abt holds the faulting PC plus 8.
        assert_eq!(cpu.reg(14), 0x108);
        assert_eq!(cpu.registers.program_counter(), 0x10);
        assert_eq!(cpu.cp15.fault_status[0], 0x05);
        assert_eq!(cpu.cp15.fault_address, 0xC000_0000);
        assert!(!cpu.pending.abort_data);
    }

    #[test]
    fn prefetch_abort_fires_when_the_bad_slot_executes() {
        let mut cpu = make_cpu();
        const TTB: u32 = 0x4000;

        write_words(&cpu, TTB, &[0x0000_0C00 | 0x02]);
        write_words(&cpu, 0x0C, &[HALT]);

        let cp15_op = |creg: u32| (creg << 16) | (15 << 8);
        cpu.cp15_write(cp15_op(2), TTB);
        cpu.cp15_write(cp15_op(3), 0x5555_5555);
        cpu.cp15_write(cp15_op(1), COPRO_CTRL_MMU_EN);
        cpu.mode_changed = false;

        // Jump into unmapped space.
        cpu.registers.set_program_counter(0xC000_0000);
        cpu.execute(10);

        assert_eq!(cpu.cpsr().mode(), Mode::Abort);
        // LR_abt = faulting PC + 4.
        assert_eq!(cpu.reg(14), 0xC000_0004);
        assert_eq!(cpu.registers.program_counter(), 0x0C);
    }

    #[test]
    fn fiq_bank_switch_and_return_end_to_end() {
        let mut cpu = make_cpu();
        // FIQ handler: MOV R8, #0xBB then SUBS PC, LR, #4.
        write_words(&cpu, 0x1C, &[0xE3A0_80BB, 0xE25E_F004]);
        // User code: MOV R0, R0 in a row.
        write_words(&cpu, 0x100, &[0xE1A0_0000, 0xE1A0_0000, 0xE1A0_0000]);

        unmasked_user(&mut cpu);
        cpu.registers.set_program_counter(0x100);
        cpu.set_reg(8, 0xAAAA);

        cpu.set_input_line(InputLine::Fiq, true);
        cpu.execute(16);

        // Back in User mode with its own R8; the FIQ copy survives.
        assert_eq!(cpu.cpsr().mode(), Mode::User);
        assert_eq!(cpu.reg(8), 0xAAAA);
        assert_eq!(cpu.read_state("R8_FIQ"), Some(0xBB));
        assert!(!cpu.cpsr().fiq_disable());
    }

    #[test]
    fn thumb_bx_to_arm_end_to_end() {
        let mut cpu = make_cpu();
        // BX R0 at 0x2000.
        cpu.bus.lock().unwrap().write_half_word(0x2000, 0x4700);

        let mut cpsr = cpu.cpsr();
        cpsr.set_state_bit(true);
        cpu.set_cpsr(cpsr);
        cpu.mode_changed = false;

        cpu.registers.set_program_counter(0x2001);
        cpu.set_reg(0, 0x8000);

        cpu.execute(4);

        assert!(!cpu.cpsr().state_bit());
        assert!(cpu.registers.program_counter() >= 0x8000);
    }
}
