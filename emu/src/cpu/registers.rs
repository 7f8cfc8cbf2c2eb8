//! # Banked register file
//!
//! Sixteen registers are visible at any time, but some of them resolve to
//! different physical storage depending on the operating mode:
//!
//! ```text
//! Register │ User/Sys │  FIQ   │  IRQ   │  SVC   │ Abort  │ Undef  │
//! ─────────┼──────────┼────────┼────────┼────────┼────────┼────────┤
//!   R0-R7  │  R0-R7   │ R0-R7  │ R0-R7  │ R0-R7  │ R0-R7  │ R0-R7  │
//!   R8-R12 │  R8-R12  │ _fiq   │ R8-R12 │ R8-R12 │ R8-R12 │ R8-R12 │
//!   R13/SP │   R13    │ _fiq   │ _irq   │ _svc   │ _abt   │ _und   │
//!   R14/LR │   R14    │ _fiq   │ _irq   │ _svc   │ _abt   │ _und   │
//!   R15/PC │      shared by every mode                             │
//!   SPSR   │   ---    │ _fiq   │ _irq   │ _svc   │ _abt   │ _und   │
//! ```
//!
//! The physical storage is a flat array of 37 slots (16 visible + CPSR +
//! the banked copies + 5 SPSRs). Each mode owns one row of a constant
//! index-permutation table mapping `(mode, register)` to a slot, so a mode
//! switch only swaps the active row and never copies register values.
//!
//! User and System have no SPSR of their own; their row aliases the SPSR
//! column to the CPSR slot, which is the fall-back behavior software that
//! reads SPSR from those modes ends up relying on.

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::cpu::cpu_modes::Mode;
use crate::cpu::psr::Psr;

/// Stack Pointer register index.
pub const REG_SP: usize = 13;

/// Link Register index (return address for subroutines).
pub const REG_LR: usize = 14;

/// Program Counter register index.
pub const REG_PC: usize = 15;

pub(crate) const SLOT_COUNT: usize = 37;
const SLOT_CPSR: usize = 16;

/// Symbolic names of the physical slots, in slot order. Used by the state
/// inspection interface.
pub(crate) const SLOT_NAMES: [&str; SLOT_COUNT] = [
    "R0", "R1", "R2", "R3", "R4", "R5", "R6", "R7", "R8", "R9", "R10", "R11", "R12", "R13", "R14",
    "R15", "CPSR", "R8_FIQ", "R9_FIQ", "R10_FIQ", "R11_FIQ", "R12_FIQ", "R13_FIQ", "R14_FIQ",
    "SPSR_FIQ", "R13_IRQ", "R14_IRQ", "SPSR_IRQ", "R13_SVC", "R14_SVC", "SPSR_SVC", "R13_ABT",
    "R14_ABT", "SPSR_ABT", "R13_UND", "R14_UND", "SPSR_UND",
];

/// `(mode row, register) -> slot`. Columns 0-15 are the visible registers,
/// column 16 the CPSR, column 17 the SPSR.
#[rustfmt::skip]
const REGISTER_TABLE: [[usize; 18]; 7] = [
    // User
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 16],
    // FIQ
    [0, 1, 2, 3, 4, 5, 6, 7, 17, 18, 19, 20, 21, 22, 23, 15, 16, 24],
    // IRQ
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 25, 26, 15, 16, 27],
    // Supervisor
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 28, 29, 15, 16, 30],
    // Abort
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 31, 32, 15, 16, 33],
    // Undefined
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 34, 35, 15, 16, 36],
    // System
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 16],
];

#[serde_as]
#[derive(Clone, Serialize, Deserialize)]
pub struct RegisterFile {
    #[serde_as(as = "[_; 37]")]
    slots: [u32; SLOT_COUNT],
    view: usize,
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self {
            slots: [0; SLOT_COUNT],
            view: Mode::Supervisor.bank_index(),
        }
    }
}

impl RegisterFile {
    pub fn register_at(&self, reg: usize) -> u32 {
        assert!(reg <= 15, "Invalid register index: {reg} ({reg:#X})");
        self.slots[REGISTER_TABLE[self.view][reg]]
    }

    pub fn set_register_at(&mut self, reg: usize, new_value: u32) {
        assert!(reg <= 15, "Invalid register index: {reg} ({reg:#X})");
        self.slots[REGISTER_TABLE[self.view][reg]] = new_value;
    }

    /// Reads through the User bank regardless of the active mode, for the
    /// S-bit forms of the block transfer instructions.
    pub fn user_register_at(&self, reg: usize) -> u32 {
        assert!(reg <= 15, "Invalid register index: {reg} ({reg:#X})");
        self.slots[REGISTER_TABLE[Mode::User.bank_index()][reg]]
    }

    pub fn set_user_register_at(&mut self, reg: usize, new_value: u32) {
        assert!(reg <= 15, "Invalid register index: {reg} ({reg:#X})");
        self.slots[REGISTER_TABLE[Mode::User.bank_index()][reg]] = new_value;
    }

    pub fn program_counter(&self) -> u32 {
        self.slots[REG_PC]
    }

    pub const fn set_program_counter(&mut self, new_value: u32) {
        self.slots[REG_PC] = new_value;
    }

    pub fn cpsr(&self) -> Psr {
        Psr::from(self.slots[SLOT_CPSR])
    }

    /// Writes the raw CPSR bits. View bookkeeping and the mode-change latch
    /// live in the CPU, which is the only caller.
    pub(crate) const fn set_cpsr_raw(&mut self, bits: u32) {
        self.slots[SLOT_CPSR] = bits;
    }

    /// SPSR of the active mode. In User and System the slot aliases the
    /// CPSR, so the read falls back to it instead of faulting.
    pub fn spsr(&self) -> Psr {
        Psr::from(self.slots[REGISTER_TABLE[self.view][17]])
    }

    /// Writes the active mode's SPSR. In User and System this would land on
    /// the CPSR through the alias, so the caller must filter those modes.
    pub fn set_spsr(&mut self, psr: Psr) {
        self.slots[REGISTER_TABLE[self.view][17]] = psr.into();
    }

    /// Selects the register view of `mode`. Values are never moved, the
    /// permutation row does all the work.
    pub(crate) fn set_view(&mut self, mode: Mode) {
        self.view = mode.bank_index();
    }

    pub(crate) fn slot(&self, index: usize) -> u32 {
        self.slots[index]
    }

    pub(crate) fn set_slot(&mut self, index: usize, value: u32) {
        self.slots[index] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn switch(file: &mut RegisterFile, mode: Mode) {
        let mut cpsr = file.cpsr();
        cpsr.set_mode(mode);
        file.set_cpsr_raw(cpsr.into());
        file.set_view(mode);
    }

    #[test]
    fn banked_write_survives_mode_roundtrip() {
        let mut file = RegisterFile::default();

        switch(&mut file, Mode::Supervisor);
        file.set_register_at(13, 0xAAAA);
        file.set_register_at(14, 0xBBBB);

        switch(&mut file, Mode::Irq);
        file.set_register_at(13, 0x1111);
        assert_eq!(file.register_at(13), 0x1111);

        switch(&mut file, Mode::Supervisor);
        assert_eq!(file.register_at(13), 0xAAAA);
        assert_eq!(file.register_at(14), 0xBBBB);
    }

    #[test]
    fn low_registers_are_shared() {
        let mut file = RegisterFile::default();

        switch(&mut file, Mode::User);
        for r in 0..8 {
            file.set_register_at(r, r as u32 + 100);
        }

        switch(&mut file, Mode::Fiq);
        for r in 0..8 {
            assert_eq!(file.register_at(r), r as u32 + 100);
        }
    }

    #[test]
    fn fiq_banks_r8_to_r12() {
        let mut file = RegisterFile::default();

        switch(&mut file, Mode::User);
        file.set_register_at(8, 0xAAAA);

        switch(&mut file, Mode::Fiq);
        assert_eq!(file.register_at(8), 0);
        file.set_register_at(8, 0xBBBB);

        switch(&mut file, Mode::User);
        assert_eq!(file.register_at(8), 0xAAAA);

        // The FIQ copy is retained across further entries.
        switch(&mut file, Mode::Fiq);
        assert_eq!(file.register_at(8), 0xBBBB);
    }

    #[test]
    fn irq_banks_only_r13_r14() {
        let mut file = RegisterFile::default();

        switch(&mut file, Mode::User);
        file.set_register_at(12, 0x12);
        file.set_register_at(13, 0x13);

        switch(&mut file, Mode::Irq);
        assert_eq!(file.register_at(12), 0x12);
        assert_eq!(file.register_at(13), 0);
    }

    #[test]
    fn pc_is_shared_by_every_mode() {
        let mut file = RegisterFile::default();

        switch(&mut file, Mode::Abort);
        file.set_program_counter(0x8000);

        for mode in [Mode::User, Mode::Fiq, Mode::Irq, Mode::System] {
            switch(&mut file, mode);
            assert_eq!(file.register_at(15), 0x8000);
            assert_eq!(file.program_counter(), 0x8000);
        }
    }

    #[test]
    fn spsr_is_per_mode() {
        let mut file = RegisterFile::default();

        switch(&mut file, Mode::Fiq);
        let mut psr = Psr::default();
        psr.set_carry_flag(true);
        file.set_spsr(psr);

        switch(&mut file, Mode::Irq);
        assert!(!file.spsr().carry_flag());

        switch(&mut file, Mode::Fiq);
        assert!(file.spsr().carry_flag());
    }

    #[test]
    fn user_spsr_aliases_cpsr() {
        let mut file = RegisterFile::default();

        switch(&mut file, Mode::User);
        assert_eq!(u32::from(file.spsr()), u32::from(file.cpsr()));

        switch(&mut file, Mode::System);
        assert_eq!(u32::from(file.spsr()), u32::from(file.cpsr()));
    }

    #[test]
    fn user_bank_access_from_exception_mode() {
        let mut file = RegisterFile::default();

        switch(&mut file, Mode::User);
        file.set_register_at(13, 0x1000);

        switch(&mut file, Mode::Irq);
        file.set_register_at(13, 0x2000);

        assert_eq!(file.user_register_at(13), 0x1000);
        file.set_user_register_at(13, 0x1004);

        switch(&mut file, Mode::User);
        assert_eq!(file.register_at(13), 0x1004);
    }
}
