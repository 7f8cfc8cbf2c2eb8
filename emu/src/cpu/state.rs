//! State inspection and save states.
//!
//! Every architectural register is reachable by its symbolic name, and the
//! whole architectural state round-trips through serde. The prefetch queue
//! is deliberately not part of a snapshot: it is a pure optimization and
//! gets invalidated on restore.

use serde::{Deserialize, Serialize};

use crate::cpu::core::Arm7Cpu;
use crate::cpu::cp15::Cp15;
use crate::cpu::exceptions::PendingExceptions;
use crate::cpu::registers::{RegisterFile, SLOT_COUNT, SLOT_NAMES};
use crate::cpu::tcm::Tcm;

/// A complete snapshot of the architectural state.
#[derive(Clone, Serialize, Deserialize)]
pub struct SaveState {
    pub registers: RegisterFile,
    pub cp15: Cp15,
    pub pending: PendingExceptions,
    pub tcm: Option<Tcm>,
    pub total_cycles: u64,
}

impl Arm7Cpu {
    pub fn save_state(&self) -> SaveState {
        SaveState {
            registers: self.registers.clone(),
            cp15: self.cp15.clone(),
            pending: self.pending.clone(),
            tcm: self.tcm.clone(),
            total_cycles: self.total_cycles(),
        }
    }

    /// Restores a snapshot. Derived state (register view, fault table,
    /// prefetch queue) is rebuilt rather than trusted.
    pub fn restore_state(&mut self, state: SaveState) {
        self.registers = state.registers;
        self.cp15 = state.cp15;
        self.pending = state.pending;
        self.tcm = state.tcm;
        self.restore_total_cycles(state.total_cycles);

        self.registers.set_view(self.cpsr().mode());
        self.pending.update();
        self.update_fault_table();
        self.prefetch.invalidate();
        self.mode_changed = true;
    }

    /// All physical register slots as `(name, value)` pairs, in slot
    /// order: R0..R15, CPSR, then the banked copies and SPSRs.
    pub fn state_entries(&self) -> Vec<(&'static str, u32)> {
        (0..SLOT_COUNT)
            .map(|slot| (SLOT_NAMES[slot], self.registers.slot(slot)))
            .collect()
    }

    /// Reads one architectural register by its symbolic name.
    pub fn read_state(&self, name: &str) -> Option<u32> {
        SLOT_NAMES
            .iter()
            .position(|candidate| *candidate == name)
            .map(|slot| self.registers.slot(slot))
    }

    /// Writes one architectural register by its symbolic name. Returns
    /// `false` for an unknown name.
    pub fn write_state(&mut self, name: &str, value: u32) -> bool {
        let Some(slot) = SLOT_NAMES.iter().position(|candidate| *candidate == name) else {
            return false;
        };
        self.registers.set_slot(slot, value);
        if name == "CPSR" {
            self.registers.set_view(self.cpsr().mode());
            self.mode_changed = true;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::core::tests::make_cpu;
    use crate::cpu::cpu_modes::Mode;
    use pretty_assertions::assert_eq;

    #[test]
    fn state_entries_cover_every_slot() {
        let cpu = make_cpu();
        let entries = cpu.state_entries();

        assert_eq!(entries.len(), SLOT_COUNT);
        assert_eq!(entries[0].0, "R0");
        assert_eq!(entries[15].0, "R15");
        assert_eq!(entries[16].0, "CPSR");
        assert_eq!(entries[36].0, "SPSR_UND");
    }

    #[test]
    fn named_access_reaches_banked_slots() {
        let mut cpu = make_cpu();

        cpu.switch_mode(Mode::Fiq);
        cpu.set_reg(8, 0x1234);
        cpu.switch_mode(Mode::Supervisor);

        assert_eq!(cpu.read_state("R8_FIQ"), Some(0x1234));
        assert!(cpu.write_state("R13_IRQ", 0x2000));
        cpu.switch_mode(Mode::Irq);
        assert_eq!(cpu.reg(13), 0x2000);

        assert_eq!(cpu.read_state("R99"), None);
        assert!(!cpu.write_state("R99", 0));
    }

    #[test]
    fn save_state_roundtrip() {
        let mut cpu = make_cpu();
        cpu.set_reg(0, 0xAA);
        cpu.set_reg(13, 0x1000);
        cpu.switch_mode(Mode::Irq);
        cpu.set_reg(13, 0x2000);
        cpu.cp15.fault_address = 0xC000_0000;
        cpu.pending.irq = true;
        cpu.pending.update();

        let snapshot = cpu.save_state();
        let serialized = serde_json::to_string(&snapshot).unwrap();

        let mut other = make_cpu();
        other.restore_state(serde_json::from_str(&serialized).unwrap());

        assert_eq!(other.reg(0), 0xAA);
        assert_eq!(other.cpsr().mode(), Mode::Irq);
        assert_eq!(other.reg(13), 0x2000);
        other.switch_mode(Mode::Supervisor);
        assert_eq!(other.reg(13), 0x1000);
        assert_eq!(other.cp15.fault_address, 0xC000_0000);
        assert!(other.pending.irq);
        assert!(other.pending.any);
    }
}
