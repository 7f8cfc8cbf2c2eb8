//! The CPU device: configuration, the memory access path and the execute
//! loop.
//!
//! The execute loop is monomorphized over three booleans (Thumb state, MMU
//! enabled, prefetch enabled) so the hot path never tests them. Any
//! instruction that flips one of the underlying CPSR bits sets the
//! `mode_changed` latch, which makes the inner loop return so the right
//! variant can be re-selected.

use std::sync::{Arc, Mutex};

use crate::bus::{Bus, Endianness};
use crate::cpu::arm::instructions::ArmInstruction;
use crate::cpu::condition::Condition;
use crate::cpu::cp15::Cp15;
use crate::cpu::cpu_modes::Mode;
use crate::cpu::exceptions::PendingExceptions;
use crate::cpu::mmu::{DataAccess, FaultKind};
use crate::cpu::prefetch::{PrefetchQueue, PrefetchSlot};
use crate::cpu::psr::Psr;
use crate::cpu::registers::RegisterFile;
use crate::cpu::tcm::Tcm;
use crate::cpu::thumb::instruction::ThumbInstruction;

/// Called once per executed instruction with the PC, before decode.
pub type InstructionHook = Box<dyn FnMut(u32) + Send>;

const COPRO_ID_MFR_ARM: u32 = 0x41 << 24;
const COPRO_ID_MFR_INTEL: u32 = 0x69 << 24;
const COPRO_ID_SPEC_REV1: u32 = 1 << 20;
const COPRO_ID_ARCH_V4: u32 = 0x01 << 16;
const COPRO_ID_ARCH_V4T: u32 = 0x02 << 16;
const COPRO_ID_ARCH_V5: u32 = 0x03 << 16;
const COPRO_ID_ARCH_V5T: u32 = 0x04 << 16;
const COPRO_ID_ARCH_V5TE: u32 = 0x05 << 16;
const COPRO_ID_PART_GENERIC_ARM7: u32 = 0x700 << 4;
const COPRO_ID_PART_ARM710: u32 = 0x710 << 4;
const COPRO_ID_PART_ARM9: u32 = 0x900 << 4;
const COPRO_ID_PART_ARM920: u32 = 0x920 << 4;
const COPRO_ID_PART_ARM946: u32 = 0x946 << 4;
const COPRO_ID_PART_PXA255: u32 = 0x2D0 << 4;
const COPRO_ID_PART_SA1110: u32 = 0xB11 << 4;
const COPRO_ID_STEP_ARM946_A0: u32 = 1;
const COPRO_ID_STEP_PXA255_A0: u32 = 5;
const COPRO_ID_STEP_SA1110_A0: u32 = 9;

/// Construction parameters of a core variant.
#[derive(Debug, Clone)]
pub struct CpuConfig {
    pub clock: u32,
    pub endianness: Endianness,
    /// Architecture revision, 4 or 5.
    pub arch_rev: u8,
    /// Thumb instruction set present.
    pub thumb: bool,
    /// v5TE enhanced DSP operations present.
    pub enhanced_dsp: bool,
    pub xscale: bool,
    pub strongarm: bool,
    /// 26-bit program counter compatibility.
    pub mode26: bool,
    /// 0 or 0xFFFF0000.
    pub vector_base: u32,
    /// Tightly coupled memory present (ARM946ES family).
    pub has_tcm: bool,
}

impl CpuConfig {
    fn v4t(clock: u32, endianness: Endianness) -> Self {
        Self {
            clock,
            endianness,
            arch_rev: 4,
            thumb: true,
            enhanced_dsp: false,
            xscale: false,
            strongarm: false,
            mode26: false,
            vector_base: 0,
            has_tcm: false,
        }
    }

    fn v5te(clock: u32) -> Self {
        Self {
            arch_rev: 5,
            enhanced_dsp: true,
            ..Self::v4t(clock, Endianness::Little)
        }
    }
}

pub struct Arm7Cpu {
    pub(crate) bus: Arc<Mutex<dyn Bus + Send>>,
    pub config: CpuConfig,
    pub registers: RegisterFile,
    pub cp15: Cp15,
    pub(crate) tcm: Option<Tcm>,
    pub pending: PendingExceptions,
    pub(crate) prefetch: PrefetchQueue,
    pub(crate) fault_table: [FaultKind; 512],
    /// Set by anything that invalidates the inner loop specialization:
    /// mode or T-bit changes and MMU enable toggles.
    pub(crate) mode_changed: bool,
    /// Set by any write to R15, suppresses the automatic PC advance.
    pub(crate) branch_taken: bool,
    prefetch_enabled: bool,
    icount: i32,
    total_cycles: u64,
    instruction_hook: Option<InstructionHook>,
}

impl Arm7Cpu {
    fn new(bus: Arc<Mutex<dyn Bus + Send>>, config: CpuConfig, copro_id: u32) -> Self {
        let prefetch = PrefetchQueue::new(config.endianness);
        let tcm = config.has_tcm.then(Tcm::default);

        let mut cpu = Self {
            bus,
            config,
            registers: RegisterFile::default(),
            cp15: Cp15 {
                copro_id,
                ..Cp15::default()
            },
            tcm,
            pending: PendingExceptions::default(),
            prefetch,
            fault_table: [FaultKind::None; 512],
            mode_changed: false,
            branch_taken: false,
            prefetch_enabled: false,
            icount: 0,
            total_cycles: 0,
            instruction_hook: None,
        };
        cpu.reset();
        cpu
    }

    pub fn arm7(bus: Arc<Mutex<dyn Bus + Send>>, clock: u32) -> Self {
        let config = CpuConfig::v4t(clock, Endianness::Little);
        Self::new(
            bus,
            config,
            COPRO_ID_MFR_ARM | COPRO_ID_ARCH_V4T | COPRO_ID_PART_GENERIC_ARM7,
        )
    }

    pub fn arm7_be(bus: Arc<Mutex<dyn Bus + Send>>, clock: u32) -> Self {
        let config = CpuConfig::v4t(clock, Endianness::Big);
        Self::new(
            bus,
            config,
            COPRO_ID_MFR_ARM | COPRO_ID_ARCH_V4T | COPRO_ID_PART_GENERIC_ARM7,
        )
    }

    pub fn arm7500(bus: Arc<Mutex<dyn Bus + Send>>, clock: u32) -> Self {
        let config = CpuConfig {
            thumb: false,
            mode26: true,
            ..CpuConfig::v4t(clock, Endianness::Little)
        };
        Self::new(
            bus,
            config,
            COPRO_ID_MFR_ARM | COPRO_ID_ARCH_V4 | COPRO_ID_PART_ARM710,
        )
    }

    pub fn arm9(bus: Arc<Mutex<dyn Bus + Send>>, clock: u32) -> Self {
        let config = CpuConfig::v5te(clock);
        Self::new(
            bus,
            config,
            COPRO_ID_MFR_ARM | COPRO_ID_ARCH_V5TE | COPRO_ID_PART_ARM9,
        )
    }

    pub fn arm920t(bus: Arc<Mutex<dyn Bus + Send>>, clock: u32) -> Self {
        let config = CpuConfig::v4t(clock, Endianness::Little);
        Self::new(
            bus,
            config,
            COPRO_ID_MFR_ARM | COPRO_ID_SPEC_REV1 | COPRO_ID_ARCH_V4T | COPRO_ID_PART_ARM920,
        )
    }

    pub fn arm946es(bus: Arc<Mutex<dyn Bus + Send>>, clock: u32) -> Self {
        let config = CpuConfig {
            has_tcm: true,
            ..CpuConfig::v5te(clock)
        };
        Self::new(
            bus,
            config,
            COPRO_ID_MFR_ARM | COPRO_ID_ARCH_V5TE | COPRO_ID_PART_ARM946 | COPRO_ID_STEP_ARM946_A0,
        )
    }

    /// Uses an MPU rather than an MMU, which makes it a 946 relative.
    pub fn igs036(bus: Arc<Mutex<dyn Bus + Send>>, clock: u32) -> Self {
        let config = CpuConfig {
            has_tcm: true,
            ..CpuConfig::v5te(clock)
        };
        Self::new(
            bus,
            config,
            COPRO_ID_MFR_ARM | COPRO_ID_ARCH_V5TE | COPRO_ID_PART_ARM946 | COPRO_ID_STEP_ARM946_A0,
        )
    }

    pub fn pxa255(bus: Arc<Mutex<dyn Bus + Send>>, clock: u32) -> Self {
        let config = CpuConfig {
            xscale: true,
            ..CpuConfig::v5te(clock)
        };
        Self::new(
            bus,
            config,
            COPRO_ID_MFR_INTEL
                | COPRO_ID_ARCH_V5TE
                | COPRO_ID_PART_PXA255
                | COPRO_ID_STEP_PXA255_A0,
        )
    }

    /// StrongARM: v4, no Thumb, no enhanced DSP.
    pub fn sa1110(bus: Arc<Mutex<dyn Bus + Send>>, clock: u32) -> Self {
        let config = CpuConfig {
            thumb: false,
            strongarm: true,
            ..CpuConfig::v4t(clock, Endianness::Little)
        };
        Self::new(
            bus,
            config,
            COPRO_ID_MFR_INTEL | COPRO_ID_ARCH_V4 | COPRO_ID_PART_SA1110 | COPRO_ID_STEP_SA1110_A0,
        )
    }

    /// Starts up in Supervisor mode, interrupts masked, ARM state, with
    /// the PC at the configured vector base.
    pub fn reset(&mut self) {
        self.registers = RegisterFile::default();
        self.pending = PendingExceptions::default();

        let copro_id = self.cp15.copro_id;
        self.cp15 = Cp15 {
            copro_id,
            ..Cp15::default()
        };
        if let Some(tcm) = &mut self.tcm {
            *tcm = Tcm::default();
        }

        let mut cpsr = Psr::from(Mode::Supervisor);
        cpsr.set_irq_disable(true);
        cpsr.set_fiq_disable(true);
        self.registers.set_cpsr_raw(cpsr.into());
        self.registers.set_view(Mode::Supervisor);
        self.registers.set_program_counter(self.config.vector_base);

        self.prefetch.invalidate();
        self.mode_changed = false;
        self.branch_taken = false;
        self.update_fault_table();
    }

    pub fn set_prefetch_enabled(&mut self, enabled: bool) {
        self.prefetch_enabled = enabled;
        self.prefetch.invalidate();
        self.mode_changed = true;
    }

    pub fn set_instruction_hook(&mut self, hook: Option<InstructionHook>) {
        self.instruction_hook = hook;
    }

    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    pub(crate) fn restore_total_cycles(&mut self, total: u64) {
        self.total_cycles = total;
    }

    // ------------------------------------------------------------------
    // Register access
    // ------------------------------------------------------------------

    pub fn cpsr(&self) -> Psr {
        self.registers.cpsr()
    }

    pub(crate) fn reg(&self, r: u32) -> u32 {
        self.registers.register_at(r as usize)
    }

    pub(crate) fn set_reg(&mut self, r: u32, value: u32) {
        if r == 15 {
            self.set_pc(value);
        } else {
            self.registers.set_register_at(r as usize, value);
        }
    }

    /// Register read as an instruction operand: R15 reads two pipeline
    /// slots ahead of the executing instruction (`pc_offset` is 8 for ARM,
    /// 4 for Thumb, 12 for ARM reads delayed by a register shift).
    pub(crate) fn reg_for_op(&self, r: u32, pc_offset: u32) -> u32 {
        if r == 15 {
            self.registers.program_counter().wrapping_add(pc_offset)
        } else {
            self.reg(r)
        }
    }

    /// Writes R15 and suppresses the automatic PC advance. The prefetch
    /// queue cannot survive a control transfer.
    pub(crate) fn set_pc(&mut self, value: u32) {
        self.registers.set_program_counter(value);
        self.branch_taken = true;
        self.prefetch.invalidate();
    }

    /// Full CPSR write: keeps the register view in sync with the mode
    /// field and latches `mode_changed` on anything that invalidates the
    /// specialized loop.
    pub(crate) fn set_cpsr(&mut self, psr: Psr) {
        if self.config.mode26 {
            self.set_cpsr_mode26(psr);
            return;
        }

        let old = self.cpsr();
        let value = psr.bits() | 0x10;
        self.registers.set_cpsr_raw(value);

        let new = Psr::from(value);
        if new.mode() != old.mode() {
            self.registers.set_view(new.mode());
            self.mode_changed = true;
        }
        if new.state_bit() != old.state_bit() {
            self.mode_changed = true;
        }
    }

    /// The 26-bit compatibility variant keeps the flags and interrupt
    /// masks mirrored into the top and bottom bits of R15 while bit 4 of
    /// the PSR selects 26 or 32-bit operation.
    fn set_cpsr_mode26(&mut self, psr: Psr) {
        let mut value = psr.bits();
        let old = self.cpsr().bits();
        let r15 = self.registers.program_counter();

        if (value & 0x10) != (old & 0x10) {
            if value & 0x10 != 0 {
                // 26 -> 32
                value = (value & 0x0FFF_FF3F)
                    | (r15 & 0xF000_0000)
                    | ((r15 & 0x0C00_0000) >> 20);
                self.registers.set_program_counter(r15 & 0x03FF_FFFC);
            } else {
                // 32 -> 26
                self.registers.set_program_counter(
                    (r15 & 0x03FF_FFFC)
                        | (value & 0xF000_0000)
                        | ((value & 0x0000_00C0) << 20)
                        | (value & 0x0000_0003),
                );
            }
        } else if value & 0x10 == 0 {
            // Keep the flag mirror in the PC image fresh.
            self.registers.set_program_counter(
                (r15 & 0x03FF_FFFF) | (value & 0xF000_0000) | ((value & 0x0000_00C0) << 20),
            );
        }

        self.registers.set_cpsr_raw(value);

        let new = Psr::from(value);
        let old = Psr::from(old);
        if new.mode() != old.mode() {
            self.registers.set_view(new.mode());
            self.mode_changed = true;
        }
        if new.state_bit() != old.state_bit() {
            self.mode_changed = true;
        }
    }

    /// Mode switch that leaves the rest of the CPSR alone.
    pub(crate) fn switch_mode(&mut self, mode: Mode) {
        let mut cpsr = self.cpsr();
        if cpsr.mode() == mode {
            return;
        }
        cpsr.set_mode(mode);
        self.registers.set_cpsr_raw(cpsr.into());
        self.registers.set_view(mode);
        self.mode_changed = true;
    }

    pub(crate) fn spend(&mut self, cycles: i32) {
        self.icount -= cycles;
        self.total_cycles += cycles as u64;
    }

    // ------------------------------------------------------------------
    // Memory access
    // ------------------------------------------------------------------

    pub(crate) fn bus_read_word(&self, address: u32) -> u32 {
        self.bus.lock().unwrap().read_word(address)
    }

    pub(crate) fn bus_read_half_word(&self, address: u32) -> u16 {
        self.bus.lock().unwrap().read_half_word(address)
    }

    fn bus_read_word_rotated(&self, address: u32) -> u32 {
        let word = self.bus.lock().unwrap().read_word(address & !3);
        word.rotate_right(8 * (address & 3))
    }

    /// Data-side word read: TCM overlay first, then the MMU, then the bus.
    /// A misaligned address rotates the aligned word into place. An
    /// aborted access reads as zero with the abort left pending.
    pub(crate) fn read32(&mut self, address: u32) -> u32 {
        if let Some(tcm) = &self.tcm {
            if let Some(value) = tcm.try_read_word(address) {
                return value;
            }
            return self.bus_read_word_rotated(address);
        }

        let mut physical = address;
        if self.cp15.mmu_enabled() {
            match self.translate(address, DataAccess::Read) {
                Ok(p) => physical = p,
                Err(_) => return 0,
            }
        }

        self.bus_read_word_rotated(physical)
    }

    /// Data-side halfword read. An odd address rotates the halfword the
    /// way the memory interface does, producing `0x00FF00EE`-style values.
    pub(crate) fn read16(&mut self, address: u32) -> u32 {
        if let Some(tcm) = &self.tcm {
            if let Some(value) = tcm.try_read_half_word(address) {
                return Self::rotate_half(u32::from(value), address);
            }
            let value = u32::from(self.bus.lock().unwrap().read_half_word(address & !1));
            return Self::rotate_half(value, address);
        }

        let mut physical = address;
        if self.cp15.mmu_enabled() {
            match self.translate(address, DataAccess::Read) {
                Ok(p) => physical = p,
                Err(_) => return 0,
            }
        }

        let value = u32::from(self.bus.lock().unwrap().read_half_word(physical & !1));
        Self::rotate_half(value, physical)
    }

    fn rotate_half(value: u32, address: u32) -> u32 {
        if address & 1 != 0 {
            ((value >> 8) & 0xFF) | ((value & 0xFF) << 24)
        } else {
            value
        }
    }

    pub(crate) fn read8(&mut self, address: u32) -> u32 {
        if let Some(tcm) = &self.tcm {
            if let Some(value) = tcm.try_read_byte(address) {
                return u32::from(value);
            }
            return u32::from(self.bus.lock().unwrap().read_byte(address));
        }

        let mut physical = address;
        if self.cp15.mmu_enabled() {
            match self.translate(address, DataAccess::Read) {
                Ok(p) => physical = p,
                Err(_) => return 0,
            }
        }

        u32::from(self.bus.lock().unwrap().read_byte(physical))
    }

    pub(crate) fn write32(&mut self, address: u32, value: u32) {
        if let Some(tcm) = &mut self.tcm {
            if tcm.try_write_word(address, value) {
                return;
            }
            self.bus.lock().unwrap().write_word(address & !3, value);
            return;
        }

        let mut physical = address;
        if self.cp15.mmu_enabled() {
            match self.translate(address, DataAccess::Write) {
                Ok(p) => physical = p,
                Err(_) => return,
            }
        }

        self.bus.lock().unwrap().write_word(physical & !3, value);
    }

    pub(crate) fn write16(&mut self, address: u32, value: u16) {
        if let Some(tcm) = &mut self.tcm {
            if tcm.try_write_half_word(address, value) {
                return;
            }
            self.bus.lock().unwrap().write_half_word(address & !1, value);
            return;
        }

        let mut physical = address;
        if self.cp15.mmu_enabled() {
            match self.translate(address, DataAccess::Write) {
                Ok(p) => physical = p,
                Err(_) => return,
            }
        }

        self.bus.lock().unwrap().write_half_word(physical & !1, value);
    }

    pub(crate) fn write8(&mut self, address: u32, value: u8) {
        if let Some(tcm) = &mut self.tcm {
            if tcm.try_write_byte(address, value) {
                return;
            }
            self.bus.lock().unwrap().write_byte(address, value);
            return;
        }

        let mut physical = address;
        if self.cp15.mmu_enabled() {
            match self.translate(address, DataAccess::Write) {
                Ok(p) => physical = p,
                Err(_) => return,
            }
        }

        self.bus.lock().unwrap().write_byte(physical, value);
    }

    // ------------------------------------------------------------------
    // Instruction fetch
    // ------------------------------------------------------------------

    /// Tops up the prefetch queue so it again holds `depth` contiguous
    /// words starting at `pc`. With the MMU enabled a failed translation
    /// leaves a poisoned slot at the tail and stops the refill.
    fn refill_prefetch<const MMU: bool>(&mut self, pc: u32) {
        self.prefetch.realign(pc);

        while !self.prefetch.is_full() {
            let vaddr = self.prefetch.next_fetch_vaddr(pc);
            if MMU {
                match self.translate_check(vaddr) {
                    Some(paddr) => {
                        let word = self.bus_read_word(paddr);
                        self.prefetch.push(PrefetchSlot {
                            vaddr,
                            paddr,
                            word,
                            translated: true,
                        });
                    }
                    None => {
                        self.prefetch.push(PrefetchSlot {
                            vaddr,
                            paddr: !0,
                            word: 0,
                            translated: false,
                        });
                        break;
                    }
                }
            } else {
                let word = self.bus_read_word(vaddr);
                self.prefetch.push(PrefetchSlot {
                    vaddr,
                    paddr: vaddr,
                    word,
                    translated: true,
                });
            }
        }
    }

    /// ARM-state fetch. `None` means the fetch aborted; the prefetch abort
    /// is already pending in that case.
    fn fetch_arm<const MMU: bool, const PREFETCH: bool>(&mut self, raddr: u32) -> Option<u32> {
        if PREFETCH {
            self.refill_prefetch::<MMU>(raddr);
            let slot = self.prefetch.consume_arm()?;
            if !slot.translated {
                self.pending.abort_prefetch = true;
                self.pending.update();
                return None;
            }
            Some(slot.word)
        } else if MMU {
            match self.translate_check(raddr) {
                Some(paddr) => Some(self.bus_read_word(paddr)),
                None => {
                    self.pending.abort_prefetch = true;
                    self.pending.update();
                    None
                }
            }
        } else {
            Some(self.bus_read_word(raddr))
        }
    }

    /// Thumb-state fetch of the halfword at `raddr`.
    fn fetch_thumb<const MMU: bool, const PREFETCH: bool>(&mut self, raddr: u32) -> Option<u16> {
        if PREFETCH {
            self.refill_prefetch::<MMU>(raddr & !3);
            let (halfword, translated) = self.prefetch.consume_thumb(raddr)?;
            if !translated {
                self.pending.abort_prefetch = true;
                self.pending.update();
                return None;
            }
            Some(halfword)
        } else if MMU {
            match self.translate_check(raddr & !3) {
                Some(paddr) => Some(self.bus_read_half_word(paddr | (raddr & 2))),
                None => {
                    self.pending.abort_prefetch = true;
                    self.pending.update();
                    None
                }
            }
        } else {
            Some(self.bus_read_half_word(raddr))
        }
    }

    // ------------------------------------------------------------------
    // Execute loop
    // ------------------------------------------------------------------

    /// Runs for `cycles` cycles (at least; the last instruction may
    /// overshoot) and returns how many were actually consumed.
    pub fn execute(&mut self, cycles: i32) -> i32 {
        self.icount = cycles;

        while self.icount > 0 {
            let thumb = self.cpsr().state_bit();
            // The 946 family carries an MPU, not the paging MMU, so its
            // fetches and data accesses never walk the tables.
            let mmu = self.cp15.mmu_enabled() && self.tcm.is_none();

            match (thumb, mmu, self.prefetch_enabled) {
                (false, false, false) => self.execute_core::<false, false, false>(),
                (false, false, true) => self.execute_core::<false, false, true>(),
                (false, true, false) => self.execute_core::<false, true, false>(),
                (false, true, true) => self.execute_core::<false, true, true>(),
                (true, false, false) => self.execute_core::<true, false, false>(),
                (true, false, true) => self.execute_core::<true, false, true>(),
                (true, true, false) => self.execute_core::<true, true, false>(),
                (true, true, true) => self.execute_core::<true, true, true>(),
            }
        }

        cycles - self.icount
    }

    /// Executes a single instruction.
    pub fn step(&mut self) {
        self.execute(1);
    }

    fn execute_core<const THUMB: bool, const MMU: bool, const PREFETCH: bool>(&mut self) {
        loop {
            if self.pending.any {
                self.service_pending();
                if self.mode_changed {
                    self.mode_changed = false;
                    return;
                }
            }

            let pc = self.registers.program_counter();
            if let Some(hook) = self.instruction_hook.as_mut() {
                hook(pc);
            }

            self.branch_taken = false;

            if THUMB {
                // Bit 0 of R15 is undefined in Thumb state and ignored.
                let raddr = pc & !1;
                if let Some(halfword) = self.fetch_thumb::<MMU, PREFETCH>(raddr) {
                    let decoded = ThumbInstruction::from(halfword);
                    self.execute_thumb(decoded);
                    if !self.branch_taken {
                        self.registers.set_program_counter(pc.wrapping_add(2));
                    }
                }
                self.spend(1);
            } else {
                // Bits 1:0 of R15 are undefined in ARM state and ignored.
                let raddr = pc & !3;
                if let Some(insn) = self.fetch_arm::<MMU, PREFETCH>(raddr) {
                    let cond_bits = (insn >> 28) as u8;
                    if cond_bits == 0xF {
                        if self.config.arch_rev >= 5 {
                            self.execute_v5_extension(insn);
                            if !self.branch_taken {
                                self.registers.set_program_counter(pc.wrapping_add(4));
                            }
                        } else {
                            // Squashed: one cycle, PC moves on.
                            self.registers.set_program_counter(pc.wrapping_add(4));
                        }
                    } else if self.cpsr().can_execute(Condition::from(cond_bits)) {
                        let decoded = ArmInstruction::from(insn);
                        self.execute_arm(decoded);
                        if !self.branch_taken {
                            self.registers.set_program_counter(pc.wrapping_add(4));
                        }
                    } else {
                        self.registers.set_program_counter(pc.wrapping_add(4));
                    }
                }
                self.spend(1);
            }

            if self.icount <= 0 || self.mode_changed {
                self.mode_changed = false;
                return;
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::bus::LinearMemory;
    use crate::cpu::registers::REG_LR;
    use pretty_assertions::assert_eq;

    /// 4 MiB of zeroed RAM behind an ARM9 core, the workhorse of the unit
    /// tests.
    pub(crate) fn make_cpu() -> Arm7Cpu {
        let bus = Arc::new(Mutex::new(LinearMemory::new(0x40_0000, Endianness::Little)));
        Arm7Cpu::arm9(bus, 200_000_000)
    }

    pub(crate) fn write_words(cpu: &Arm7Cpu, address: u32, words: &[u32]) {
        let mut bus = cpu.bus.lock().unwrap();
        for (i, word) in words.iter().enumerate() {
            bus.write_word(address + (i as u32) * 4, *word);
        }
    }

    #[test]
    fn reset_state() {
        let cpu = make_cpu();

        assert_eq!(cpu.cpsr().mode(), Mode::Supervisor);
        assert!(cpu.cpsr().irq_disable());
        assert!(cpu.cpsr().fiq_disable());
        assert!(!cpu.cpsr().state_bit());
        assert_eq!(cpu.registers.program_counter(), 0);
        assert!(!cpu.pending.any);
    }

    #[test]
    fn mov_immediate_end_to_end() {
        let mut cpu = make_cpu();
        // MOV R1, #0x80000000
        write_words(&cpu, 0, &[0xE3A0_1102]);

        cpu.execute(1);

        assert_eq!(cpu.reg(1), 0x8000_0000);
        assert!(!cpu.cpsr().sign_flag());
        assert_eq!(cpu.registers.program_counter(), 4);
    }

    #[test]
    fn branch_with_link_end_to_end() {
        let mut cpu = make_cpu();
        // BL with offset field 0x0E: 14 words forward of PC+8.
        write_words(&cpu, 0x8000, &[0xEB00_000E]);
        cpu.registers.set_program_counter(0x8000);

        cpu.execute(1);

        assert_eq!(cpu.reg(REG_LR as u32), 0x8004);
        assert_eq!(cpu.registers.program_counter(), 0x8040);
    }

    #[test]
    fn condition_false_costs_one_cycle_and_advances_pc() {
        let mut cpu = make_cpu();
        // MOVEQ R1, #1 with Z clear.
        write_words(&cpu, 0, &[0x03A0_1001]);

        let consumed = cpu.execute(1);

        assert_eq!(consumed, 1);
        assert_eq!(cpu.reg(1), 0);
        assert_eq!(cpu.registers.program_counter(), 4);
        assert_eq!(cpu.cpsr().bits() & 0xF000_0000, 0);
    }

    #[test]
    fn nv_condition_squashes_on_v4() {
        let bus = Arc::new(Mutex::new(LinearMemory::new(0x1000, Endianness::Little)));
        let mut cpu = Arm7Cpu::arm7(bus, 16_000_000);
        // An NV-space word that would be BLX on v5.
        write_words(&cpu, 0, &[0xFA00_0000]);

        cpu.execute(1);

        assert_eq!(cpu.registers.program_counter(), 4);
        assert_eq!(cpu.reg(REG_LR as u32), 0);
    }

    #[test]
    fn instruction_hook_sees_each_pc() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let mut cpu = make_cpu();
        write_words(&cpu, 0, &[0xE1A0_0000, 0xE1A0_0000]); // MOV R0, R0 twice

        static LAST: AtomicU32 = AtomicU32::new(0xFFFF_FFFF);
        cpu.set_instruction_hook(Some(Box::new(|pc| {
            LAST.store(pc, Ordering::Relaxed);
        })));

        cpu.execute(2);

        assert_eq!(LAST.load(Ordering::Relaxed), 4);
        assert_eq!(cpu.total_cycles(), 2);
    }

    #[test]
    fn mmu_off_addresses_are_physical() {
        let mut cpu = make_cpu();
        write_words(&cpu, 0x2000, &[0x1234_5678]);

        assert_eq!(cpu.read32(0x2000), 0x1234_5678);

        cpu.write32(0x3000, 0xAABB_CCDD);
        assert_eq!(cpu.bus_read_word(0x3000), 0xAABB_CCDD);
    }

    #[test]
    fn prefetch_and_demand_fetch_agree() {
        let program = [
            0xE3A0_0005_u32, // MOV R0, #5
            0xE280_0003,     // ADD R0, R0, #3
            0xE040_1000,     // SUB R1, R0, R0
        ];

        let mut demand = make_cpu();
        write_words(&demand, 0, &program);
        demand.execute(3);

        let mut prefetched = make_cpu();
        write_words(&prefetched, 0, &program);
        prefetched.set_prefetch_enabled(true);
        prefetched.execute(3);

        assert_eq!(demand.reg(0), 8);
        assert_eq!(prefetched.reg(0), 8);
        assert_eq!(demand.reg(1), 0);
        assert_eq!(prefetched.reg(1), 0);
        assert_eq!(
            demand.registers.program_counter(),
            prefetched.registers.program_counter()
        );
    }
}
