//! Simulated MMU: the two-level translation table walk.
//!
//! Translation starts at the 16 KiB first-level table pointed to by CP15
//! c2. Each first-level descriptor maps 1 MiB of virtual space and is
//! either a section, a pointer to a coarse (256-entry) or fine (1024-entry)
//! second-level table, or unmapped. Second-level descriptors map large
//! (64 KiB), small (4 KiB) or tiny (1 KiB) pages.
//!
//! Access permission is a function of five inputs: the access-control code
//! of the descriptor's domain, the AP bits, the S and R control bits, the
//! operating mode and the access direction. The full function is
//! materialized into a 512-entry decision table whenever the control
//! register changes, so the walk itself only does table lookups.
//!
//! Virtual addresses below 32 MiB are first remapped by the fast context
//! switch PID offset.

use logger::log;

use crate::cpu::core::Arm7Cpu;
use crate::cpu::cp15::{COPRO_CTRL_ROM, COPRO_CTRL_SYSTEM};

/// Descriptor kinds of the first translation level.
const DESC_UNMAPPED: u32 = 0;
const DESC_COARSE: u32 = 1;
const DESC_SECTION: u32 = 2;
const DESC_FINE: u32 = 3;

/// Descriptor kinds of the second translation level.
const PAGE_UNMAPPED: u32 = 0;
const PAGE_LARGE: u32 = 1;
const PAGE_SMALL: u32 = 2;
const PAGE_TINY: u32 = 3;

const SECTION_PAGE_MASK: u32 = 0xFFF0_0000;
const LARGE_PAGE_MASK: u32 = 0xFFFF_0000;
const SMALL_PAGE_MASK: u32 = 0xFFFF_F000;
const TINY_PAGE_MASK: u32 = 0xFFFF_FC00;

/// Write bit of a fault table index.
const TLB_WRITE: u32 = 1 << 8;

/// Fault status codes, low nibble of the FSR.
const FSR_SECTION_TRANSLATION: u32 = 5;
const FSR_PAGE_TRANSLATION: u32 = 7;
const FSR_SECTION_DOMAIN: u32 = 9;
const FSR_PAGE_DOMAIN: u32 = 11;
const FSR_SECTION_PERMISSION: u32 = 13;
const FSR_PAGE_PERMISSION: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    None,
    Domain,
    Permission,
}

/// Outcome of a failed data-side translation. The same information has
/// been latched into FSR/FAR by the time this is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbFault {
    pub status: u32,
    pub address: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataAccess {
    Read,
    Write,
}

/// The reference permission function the decision table is built from.
///
/// `access_control` is the domain's DACR code, `ap` the descriptor
/// permission bits, `mode_index` the low four mode bits (0 = User).
pub(crate) fn decode_fault(
    mode_index: u32,
    ap: u32,
    access_control: u32,
    system: bool,
    rom: bool,
    write: bool,
) -> FaultKind {
    match access_control & 3 {
        // No access: any access generates a domain fault.
        0 => FaultKind::Domain,

        // Client: checked against the descriptor's AP bits.
        1 => match ap & 3 {
            0 => {
                if system {
                    if rom {
                        // Reserved, assume the S=0/R=0 behavior.
                        FaultKind::Permission
                    } else if mode_index == 0 || write {
                        // Only supervisor reads are permitted.
                        FaultKind::Permission
                    } else {
                        FaultKind::None
                    }
                } else if rom {
                    // Read-only for everyone.
                    if write {
                        FaultKind::Permission
                    } else {
                        FaultKind::None
                    }
                } else {
                    // Any access generates a permission fault.
                    FaultKind::Permission
                }
            }
            1 => {
                if mode_index == 0 {
                    FaultKind::Permission
                } else {
                    FaultKind::None
                }
            }
            2 => {
                if mode_index == 0 && write {
                    FaultKind::Permission
                } else {
                    FaultKind::None
                }
            }
            _ => FaultKind::None,
        },

        // Reserved: currently behaves like no access.
        2 => FaultKind::Domain,

        // Manager: AP bits are not checked.
        _ => FaultKind::None,
    }
}

impl Arm7Cpu {
    /// Rebuilds the 512-entry fault decision table. Keys are
    /// `(write << 8) | (access_control << 6) | (ap << 4) | mode_low4`.
    pub(crate) fn update_fault_table(&mut self) {
        let system = self.cp15.control & COPRO_CTRL_SYSTEM != 0;
        let rom = self.cp15.control & COPRO_CTRL_ROM != 0;

        for mode in 0..16 {
            for ap in 0..4 {
                for access_control in 0..4 {
                    for write in 0..2 {
                        let index = (write << 8) | (access_control << 6) | (ap << 4) | mode;
                        self.fault_table[index as usize] =
                            decode_fault(mode, ap, access_control, system, rom, write != 0);
                    }
                }
            }
        }
    }

    /// Fault table lookup. `ap` arrives pre-shifted into bits 5..4 and
    /// `write` is either 0 or [`TLB_WRITE`].
    fn detect_fault(&self, desc_lvl1: u32, ap: u32, write: u32) -> FaultKind {
        let domain = ((desc_lvl1 >> 5) & 0xF) as usize;
        let index = self.cpsr().mode().fault_index()
            | ap
            | u32::from(self.cp15.decoded_access_control[domain])
            | write;
        self.fault_table[index as usize]
    }

    fn first_level_descriptor(&mut self, addr: u32) -> u32 {
        let desc_address = self.cp15.ttb_base | ((addr >> 20) << 2);
        self.bus_read_word(desc_address)
    }

    fn second_level_descriptor(&mut self, desc_lvl1: u32, addr: u32) -> u32 {
        let desc_address = if desc_lvl1 & 3 == DESC_COARSE {
            (desc_lvl1 & 0xFFFF_FC00) | ((addr & 0x000F_F000) >> 10)
        } else {
            debug_assert_eq!(desc_lvl1 & 3, DESC_FINE);
            (desc_lvl1 & 0xFFFF_F000) | ((addr & 0x000F_FC00) >> 8)
        };
        self.bus_read_word(desc_address)
    }

    fn raise_data_fault(&mut self, status: u32, address: u32) -> TlbFault {
        self.cp15.fault_status[0] = status;
        self.cp15.fault_address = address;
        self.pending.abort_data = true;
        self.pending.update();
        TlbFault { status, address }
    }

    /// Walks the translation tables for a data access. On a fault the FSR
    /// and FAR are latched, a data abort is made pending and `Err` is
    /// returned; the access itself must then be suppressed.
    pub fn translate(&mut self, vaddr: u32, access: DataAccess) -> Result<u32, TlbFault> {
        let mut addr = vaddr;
        if addr < 0x0200_0000 {
            addr += self.cp15.pid_offset;
        }

        let write = match access {
            DataAccess::Read => 0,
            DataAccess::Write => TLB_WRITE,
        };

        let desc_lvl1 = self.first_level_descriptor(addr);
        match desc_lvl1 & 3 {
            DESC_SECTION => {
                let fault = self.detect_fault(desc_lvl1, (desc_lvl1 >> 6) & 0x30, write);
                if fault == FaultKind::None {
                    Ok((desc_lvl1 & SECTION_PAGE_MASK) | (addr & !SECTION_PAGE_MASK))
                } else {
                    let domain = (desc_lvl1 >> 5) & 0xF;
                    let code = if fault == FaultKind::Domain {
                        FSR_SECTION_DOMAIN
                    } else {
                        FSR_SECTION_PERMISSION
                    };
                    log(format!(
                        "mmu: section {:?} fault, vaddr = {addr:#010X}, PC = {:#010X}",
                        fault,
                        self.registers.program_counter()
                    ));
                    Err(self.raise_data_fault(code | (domain << 4), addr))
                }
            }
            DESC_UNMAPPED => {
                log(format!(
                    "mmu: translation fault on unmapped vaddr = {addr:#010X}, PC = {:#010X}",
                    self.registers.program_counter()
                ));
                Err(self.raise_data_fault(FSR_SECTION_TRANSLATION, addr))
            }
            _ => {
                let domain = (desc_lvl1 >> 5) & 0xF;
                let permission = (self.cp15.domain_access_control >> ((desc_lvl1 >> 4) & 0x1E)) & 3;
                let desc_lvl2 = self.second_level_descriptor(desc_lvl1, addr);
                if permission != 1 && permission != 3 {
                    // The reference behavior for this path is a hard stop;
                    // mistranslating silently would be worse.
                    log(format!(
                        "mmu: page table domain fault unimplemented, vaddr = {addr:#010X}, domain = {domain}"
                    ));
                    panic!(
                        "page table domain fault unimplemented: vaddr = {addr:#010X}, domain = {domain}, PC = {:#010X}",
                        self.registers.program_counter()
                    );
                }

                match desc_lvl2 & 3 {
                    PAGE_UNMAPPED => {
                        log(format!(
                            "mmu: page translation fault, vaddr = {addr:#010X}, PC = {:#010X}",
                            self.registers.program_counter()
                        ));
                        Err(self.raise_data_fault(FSR_PAGE_TRANSLATION | (domain << 4), addr))
                    }
                    PAGE_LARGE => Ok((desc_lvl2 & LARGE_PAGE_MASK) | (addr & !LARGE_PAGE_MASK)),
                    PAGE_SMALL => {
                        let ap = ((((desc_lvl2 >> 4) & 0xFF) >> (((addr >> 10) & 3) << 1)) & 3) << 4;
                        let fault = self.detect_fault(desc_lvl1, ap, write);
                        if fault == FaultKind::None {
                            Ok((desc_lvl2 & SMALL_PAGE_MASK) | (addr & !SMALL_PAGE_MASK))
                        } else {
                            let code = if fault == FaultKind::Domain {
                                FSR_PAGE_DOMAIN
                            } else {
                                FSR_PAGE_PERMISSION
                            };
                            log(format!(
                                "mmu: page {:?} fault, vaddr = {addr:#010X}, PC = {:#010X}",
                                fault,
                                self.registers.program_counter()
                            ));
                            Err(self.raise_data_fault(code | (domain << 4), addr))
                        }
                    }
                    _ => {
                        debug_assert_eq!(desc_lvl2 & 3, PAGE_TINY);
                        if desc_lvl1 & 3 == DESC_COARSE {
                            log(format!(
                                "mmu: tiny page reached through a coarse table, vaddr = {addr:#010X}"
                            ));
                        }
                        Ok((desc_lvl2 & TINY_PAGE_MASK) | (addr & !TINY_PAGE_MASK))
                    }
                }
            }
        }
    }

    /// The light-weight walk used to fill the prefetch queue: checks read
    /// permission but never latches a fault. The abort, if any, is raised
    /// when the fetched slot reaches execution.
    pub fn translate_check(&mut self, vaddr: u32) -> Option<u32> {
        let mut addr = vaddr;
        if addr < 0x0200_0000 {
            addr += self.cp15.pid_offset;
        }

        let desc_lvl1 = self.first_level_descriptor(addr);
        match desc_lvl1 & 3 {
            DESC_SECTION => {
                if self.detect_fault(desc_lvl1, (desc_lvl1 >> 6) & 0x30, 0) == FaultKind::None {
                    Some((desc_lvl1 & SECTION_PAGE_MASK) | (addr & !SECTION_PAGE_MASK))
                } else {
                    None
                }
            }
            DESC_UNMAPPED => None,
            _ => {
                let permission = (self.cp15.domain_access_control >> ((desc_lvl1 >> 4) & 0x1E)) & 3;
                let desc_lvl2 = self.second_level_descriptor(desc_lvl1, addr);
                if permission != 1 && permission != 3 {
                    let domain = (desc_lvl1 >> 5) & 0xF;
                    panic!(
                        "page table domain fault unimplemented: vaddr = {addr:#010X}, domain = {domain}, PC = {:#010X}",
                        self.registers.program_counter()
                    );
                }

                match desc_lvl2 & 3 {
                    PAGE_UNMAPPED => None,
                    PAGE_LARGE => Some((desc_lvl2 & LARGE_PAGE_MASK) | (addr & !LARGE_PAGE_MASK)),
                    PAGE_SMALL => {
                        let ap = ((((desc_lvl2 >> 4) & 0xFF) >> (((addr >> 10) & 3) << 1)) & 3) << 4;
                        if self.detect_fault(desc_lvl1, ap, 0) == FaultKind::None {
                            Some((desc_lvl2 & SMALL_PAGE_MASK) | (addr & !SMALL_PAGE_MASK))
                        } else {
                            None
                        }
                    }
                    _ => Some((desc_lvl2 & TINY_PAGE_MASK) | (addr & !TINY_PAGE_MASK)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::core::tests::{make_cpu, write_words};
    use crate::cpu::cp15::COPRO_CTRL_MMU_EN;
    use crate::cpu::cpu_modes::Mode;
    use pretty_assertions::assert_eq;

    const TTB: u32 = 0x4000;

    fn cp15_op(creg: u32) -> u32 {
        (creg << 16) | (15 << 8)
    }

    fn mmu_cpu() -> crate::cpu::core::Arm7Cpu {
        let mut cpu = make_cpu();
        cpu.cp15_write(cp15_op(2), TTB);
        // All domains client.
        cpu.cp15_write(cp15_op(3), 0x5555_5555);
        cpu.cp15_write(cp15_op(1), COPRO_CTRL_MMU_EN);
        cpu
    }

    #[test]
    fn fault_table_matches_reference_function() {
        let mut cpu = make_cpu();

        for control in [0, COPRO_CTRL_SYSTEM, COPRO_CTRL_ROM, COPRO_CTRL_SYSTEM | COPRO_CTRL_ROM] {
            cpu.cp15_write(cp15_op(1), control);
            let system = control & COPRO_CTRL_SYSTEM != 0;
            let rom = control & COPRO_CTRL_ROM != 0;

            for index in 0..512_u32 {
                let mode = index & 0xF;
                let ap = (index >> 4) & 3;
                let access_control = (index >> 6) & 3;
                let write = index >> 8 != 0;
                assert_eq!(
                    cpu.fault_table[index as usize],
                    decode_fault(mode, ap, access_control, system, rom, write),
                    "index {index:#X} control {control:#X}"
                );
            }
        }
    }

    #[test]
    fn section_maps_one_megabyte() {
        let mut cpu = mmu_cpu();
        // Section descriptor: base 0x0010_0000, domain 0, AP = 3.
        write_words(&cpu, TTB, &[0x0010_0C00 | 0x02]);

        assert_eq!(cpu.translate(0x0001_2345, DataAccess::Read), Ok(0x0011_2345));
        assert_eq!(cpu.translate_check(0x0001_2345), Some(0x0011_2345));
    }

    #[test]
    fn unmapped_section_latches_translation_fault() {
        let mut cpu = mmu_cpu();

        let fault = cpu.translate(0xC000_0000, DataAccess::Read).unwrap_err();

        assert_eq!(fault.status, 0x05);
        assert_eq!(fault.address, 0xC000_0000);
        assert_eq!(cpu.cp15.fault_status[0], 0x05);
        assert_eq!(cpu.cp15.fault_address, 0xC000_0000);
        assert!(cpu.pending.abort_data);
        assert!(cpu.pending.any);
    }

    #[test]
    fn section_permission_fault_in_user_mode() {
        let mut cpu = mmu_cpu();
        // AP = 1 (supervisor only), domain 2.
        write_words(&cpu, TTB, &[0x0010_0000 | (1 << 10) | (2 << 5) | 0x02]);

        assert!(cpu.translate(0x1000, DataAccess::Read).is_ok());

        cpu.switch_mode(Mode::User);
        let fault = cpu.translate(0x1000, DataAccess::Write).unwrap_err();

        // 13 = section permission, domain in bits 7..4.
        assert_eq!(fault.status, 13 | (2 << 4));
        assert_eq!(cpu.cp15.fault_status[0], 13 | (2 << 4));
    }

    #[test]
    fn read_only_section_faults_only_on_user_write() {
        let mut cpu = mmu_cpu();
        // AP = 2: user reads allowed, user writes fault.
        write_words(&cpu, TTB, &[0x0010_0000 | (2 << 10) | 0x02]);
        cpu.switch_mode(Mode::User);

        assert!(cpu.translate(0x1000, DataAccess::Read).is_ok());
        assert!(cpu.translate(0x1000, DataAccess::Write).is_err());
        assert_eq!(cpu.cp15.fault_status[0], 13);
    }

    #[test]
    fn small_page_walk() {
        let mut cpu = mmu_cpu();
        let coarse = 0x8000_u32;
        // First level: coarse table pointer, domain 0.
        write_words(&cpu, TTB, &[coarse | 0x01]);
        // Second level entry 1 maps vaddr 0x1000: small page at
        // 0x0020_0000, all subpage APs = 3.
        write_words(&cpu, coarse + 4, &[0x0020_0000 | (0xFF << 4) | 0x02]);

        assert_eq!(cpu.translate(0x1234, DataAccess::Write), Ok(0x0020_0234));
    }

    #[test]
    fn unmapped_small_page_reports_page_translation_fault() {
        let mut cpu = mmu_cpu();
        let coarse = 0x8000_u32;
        write_words(&cpu, TTB, &[coarse | (3 << 5) | 0x01]);

        let fault = cpu.translate(0x2345, DataAccess::Read).unwrap_err();

        // 7 = page translation, domain 3.
        assert_eq!(fault.status, 7 | (3 << 4));
    }

    #[test]
    fn large_page_walk() {
        let mut cpu = mmu_cpu();
        let coarse = 0x8000_u32;
        write_words(&cpu, TTB, &[coarse | 0x01]);
        // Entry for vaddr 0x8000: large page at 0x0030_0000. Real tables
        // replicate large descriptors 16 times; one entry is enough here.
        write_words(&cpu, coarse + 0x20, &[0x0030_0000 | (0xFF << 4) | 0x01]);

        assert_eq!(cpu.translate(0x0000_8123, DataAccess::Read), Ok(0x0030_8123));
    }

    #[test]
    fn pid_remaps_low_addresses() {
        let mut cpu = mmu_cpu();
        // Identity section for the PID=1 slot at 32 MiB.
        write_words(&cpu, TTB + ((0x0200_0000_u32 >> 20) << 2), &[0x0200_0C00 | 0x02]);
        cpu.cp15_write(cp15_op(13), 1 << 25);

        assert_eq!(cpu.translate(0x1000, DataAccess::Read), Ok(0x0200_1000));
    }

    #[test]
    fn translate_check_has_no_side_effects() {
        let mut cpu = mmu_cpu();

        assert_eq!(cpu.translate_check(0xC000_0000), None);

        assert_eq!(cpu.cp15.fault_status[0], 0);
        assert!(!cpu.pending.abort_data);
        assert!(!cpu.pending.any);
    }
}
