//! ARM instruction execution.
//!
//! One handler per decoded instruction family. R15 reads as the executing
//! instruction's address plus 8 (plus 12 when a register-specified shift
//! delays the operand read, or when it is the stored value of a memory
//! write), and any write to it goes through `set_pc` so the PC advance and
//! the prefetch queue stay consistent.

use logger::log;

use crate::bitwise::Bits;
use crate::cpu::alu::{self, adc_with_flags, add_with_flags, sbc_with_flags, sub_with_flags,
                      ArithmeticOpResult};
use crate::cpu::arm::instructions::{
    AluOp, ArmInstruction, HalfwordOffsetKind, SingleDataTransferOffset,
};
use crate::cpu::core::Arm7Cpu;
use crate::cpu::flags::{
    HalfwordTransferKind, Indexing, LoadStoreKind, Offsetting, OperandKind, ReadWriteKind,
    ShiftKind,
};
use crate::cpu::psr::Psr;

enum AluOutcome {
    Logical(u32),
    Arithmetic(ArithmeticOpResult),
}

impl Arm7Cpu {
    pub(crate) fn execute_arm(&mut self, decoded: ArmInstruction) {
        match decoded {
            ArmInstruction::DataProcessing {
                op,
                set_flags,
                op_kind,
                rn,
                rd,
                op2,
            } => self.data_processing(op, set_flags, op_kind, rn, rd, op2),
            ArmInstruction::Mrs { spsr, rd } => self.psr_mrs(spsr, rd),
            ArmInstruction::Msr {
                spsr,
                field_mask,
                op_kind,
                op2,
            } => self.psr_msr(spsr, field_mask, op_kind, op2),
            ArmInstruction::Multiply {
                accumulate,
                set_flags,
                rd,
                rn,
                rs,
                rm,
            } => self.multiply(accumulate, set_flags, rd, rn, rs, rm),
            ArmInstruction::MultiplyLong {
                signed,
                accumulate,
                set_flags,
                rd_hi,
                rd_lo,
                rs,
                rm,
            } => self.multiply_long(signed, accumulate, set_flags, rd_hi, rd_lo, rs, rm),
            ArmInstruction::SingleDataSwap {
                quantity,
                rn,
                rd,
                rm,
            } => self.single_data_swap(quantity, rn, rd, rm),
            ArmInstruction::BranchAndExchange { rm } => {
                let target = self.reg_for_op(rm, 8);
                self.bx(target);
            }
            ArmInstruction::BranchLinkExchange { rm } => {
                if self.config.arch_rev < 5 {
                    self.undefined_trap();
                    return;
                }
                let target = self.reg_for_op(rm, 8);
                let pc = self.registers.program_counter();
                self.registers.set_register_at(14, pc.wrapping_add(4));
                self.bx(target);
            }
            ArmInstruction::CountLeadingZeros { rd, rm } => {
                if self.config.arch_rev < 5 {
                    self.undefined_trap();
                    return;
                }
                let value = self.reg(rm);
                self.set_reg(rd, value.leading_zeros());
            }
            ArmInstruction::Saturating { op, rn, rd, rm } => {
                self.saturating_arithmetic(op, rn, rd, rm);
            }
            ArmInstruction::SignedMultiply {
                op,
                x,
                y,
                rd,
                rn,
                rs,
                rm,
            } => self.signed_multiply(op, x, y, rd, rn, rs, rm),
            ArmInstruction::HalfwordDataTransfer {
                indexing,
                offsetting,
                write_back,
                load_store,
                offset_kind,
                rn,
                rd,
                kind,
            } => self.halfword_data_transfer(
                indexing,
                offsetting,
                write_back,
                load_store,
                offset_kind,
                rn,
                rd,
                kind,
            ),
            ArmInstruction::SingleDataTransfer {
                load_store,
                quantity,
                write_back,
                indexing,
                offsetting,
                rd,
                rn,
                offset,
            } => self.single_data_transfer(
                load_store, quantity, write_back, indexing, offsetting, rd, rn, offset,
            ),
            ArmInstruction::BlockDataTransfer {
                indexing,
                offsetting,
                psr_user_bank,
                write_back,
                load_store,
                rn,
                register_list,
            } => self.block_data_transfer(
                indexing,
                offsetting,
                psr_user_bank,
                write_back,
                load_store,
                rn,
                register_list,
            ),
            ArmInstruction::Branch { link, offset } => self.branch(link, offset),
            ArmInstruction::CoprocessorRegisterTransfer {
                load_store,
                coprocessor,
                rd,
                opcode,
            } => self.coprocessor_register_transfer(load_store, coprocessor, rd, opcode),
            ArmInstruction::CoprocessorDataOperation { coprocessor } => {
                self.coprocessor_data_operation(coprocessor);
            }
            ArmInstruction::CoprocessorDataTransfer { coprocessor } => {
                self.coprocessor_data_transfer(coprocessor);
            }
            ArmInstruction::SoftwareInterrupt => self.software_interrupt(),
            ArmInstruction::Undefined => self.undefined_trap(),
        }
    }

    /// Resolves operand 2 of a data-processing instruction: either the
    /// rotated 8-bit immediate or a shifted register. Returns the value
    /// and the shifter carry-out.
    fn shifter_operand(
        &self,
        op_kind: OperandKind,
        op2: u32,
        pc_offset: u32,
        carry_in: bool,
    ) -> (u32, bool) {
        match op_kind {
            OperandKind::Immediate => {
                let imm = op2 & 0xFF;
                let rotate = (op2 >> 8) & 0xF;
                if rotate == 0 {
                    (imm, carry_in)
                } else {
                    let value = imm.rotate_right(rotate * 2);
                    (value, value.get_bit(31))
                }
            }
            OperandKind::Register => {
                let rm = op2 & 0xF;
                let rm_value = self.reg_for_op(rm, pc_offset);
                let shift_kind = ShiftKind::from((op2 >> 5) & 3);

                let amount = if op2.get_bit(4) {
                    // Shift amount from the bottom byte of Rs. Zero leaves
                    // both the operand and the carry untouched.
                    let rs = (op2 >> 8) & 0xF;
                    let amount = self.reg(rs) & 0xFF;
                    if amount == 0 {
                        return (rm_value, carry_in);
                    }
                    amount
                } else {
                    (op2 >> 7) & 0x1F
                };

                let shifted = alu::shift(shift_kind, amount, rm_value, carry_in);
                (shifted.result, shifted.carry)
            }
        }
    }

    pub(crate) fn data_processing(
        &mut self,
        op: AluOp,
        set_flags: bool,
        op_kind: OperandKind,
        rn: u32,
        rd: u32,
        op2: u32,
    ) {
        let shift_by_register = op_kind == OperandKind::Register && op2.get_bit(4);
        // A register-specified shift stalls the pipeline one cycle, which
        // also moves the visible R15 ahead to +12.
        let pc_offset = if shift_by_register {
            self.spend(1);
            12
        } else {
            8
        };

        let carry_in = self.cpsr().carry_flag();
        let op1 = self.reg_for_op(rn, pc_offset);
        let (op2_value, shifter_carry) = self.shifter_operand(op_kind, op2, pc_offset, carry_in);

        use AluOp::{Adc, Add, And, Bic, Cmn, Cmp, Eor, Mov, Mvn, Orr, Rsb, Rsc, Sbc, Sub, Teq,
                    Tst};
        let outcome = match op {
            And | Tst => AluOutcome::Logical(op1 & op2_value),
            Eor | Teq => AluOutcome::Logical(op1 ^ op2_value),
            Orr => AluOutcome::Logical(op1 | op2_value),
            Bic => AluOutcome::Logical(op1 & !op2_value),
            Mov => AluOutcome::Logical(op2_value),
            Mvn => AluOutcome::Logical(!op2_value),
            Add | Cmn => AluOutcome::Arithmetic(add_with_flags(op1, op2_value)),
            Sub | Cmp => AluOutcome::Arithmetic(sub_with_flags(op1, op2_value)),
            Rsb => AluOutcome::Arithmetic(sub_with_flags(op2_value, op1)),
            Adc => AluOutcome::Arithmetic(adc_with_flags(op1, op2_value, carry_in)),
            Sbc => AluOutcome::Arithmetic(sbc_with_flags(op1, op2_value, carry_in)),
            Rsc => AluOutcome::Arithmetic(sbc_with_flags(op2_value, op1, carry_in)),
        };

        let result = match outcome {
            AluOutcome::Logical(value) => value,
            AluOutcome::Arithmetic(r) => r.result,
        };

        if set_flags {
            if rd == 15 && !op.is_test() {
                // The canonical exception return: restore the CPSR from
                // the active SPSR before the jump below.
                let spsr = self.registers.spsr();
                self.set_cpsr(spsr);
            } else {
                let mut cpsr = self.cpsr();
                match outcome {
                    AluOutcome::Logical(value) => {
                        cpsr.set_sign_flag(value.get_bit(31));
                        cpsr.set_zero_flag(value == 0);
                        cpsr.set_carry_flag(shifter_carry);
                    }
                    AluOutcome::Arithmetic(r) => cpsr.set_flags(r),
                }
                self.registers.set_cpsr_raw(cpsr.into());
            }
        }

        if !op.is_test() {
            if rd == 15 {
                let mask = if self.cpsr().state_bit() { !1 } else { !3 };
                self.set_pc(result & mask);
                self.spend(2);
            } else {
                self.set_reg(rd, result);
            }
        }
    }

    fn psr_mrs(&mut self, spsr: bool, rd: u32) {
        // In User and System the SPSR slot aliases the CPSR, so reading it
        // from there falls back to the CPSR rather than faulting.
        let psr = if spsr {
            self.registers.spsr()
        } else {
            self.cpsr()
        };
        self.set_reg(rd, psr.into());
    }

    fn psr_msr(&mut self, spsr: bool, field_mask: u32, op_kind: OperandKind, op2: u32) {
        let value = match op_kind {
            OperandKind::Immediate => {
                let imm = op2 & 0xFF;
                imm.rotate_right(((op2 >> 8) & 0xF) * 2)
            }
            OperandKind::Register => self.reg(op2 & 0xF),
        };

        let privileged = self.cpsr().mode().is_privileged();
        let mut mask = 0_u32;
        if field_mask.get_bit(3) {
            mask |= 0xFF00_0000;
        }
        if field_mask.get_bit(2) {
            mask |= 0x00FF_0000;
        }
        if field_mask.get_bit(1) {
            mask |= 0x0000_FF00;
        }
        // The control byte is privileged.
        if field_mask.get_bit(0) && privileged {
            mask |= 0x0000_00FF;
        }

        if spsr {
            if !self.cpsr().mode().has_spsr() {
                tracing::warn!("MSR to the SPSR of a mode without one, ignored");
                return;
            }
            let old = self.registers.spsr().bits();
            self.registers
                .set_spsr(Psr::from((old & !mask) | (value & mask)));
        } else {
            let old = self.cpsr().bits();
            let new = (old & !mask) | (value & mask);
            if Psr::from(new).state_bit() != self.cpsr().state_bit() {
                log("MSR flips the T bit, software should never do this");
            }
            self.set_cpsr(Psr::from(new));
        }
    }

    fn multiply(&mut self, accumulate: bool, set_flags: bool, rd: u32, rn: u32, rs: u32, rm: u32) {
        let mut result = self.reg(rm).wrapping_mul(self.reg(rs));
        if accumulate {
            result = result.wrapping_add(self.reg(rn));
            self.spend(1);
        }
        self.set_reg(rd, result);

        if set_flags {
            let mut cpsr = self.cpsr();
            cpsr.set_sign_flag(result.get_bit(31));
            cpsr.set_zero_flag(result == 0);
            self.registers.set_cpsr_raw(cpsr.into());
        }
        self.spend(1);
    }

    #[allow(clippy::too_many_arguments)]
    fn multiply_long(
        &mut self,
        signed: bool,
        accumulate: bool,
        set_flags: bool,
        rd_hi: u32,
        rd_lo: u32,
        rs: u32,
        rm: u32,
    ) {
        let mut result = if signed {
            (i64::from(self.reg(rm) as i32) * i64::from(self.reg(rs) as i32)) as u64
        } else {
            u64::from(self.reg(rm)) * u64::from(self.reg(rs))
        };

        if accumulate {
            let acc = (u64::from(self.reg(rd_hi)) << 32) | u64::from(self.reg(rd_lo));
            result = result.wrapping_add(acc);
            self.spend(1);
        }

        self.set_reg(rd_lo, result as u32);
        self.set_reg(rd_hi, (result >> 32) as u32);

        if set_flags {
            let mut cpsr = self.cpsr();
            cpsr.set_sign_flag(result >> 63 != 0);
            cpsr.set_zero_flag(result == 0);
            self.registers.set_cpsr_raw(cpsr.into());
        }
        self.spend(2);
    }

    fn single_data_swap(&mut self, quantity: ReadWriteKind, rn: u32, rd: u32, rm: u32) {
        let address = self.reg(rn);
        let had_abort = self.pending.abort_data;

        let loaded = match quantity {
            ReadWriteKind::Word => self.read32(address),
            ReadWriteKind::Byte => self.read8(address),
        };
        if !had_abort && self.pending.abort_data {
            self.spend(3);
            return;
        }

        let stored = self.reg(rm);
        match quantity {
            ReadWriteKind::Word => self.write32(address, stored),
            ReadWriteKind::Byte => self.write8(address, stored as u8),
        }
        self.set_reg(rd, loaded);
        self.spend(3);
    }

    /// Shared BX semantics: bit 0 of the target selects the state.
    pub(crate) fn bx(&mut self, target: u32) {
        let thumb = target.get_bit(0);
        if thumb && !self.config.thumb {
            // A Thumb-less core (StrongARM, ARM7500) traps the exchange.
            log("BX to Thumb state on a core without the Thumb set");
            self.undefined_trap();
            return;
        }
        let mut cpsr = self.cpsr();
        cpsr.set_state_bit(thumb);
        self.set_cpsr(cpsr);

        self.set_pc(if thumb { target & !1 } else { target & !3 });
        self.spend(2);
    }

    #[allow(clippy::too_many_arguments)]
    fn halfword_data_transfer(
        &mut self,
        indexing: Indexing,
        offsetting: Offsetting,
        write_back: bool,
        load_store: LoadStoreKind,
        offset_kind: HalfwordOffsetKind,
        rn: u32,
        rd: u32,
        kind: HalfwordTransferKind,
    ) {
        let offset = match offset_kind {
            HalfwordOffsetKind::Immediate { offset } => offset,
            HalfwordOffsetKind::Register { rm } => self.reg_for_op(rm, 8),
        };

        let base = self.reg_for_op(rn, 8);
        let effective = match offsetting {
            Offsetting::Up => base.wrapping_add(offset),
            Offsetting::Down => base.wrapping_sub(offset),
        };
        let address = match indexing {
            Indexing::Pre => effective,
            Indexing::Post => base,
        };

        let mut aborted = false;
        match load_store {
            LoadStoreKind::Store => {
                let value = self.reg_for_op(rd, 12);
                self.write16(address, value as u16);
                self.spend(1);
            }
            LoadStoreKind::Load => {
                let had_abort = self.pending.abort_data;
                let value = match kind {
                    HalfwordTransferKind::UnsignedHalfwords => self.read16(address),
                    HalfwordTransferKind::SignedByte => self.read8(address).sign_extended(8),
                    HalfwordTransferKind::SignedHalfwords => {
                        if address & 1 != 0 {
                            // A misaligned signed halfword degrades to a
                            // sign-extended byte on this core family.
                            self.read8(address).sign_extended(8)
                        } else {
                            self.read16(address).sign_extended(16)
                        }
                    }
                };
                aborted = !had_abort && self.pending.abort_data;
                if !aborted {
                    self.set_reg(rd, value);
                }
                self.spend(2);
            }
        }

        if indexing == Indexing::Post || write_back {
            let load_overwrote_base = load_store == LoadStoreKind::Load && rd == rn && !aborted;
            if !load_overwrote_base && rn != 15 {
                self.registers.set_register_at(rn as usize, effective);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn single_data_transfer(
        &mut self,
        load_store: LoadStoreKind,
        quantity: ReadWriteKind,
        write_back: bool,
        indexing: Indexing,
        offsetting: Offsetting,
        rd: u32,
        rn: u32,
        offset: SingleDataTransferOffset,
    ) {
        let amount = match offset {
            SingleDataTransferOffset::Immediate { offset } => offset,
            SingleDataTransferOffset::Register {
                rm,
                shift_kind,
                amount,
            } => {
                let value = self.reg_for_op(rm, 8);
                alu::shift(shift_kind, amount, value, self.cpsr().carry_flag()).result
            }
        };

        let base = self.reg_for_op(rn, 8);
        let effective = match offsetting {
            Offsetting::Up => base.wrapping_add(amount),
            Offsetting::Down => base.wrapping_sub(amount),
        };
        let address = match indexing {
            Indexing::Pre => effective,
            Indexing::Post => base,
        };

        let mut aborted = false;
        match load_store {
            LoadStoreKind::Load => {
                let had_abort = self.pending.abort_data;
                let value = match quantity {
                    ReadWriteKind::Word => self.read32(address),
                    ReadWriteKind::Byte => self.read8(address),
                };
                aborted = !had_abort && self.pending.abort_data;
                if !aborted {
                    if rd == 15 {
                        if self.config.arch_rev >= 5 {
                            // v5 loads to PC interwork on bit 0.
                            self.bx(value);
                        } else {
                            self.set_pc(value & !3);
                            self.spend(2);
                        }
                    } else {
                        self.set_reg(rd, value);
                    }
                }
                self.spend(2);
            }
            LoadStoreKind::Store => {
                let value = self.reg_for_op(rd, 12);
                match quantity {
                    ReadWriteKind::Word => self.write32(address, value),
                    ReadWriteKind::Byte => self.write8(address, value as u8),
                }
                self.spend(1);
            }
        }

        if indexing == Indexing::Post || write_back {
            let load_overwrote_base = load_store == LoadStoreKind::Load && rd == rn && !aborted;
            if !load_overwrote_base && rn != 15 {
                self.registers.set_register_at(rn as usize, effective);
            }
        }
    }

    fn block_register(&self, r: u32, force_user: bool) -> u32 {
        if force_user {
            self.registers.user_register_at(r as usize)
        } else {
            self.reg(r)
        }
    }

    fn set_block_register(&mut self, r: u32, force_user: bool, value: u32) {
        if force_user {
            self.registers.set_user_register_at(r as usize, value);
        } else {
            self.registers.set_register_at(r as usize, value);
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn block_data_transfer(
        &mut self,
        indexing: Indexing,
        offsetting: Offsetting,
        psr_user_bank: bool,
        write_back: bool,
        load_store: LoadStoreKind,
        rn: u32,
        register_list: u32,
    ) {
        let rlist = register_list & 0xFFFF;
        if rlist == 0 {
            log("block transfer with an empty register list ignored");
            self.spend(1);
            return;
        }

        let count = rlist.count_ones();
        // S without R15 in a load list (or any S store) transfers the User
        // bank; S with a loaded R15 is the SPSR-restoring return instead.
        let force_user =
            psr_user_bank && (load_store == LoadStoreKind::Store || !rlist.get_bit(15));

        let base = self.block_register(rn, force_user);
        let (mut address, final_base) = match offsetting {
            Offsetting::Up => (
                if indexing == Indexing::Pre {
                    base.wrapping_add(4)
                } else {
                    base
                },
                base.wrapping_add(4 * count),
            ),
            Offsetting::Down => (
                if indexing == Indexing::Pre {
                    base.wrapping_sub(4 * count)
                } else {
                    base.wrapping_sub(4 * count).wrapping_add(4)
                },
                base.wrapping_sub(4 * count),
            ),
        };

        match load_store {
            LoadStoreKind::Load => {
                // Writeback lands first; a base in the list wins below by
                // overwriting it with the loaded value.
                if write_back && rn != 15 {
                    self.set_block_register(rn, force_user, final_base);
                }

                for r in 0..16 {
                    if !rlist.get_bit(r as u8) {
                        continue;
                    }

                    let had_abort = self.pending.abort_data;
                    let value = self.read32(address);
                    if !had_abort && self.pending.abort_data {
                        break;
                    }

                    if r == 15 {
                        if psr_user_bank {
                            let spsr = self.registers.spsr();
                            self.set_cpsr(spsr);
                        }
                        let mask = if self.cpsr().state_bit() { !1 } else { !3 };
                        self.set_pc(value & mask);
                        self.spend(2);
                    } else {
                        self.set_block_register(r, force_user, value);
                    }
                    address = address.wrapping_add(4);
                }
            }
            LoadStoreKind::Store => {
                let mut first = true;
                for r in 0..16 {
                    if !rlist.get_bit(r as u8) {
                        continue;
                    }

                    let value = if r == 15 {
                        self.registers.program_counter().wrapping_add(12)
                    } else {
                        self.block_register(r, force_user)
                    };
                    self.write32(address, value);

                    // Writeback after the first transfer: a base that is
                    // the first register in the list stores its original
                    // value, a later one stores the updated base.
                    if first {
                        if write_back && rn != 15 {
                            self.set_block_register(rn, force_user, final_base);
                        }
                        first = false;
                    }
                    address = address.wrapping_add(4);
                }
            }
        }

        self.spend(count as i32 + 1);
    }

    pub(crate) fn branch(&mut self, link: bool, offset: i32) {
        let pc = self.registers.program_counter();
        if link {
            self.registers.set_register_at(14, pc.wrapping_add(4));
        }
        self.set_pc(pc.wrapping_add(8).wrapping_add(offset as u32));
        self.spend(2);
    }

    fn coprocessor_register_transfer(
        &mut self,
        load_store: LoadStoreKind,
        coprocessor: u32,
        rd: u32,
        opcode: u32,
    ) {
        match load_store {
            // MRC
            LoadStoreKind::Load => {
                let data = if coprocessor == 15 {
                    self.cp15_read(opcode)
                } else if coprocessor == 14 && self.config.xscale {
                    self.cp14_read(opcode)
                } else {
                    log(format!("unhandled coprocessor {coprocessor} read"));
                    self.pending.undefined = true;
                    self.pending.update();
                    return;
                };

                if rd == 15 {
                    // MRC to R15 updates the flags instead.
                    let mut cpsr = self.cpsr();
                    cpsr.set_sign_flag(data.get_bit(31));
                    cpsr.set_zero_flag(data.get_bit(30));
                    cpsr.set_carry_flag(data.get_bit(29));
                    cpsr.set_overflow_flag(data.get_bit(28));
                    self.registers.set_cpsr_raw(cpsr.into());
                } else {
                    self.set_reg(rd, data);
                }
            }
            // MCR
            LoadStoreKind::Store => {
                let value = self.reg_for_op(rd, 8);
                if coprocessor == 15 {
                    self.cp15_write(opcode, value);
                } else if coprocessor == 14 && self.config.xscale {
                    self.cp14_write(opcode, value);
                } else {
                    log(format!("unhandled coprocessor {coprocessor} write"));
                    self.pending.undefined = true;
                    self.pending.update();
                }
            }
        }
        self.spend(1);
    }

    fn coprocessor_data_operation(&mut self, coprocessor: u32) {
        log(format!("CDP on coprocessor {coprocessor}"));
        self.pending.undefined = true;
        self.pending.update();
    }

    fn coprocessor_data_transfer(&mut self, coprocessor: u32) {
        if self.config.xscale && coprocessor == 0 {
            // The XScale DSP coprocessor eats its loads and stores.
            log("LDC/STC to the XScale DSP coprocessor ignored");
            return;
        }
        log(format!("LDC/STC on coprocessor {coprocessor}"));
        self.pending.undefined = true;
        self.pending.update();
    }

    pub(crate) fn software_interrupt(&mut self) {
        self.pending.swi = true;
        self.pending.update();
    }

    pub(crate) fn undefined_trap(&mut self) {
        self.pending.undefined = true;
        self.pending.update();
    }
}
