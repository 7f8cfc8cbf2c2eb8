//! ARM instruction decoding.
//!
//! The 32-bit opcode (condition already stripped by the execute loop)
//! decodes into one [`ArmInstruction`] variant. Family selection follows
//! bits 27..20 with the bits 7..4 sub-decode disambiguating the multiply,
//! swap and halfword-transfer encodings that share the data-processing
//! space.

use logger::log;

use crate::bitwise::Bits;
use crate::cpu::flags::{
    HalfwordTransferKind, Indexing, LoadStoreKind, Offsetting, OperandKind, ReadWriteKind,
    ShiftKind,
};

/// The sixteen data-processing operations, in encoding order.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum AluOp {
    And = 0x0,
    Eor = 0x1,
    Sub = 0x2,
    Rsb = 0x3,
    Add = 0x4,
    Adc = 0x5,
    Sbc = 0x6,
    Rsc = 0x7,
    Tst = 0x8,
    Teq = 0x9,
    Cmp = 0xA,
    Cmn = 0xB,
    Orr = 0xC,
    Mov = 0xD,
    Bic = 0xE,
    Mvn = 0xF,
}

impl From<u32> for AluOp {
    fn from(bits: u32) -> Self {
        use AluOp::{Adc, Add, And, Bic, Cmn, Cmp, Eor, Mov, Mvn, Orr, Rsb, Rsc, Sbc, Sub, Teq,
                    Tst};
        match bits & 0xF {
            0x0 => And,
            0x1 => Eor,
            0x2 => Sub,
            0x3 => Rsb,
            0x4 => Add,
            0x5 => Adc,
            0x6 => Sbc,
            0x7 => Rsc,
            0x8 => Tst,
            0x9 => Teq,
            0xA => Cmp,
            0xB => Cmn,
            0xC => Orr,
            0xD => Mov,
            0xE => Bic,
            0xF => Mvn,
            _ => unreachable!(),
        }
    }
}

impl AluOp {
    /// Comparison/test ops set flags but never write a destination.
    pub fn is_test(self) -> bool {
        matches!(self, Self::Tst | Self::Teq | Self::Cmp | Self::Cmn)
    }

    /// Logical ops take their carry from the shifter instead of the adder.
    pub fn is_logical(self) -> bool {
        matches!(
            self,
            Self::And | Self::Eor | Self::Tst | Self::Teq | Self::Orr | Self::Mov | Self::Bic | Self::Mvn
        )
    }
}

/// v5E saturating arithmetic selector (bits 22..21).
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum SaturatingOp {
    QAdd,
    QSub,
    QDAdd,
    QDSub,
}

/// v5E signed halfword multiply family (bits 22..21).
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum SignedMultiplyOp {
    /// SMLAxy: 16x16 multiply plus 32-bit accumulate.
    Smla,
    /// SMLAWy / SMULWy: 32x16 multiply, top 32 bits, x selects SMULW.
    Smlaw,
    /// SMLALxy: 16x16 multiply accumulated into a 64-bit pair.
    Smlal,
    /// SMULxy: plain 16x16 multiply.
    Smul,
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum HalfwordOffsetKind {
    Immediate { offset: u32 },
    Register { rm: u32 },
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum SingleDataTransferOffset {
    Immediate {
        offset: u32,
    },
    Register {
        rm: u32,
        shift_kind: ShiftKind,
        amount: u32,
    },
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum ArmInstruction {
    DataProcessing {
        op: AluOp,
        set_flags: bool,
        op_kind: OperandKind,
        rn: u32,
        rd: u32,
        /// Raw operand-2 field (bits 11..0), resolved by the shifter at
        /// execution time.
        op2: u32,
    },
    Mrs {
        spsr: bool,
        rd: u32,
    },
    Msr {
        spsr: bool,
        /// Field mask from bits 19..16 (c, x, s, f).
        field_mask: u32,
        op_kind: OperandKind,
        /// Raw operand-2 field, register number or rotated immediate.
        op2: u32,
    },
    Multiply {
        accumulate: bool,
        set_flags: bool,
        rd: u32,
        rn: u32,
        rs: u32,
        rm: u32,
    },
    MultiplyLong {
        signed: bool,
        accumulate: bool,
        set_flags: bool,
        rd_hi: u32,
        rd_lo: u32,
        rs: u32,
        rm: u32,
    },
    SingleDataSwap {
        quantity: ReadWriteKind,
        rn: u32,
        rd: u32,
        rm: u32,
    },
    BranchAndExchange {
        rm: u32,
    },
    /// v5: BLX with the target in a register.
    BranchLinkExchange {
        rm: u32,
    },
    /// v5: CLZ.
    CountLeadingZeros {
        rd: u32,
        rm: u32,
    },
    /// v5E: QADD/QSUB/QDADD/QDSUB.
    Saturating {
        op: SaturatingOp,
        rn: u32,
        rd: u32,
        rm: u32,
    },
    /// v5E: SMLAxy/SMLAWy/SMULWy/SMLALxy/SMULxy.
    SignedMultiply {
        op: SignedMultiplyOp,
        x: bool,
        y: bool,
        rd: u32,
        rn: u32,
        rs: u32,
        rm: u32,
    },
    HalfwordDataTransfer {
        indexing: Indexing,
        offsetting: Offsetting,
        write_back: bool,
        load_store: LoadStoreKind,
        offset_kind: HalfwordOffsetKind,
        rn: u32,
        rd: u32,
        kind: HalfwordTransferKind,
    },
    SingleDataTransfer {
        load_store: LoadStoreKind,
        quantity: ReadWriteKind,
        write_back: bool,
        indexing: Indexing,
        offsetting: Offsetting,
        rd: u32,
        rn: u32,
        offset: SingleDataTransferOffset,
    },
    BlockDataTransfer {
        indexing: Indexing,
        offsetting: Offsetting,
        /// The S bit: user-bank transfer, or SPSR restore when R15 is
        /// loaded.
        psr_user_bank: bool,
        write_back: bool,
        load_store: LoadStoreKind,
        rn: u32,
        register_list: u32,
    },
    Branch {
        link: bool,
        offset: i32,
    },
    CoprocessorRegisterTransfer {
        load_store: LoadStoreKind,
        coprocessor: u32,
        rd: u32,
        /// Raw opcode: the system coprocessor decodes CRn, opcode2 and CRm
        /// from it.
        opcode: u32,
    },
    CoprocessorDataOperation {
        coprocessor: u32,
    },
    CoprocessorDataTransfer {
        coprocessor: u32,
    },
    SoftwareInterrupt,
    Undefined,
}

impl From<u32> for ArmInstruction {
    fn from(op_code: u32) -> Self {
        use ArmInstruction::*;

        // Ordered by how many bits each pattern pins down, so the dense
        // encodings cannot shadow the sparse ones.
        if op_code.get_bits(4..=27) == 0b0001_0010_1111_1111_1111_0001 {
            BranchAndExchange {
                rm: op_code.get_bits(0..=3),
            }
        } else if op_code.get_bits(4..=27) == 0b0001_0010_1111_1111_1111_0011 {
            BranchLinkExchange {
                rm: op_code.get_bits(0..=3),
            }
        } else if op_code & 0x0FFF_0FF0 == 0x016F_0F10 {
            CountLeadingZeros {
                rd: op_code.get_bits(12..=15),
                rm: op_code.get_bits(0..=3),
            }
        } else if op_code & 0x0F90_0FF0 == 0x0100_0050 {
            let op = match op_code.get_bits(21..=22) {
                0b00 => SaturatingOp::QAdd,
                0b01 => SaturatingOp::QSub,
                0b10 => SaturatingOp::QDAdd,
                _ => SaturatingOp::QDSub,
            };
            Saturating {
                op,
                rn: op_code.get_bits(16..=19),
                rd: op_code.get_bits(12..=15),
                rm: op_code.get_bits(0..=3),
            }
        } else if op_code & 0x0F90_0090 == 0x0100_0080 {
            let op = match op_code.get_bits(21..=22) {
                0b00 => SignedMultiplyOp::Smla,
                0b01 => SignedMultiplyOp::Smlaw,
                0b10 => SignedMultiplyOp::Smlal,
                _ => SignedMultiplyOp::Smul,
            };
            SignedMultiply {
                op,
                x: op_code.get_bit(5),
                y: op_code.get_bit(6),
                rd: op_code.get_bits(16..=19),
                rn: op_code.get_bits(12..=15),
                rs: op_code.get_bits(8..=11),
                rm: op_code.get_bits(0..=3),
            }
        } else if op_code & 0x0FBF_0FFF == 0x010F_0000 {
            Mrs {
                spsr: op_code.get_bit(22),
                rd: op_code.get_bits(12..=15),
            }
        } else if op_code & 0x0FB0_FFF0 == 0x0120_F000 || op_code & 0x0FB0_F000 == 0x0320_F000 {
            Msr {
                spsr: op_code.get_bit(22),
                field_mask: op_code.get_bits(16..=19),
                op_kind: op_code.get_bit(25).into(),
                op2: op_code.get_bits(0..=11),
            }
        } else if op_code.get_bits(23..=27) == 0b00001 && op_code.get_bits(4..=7) == 0b1001 {
            MultiplyLong {
                signed: op_code.get_bit(22),
                accumulate: op_code.get_bit(21),
                set_flags: op_code.get_bit(20),
                rd_hi: op_code.get_bits(16..=19),
                rd_lo: op_code.get_bits(12..=15),
                rs: op_code.get_bits(8..=11),
                rm: op_code.get_bits(0..=3),
            }
        } else if op_code.get_bits(22..=27) == 0b000000 && op_code.get_bits(4..=7) == 0b1001 {
            Multiply {
                accumulate: op_code.get_bit(21),
                set_flags: op_code.get_bit(20),
                rd: op_code.get_bits(16..=19),
                rn: op_code.get_bits(12..=15),
                rs: op_code.get_bits(8..=11),
                rm: op_code.get_bits(0..=3),
            }
        } else if op_code.get_bits(23..=27) == 0b00010
            && op_code.get_bits(20..=21) == 0b00
            && op_code.get_bits(4..=11) == 0b0000_1001
        {
            SingleDataSwap {
                quantity: op_code.get_bit(22).into(),
                rn: op_code.get_bits(16..=19),
                rd: op_code.get_bits(12..=15),
                rm: op_code.get_bits(0..=3),
            }
        } else if op_code.get_bits(25..=27) == 0b000
            && op_code.get_bit(7)
            && op_code.get_bit(4)
            && op_code.get_bits(5..=6) != 0b00
        {
            let load_store: LoadStoreKind = op_code.get_bit(20).into();
            let kind = HalfwordTransferKind::from(op_code.get_bits(5..=6) as u8);

            // The L=0 signed encodings are the v5TE doubleword transfers,
            // which this core does not implement.
            if load_store == LoadStoreKind::Store && kind != HalfwordTransferKind::UnsignedHalfwords
            {
                log(format!("unsupported doubleword transfer {op_code:#010X}"));
                return Undefined;
            }

            let offset_kind = if op_code.get_bit(22) {
                HalfwordOffsetKind::Immediate {
                    offset: (op_code.get_bits(8..=11) << 4) | op_code.get_bits(0..=3),
                }
            } else {
                HalfwordOffsetKind::Register {
                    rm: op_code.get_bits(0..=3),
                }
            };

            HalfwordDataTransfer {
                indexing: op_code.get_bit(24).into(),
                offsetting: op_code.get_bit(23).into(),
                write_back: op_code.get_bit(21),
                load_store,
                offset_kind,
                rn: op_code.get_bits(16..=19),
                rd: op_code.get_bits(12..=15),
                kind,
            }
        } else if op_code.get_bits(26..=27) == 0b00 {
            DataProcessing {
                op: op_code.get_bits(21..=24).into(),
                set_flags: op_code.get_bit(20),
                op_kind: op_code.get_bit(25).into(),
                rn: op_code.get_bits(16..=19),
                rd: op_code.get_bits(12..=15),
                op2: op_code.get_bits(0..=11),
            }
        } else if op_code.get_bits(25..=27) == 0b011 && op_code.get_bit(4) {
            Undefined
        } else if op_code.get_bits(26..=27) == 0b01 {
            let offset = if op_code.get_bit(25) {
                SingleDataTransferOffset::Register {
                    rm: op_code.get_bits(0..=3),
                    shift_kind: op_code.get_bits(5..=6).into(),
                    amount: op_code.get_bits(7..=11),
                }
            } else {
                SingleDataTransferOffset::Immediate {
                    offset: op_code.get_bits(0..=11),
                }
            };

            SingleDataTransfer {
                load_store: op_code.get_bit(20).into(),
                quantity: op_code.get_bit(22).into(),
                write_back: op_code.get_bit(21),
                indexing: op_code.get_bit(24).into(),
                offsetting: op_code.get_bit(23).into(),
                rd: op_code.get_bits(12..=15),
                rn: op_code.get_bits(16..=19),
                offset,
            }
        } else if op_code.get_bits(25..=27) == 0b100 {
            BlockDataTransfer {
                indexing: op_code.get_bit(24).into(),
                offsetting: op_code.get_bit(23).into(),
                psr_user_bank: op_code.get_bit(22),
                write_back: op_code.get_bit(21),
                load_store: op_code.get_bit(20).into(),
                rn: op_code.get_bits(16..=19),
                register_list: op_code.get_bits(0..=15),
            }
        } else if op_code.get_bits(25..=27) == 0b101 {
            Branch {
                link: op_code.get_bit(24),
                offset: (op_code.get_bits(0..=23).sign_extended(24) as i32) << 2,
            }
        } else if op_code.get_bits(24..=27) == 0b1111 {
            SoftwareInterrupt
        } else if op_code.get_bits(24..=27) == 0b1110 && op_code.get_bit(4) {
            CoprocessorRegisterTransfer {
                load_store: op_code.get_bit(20).into(),
                coprocessor: op_code.get_bits(8..=11),
                rd: op_code.get_bits(12..=15),
                opcode: op_code,
            }
        } else if op_code.get_bits(24..=27) == 0b1110 {
            CoprocessorDataOperation {
                coprocessor: op_code.get_bits(8..=11),
            }
        } else if op_code.get_bits(25..=27) == 0b110 {
            CoprocessorDataTransfer {
                coprocessor: op_code.get_bits(8..=11),
            }
        } else {
            log(format!("undecodable opcode {op_code:#010X}"));
            Undefined
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decode_mov_immediate() {
        // MOV R1, #0x80000000
        let decoded = ArmInstruction::from(0xE3A0_1102);

        assert_eq!(
            decoded,
            ArmInstruction::DataProcessing {
                op: AluOp::Mov,
                set_flags: false,
                op_kind: OperandKind::Immediate,
                rn: 0,
                rd: 1,
                op2: 0x102,
            }
        );
    }

    #[test]
    fn decode_branch_with_link() {
        // BL +0x40 (offset field 0x0E)
        let decoded = ArmInstruction::from(0xEB00_000E);

        assert_eq!(
            decoded,
            ArmInstruction::Branch {
                link: true,
                offset: 0x38,
            }
        );
    }

    #[test]
    fn decode_backwards_branch() {
        let decoded = ArmInstruction::from(0xEAFF_FFF7);

        assert_eq!(
            decoded,
            ArmInstruction::Branch {
                link: false,
                offset: -36,
            }
        );
    }

    #[test]
    fn decode_ldr() {
        // LDR R1, [R0]
        let decoded = ArmInstruction::from(0xE590_1000);

        assert_eq!(
            decoded,
            ArmInstruction::SingleDataTransfer {
                load_store: LoadStoreKind::Load,
                quantity: ReadWriteKind::Word,
                write_back: false,
                indexing: Indexing::Pre,
                offsetting: Offsetting::Up,
                rd: 1,
                rn: 0,
                offset: SingleDataTransferOffset::Immediate { offset: 0 },
            }
        );
    }

    #[test]
    fn decode_ldm_user_bank() {
        // LDM SP!, {R0}^
        let decoded = ArmInstruction::from(0xE8FD_0001);

        assert_eq!(
            decoded,
            ArmInstruction::BlockDataTransfer {
                indexing: Indexing::Post,
                offsetting: Offsetting::Up,
                psr_user_bank: true,
                write_back: true,
                load_store: LoadStoreKind::Load,
                rn: 13,
                register_list: 1,
            }
        );
    }

    #[test]
    fn decode_bx_and_blx() {
        assert_eq!(
            ArmInstruction::from(0xE12F_FF10),
            ArmInstruction::BranchAndExchange { rm: 0 }
        );
        assert_eq!(
            ArmInstruction::from(0xE12F_FF33),
            ArmInstruction::BranchLinkExchange { rm: 3 }
        );
    }

    #[test]
    fn decode_clz() {
        // CLZ R2, R3
        assert_eq!(
            ArmInstruction::from(0xE16F_2F13),
            ArmInstruction::CountLeadingZeros { rd: 2, rm: 3 }
        );
    }

    #[test]
    fn decode_multiplies() {
        // MUL R2, R3, R4
        assert_eq!(
            ArmInstruction::from(0xE002_0493),
            ArmInstruction::Multiply {
                accumulate: false,
                set_flags: false,
                rd: 2,
                rn: 0,
                rs: 4,
                rm: 3,
            }
        );

        // UMULL R1, R2, R3, R4
        assert_eq!(
            ArmInstruction::from(0xE082_1493),
            ArmInstruction::MultiplyLong {
                signed: false,
                accumulate: false,
                set_flags: false,
                rd_hi: 2,
                rd_lo: 1,
                rs: 4,
                rm: 3,
            }
        );
    }

    #[test]
    fn decode_psr_transfers() {
        // MRS R0, CPSR
        assert_eq!(
            ArmInstruction::from(0xE10F_0000),
            ArmInstruction::Mrs { spsr: false, rd: 0 }
        );

        // MSR SPSR_fc, R0
        assert_eq!(
            ArmInstruction::from(0xE169_F000),
            ArmInstruction::Msr {
                spsr: true,
                field_mask: 0b1001,
                op_kind: OperandKind::Register,
                op2: 0,
            }
        );

        // MSR CPSR_f, #0xF0000000
        assert_eq!(
            ArmInstruction::from(0xE328_F4F0),
            ArmInstruction::Msr {
                spsr: false,
                field_mask: 0b1000,
                op_kind: OperandKind::Immediate,
                op2: 0x4F0,
            }
        );
    }

    #[test]
    fn decode_halfword_transfer() {
        // STRH R0, [R2, R1]
        let decoded = ArmInstruction::from(0xE182_00B1);

        assert_eq!(
            decoded,
            ArmInstruction::HalfwordDataTransfer {
                indexing: Indexing::Pre,
                offsetting: Offsetting::Up,
                write_back: false,
                load_store: LoadStoreKind::Store,
                offset_kind: HalfwordOffsetKind::Register { rm: 1 },
                rn: 2,
                rd: 0,
                kind: HalfwordTransferKind::UnsignedHalfwords,
            }
        );
    }

    #[test]
    fn decode_swap() {
        // SWP R0, R1, [R2]
        assert_eq!(
            ArmInstruction::from(0xE102_0091),
            ArmInstruction::SingleDataSwap {
                quantity: ReadWriteKind::Word,
                rn: 2,
                rd: 0,
                rm: 1,
            }
        );
    }

    #[test]
    fn decode_swi_and_coprocessor() {
        assert_eq!(ArmInstruction::from(0xEF00_0042), ArmInstruction::SoftwareInterrupt);

        // MRC p15, 0, R0, c1, c0, 0
        assert_eq!(
            ArmInstruction::from(0xEE11_0F10),
            ArmInstruction::CoprocessorRegisterTransfer {
                load_store: LoadStoreKind::Load,
                coprocessor: 15,
                rd: 0,
                opcode: 0xEE11_0F10,
            }
        );

        // MCR p15, 0, R0, c1, c0, 0
        assert_eq!(
            ArmInstruction::from(0xEE01_0F10),
            ArmInstruction::CoprocessorRegisterTransfer {
                load_store: LoadStoreKind::Store,
                coprocessor: 15,
                rd: 0,
                opcode: 0xEE01_0F10,
            }
        );
    }

    #[test]
    fn decode_undefined_pattern() {
        assert_eq!(ArmInstruction::from(0xE7F0_00F0), ArmInstruction::Undefined);
    }

    #[test]
    fn decode_qadd_and_smul() {
        // QADD R0, R1, R2
        assert_eq!(
            ArmInstruction::from(0xE102_0051),
            ArmInstruction::Saturating {
                op: SaturatingOp::QAdd,
                rn: 2,
                rd: 0,
                rm: 1,
            }
        );

        // SMULBB R0, R1, R2
        assert_eq!(
            ArmInstruction::from(0xE160_0281),
            ArmInstruction::SignedMultiply {
                op: SignedMultiplyOp::Smul,
                x: false,
                y: false,
                rd: 0,
                rn: 0,
                rs: 2,
                rm: 1,
            }
        );
    }
}
