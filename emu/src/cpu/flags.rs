//! Small decode enums shared by the ARM and Thumb instruction sets.

/// Memory transfer quantity for single data transfers.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub enum ReadWriteKind {
    /// 32-bit word access.
    #[default]
    Word,

    /// 8-bit byte access.
    Byte,
}

impl From<bool> for ReadWriteKind {
    fn from(value: bool) -> Self {
        if value { Self::Byte } else { Self::Word }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum LoadStoreKind {
    Store,
    Load,
}

impl From<bool> for LoadStoreKind {
    fn from(b: bool) -> Self {
        match b {
            false => Self::Store,
            true => Self::Load,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Indexing {
    /// Add offset after transfer.
    Post,

    /// Add offset before transfer.
    Pre,
}

impl From<bool> for Indexing {
    fn from(state: bool) -> Self {
        match state {
            false => Self::Post,
            true => Self::Pre,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Offsetting {
    /// Subtract the offset from base.
    Down,

    /// Add the offset to base.
    Up,
}

impl From<bool> for Offsetting {
    fn from(state: bool) -> Self {
        match state {
            false => Self::Down,
            true => Self::Up,
        }
    }
}

/// Operand 2 source of a data-processing instruction.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum OperandKind {
    Immediate,
    Register,
}

impl From<bool> for OperandKind {
    fn from(b: bool) -> Self {
        match b {
            false => Self::Register,
            true => Self::Immediate,
        }
    }
}

/// Barrel shifter operation.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ShiftKind {
    Lsl,
    Lsr,
    Asr,
    Ror,
}

impl From<u32> for ShiftKind {
    fn from(bits: u32) -> Self {
        match bits & 0b11 {
            0b00 => Self::Lsl,
            0b01 => Self::Lsr,
            0b10 => Self::Asr,
            0b11 => Self::Ror,
            _ => unreachable!(),
        }
    }
}

impl From<u16> for ShiftKind {
    fn from(bits: u16) -> Self {
        Self::from(bits as u32)
    }
}

/// Width and signedness of a halfword-class transfer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HalfwordTransferKind {
    UnsignedHalfwords,
    SignedByte,
    SignedHalfwords,
}

impl From<u8> for HalfwordTransferKind {
    fn from(value: u8) -> Self {
        match value & 0b11 {
            0b01 => Self::UnsignedHalfwords,
            0b10 => Self::SignedByte,
            0b11 => Self::SignedHalfwords,
            _ => unreachable!(),
        }
    }
}
