//! # CPU operating modes
//!
//! The core has seven operating modes. User is the only unprivileged one;
//! the five exception modes (FIQ, IRQ, Supervisor, Abort, Undefined) are
//! entered automatically by the exception engine, and System is a
//! privileged mode that shares the User register bank.
//!
//! ```text
//! ┌─────────────┬──────────┬───────────────────────────────────────────┐
//! │    Mode     │  Binary  │                  Purpose                  │
//! ├─────────────┼──────────┼───────────────────────────────────────────┤
//! │ User        │  10000   │ Normal program execution (unprivileged)   │
//! │ FIQ         │  10001   │ Fast interrupt handling                   │
//! │ IRQ         │  10010   │ General interrupt handling                │
//! │ Supervisor  │  10011   │ Reset and software interrupt entry        │
//! │ Abort       │  10111   │ Memory access failures                    │
//! │ Undefined   │  11011   │ Undefined instruction handling            │
//! │ System      │  11111   │ Privileged mode sharing User registers    │
//! └─────────────┴──────────┴───────────────────────────────────────────┘
//! ```
//!
//! Each mode selects a view over the banked register file, see
//! [`registers`](super::registers).

use serde::{Deserialize, Serialize};

/// The CPU operating mode, stored in bits 0-4 of the CPSR/SPSR.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum Mode {
    User = 0b10000,
    Fiq = 0b10001,
    Irq = 0b10010,
    Supervisor = 0b10011,
    Abort = 0b10111,
    Undefined = 0b11011,
    System = 0b11111,
}

impl Mode {
    /// Row of this mode in the banked register view table.
    pub(crate) const fn bank_index(self) -> usize {
        match self {
            Self::User => 0,
            Self::Fiq => 1,
            Self::Irq => 2,
            Self::Supervisor => 3,
            Self::Abort => 4,
            Self::Undefined => 5,
            Self::System => 6,
        }
    }

    /// Low four bits of the mode number, the form the MMU fault decision
    /// table is keyed on. User is 0, System is 15.
    pub(crate) const fn fault_index(self) -> u32 {
        self as u32 & 0xF
    }

    pub const fn is_privileged(self) -> bool {
        !matches!(self, Self::User)
    }

    /// Whether this mode has a saved program status register of its own.
    pub const fn has_spsr(self) -> bool {
        !matches!(self, Self::User | Self::System)
    }
}

impl From<Mode> for u32 {
    fn from(m: Mode) -> Self {
        m as Self
    }
}

impl TryFrom<u32> for Mode {
    type Error = String;

    fn try_from(n: u32) -> Result<Self, Self::Error> {
        match n {
            0b10000 => Ok(Self::User),
            0b10001 => Ok(Self::Fiq),
            0b10010 => Ok(Self::Irq),
            0b10011 => Ok(Self::Supervisor),
            0b10111 => Ok(Self::Abort),
            0b11011 => Ok(Self::Undefined),
            0b11111 => Ok(Self::System),
            _ => Err(String::from("Unexpected value for Mode")),
        }
    }
}
