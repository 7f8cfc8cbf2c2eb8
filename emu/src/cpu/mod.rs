//! # The CPU core
//!
//! A cycle-approximate interpreter for the 32-bit ARM v3/v4/v4T/v5/v5TE
//! architecture family, including the Thumb instruction set and the
//! XScale/StrongARM derivatives.
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`core`] | Device configuration, memory path, specialized execute loops |
//! | [`registers`] | 37-slot banked register file with per-mode views |
//! | [`psr`] | CPSR/SPSR layout and condition evaluation |
//! | [`alu`] | Flag tables, barrel shifter, saturating arithmetic |
//! | [`arm`] / [`thumb`] | Decode and execution of the two instruction sets |
//! | [`exceptions`] | Pending-flag latching and vector entry |
//! | [`mmu`] | Two-level translation table walk and fault decision table |
//! | [`cp15`] | System control coprocessor |
//! | [`tcm`] | ARM946ES tightly coupled memory overlay |
//! | [`prefetch`] | Three-deep instruction prefetch queue |
//! | [`state`] | Named register access and serde save states |

pub mod alu;
pub mod arm;
pub mod condition;
pub mod core;
pub mod cp15;
pub mod cpu_modes;
pub mod exceptions;
pub mod flags;
pub mod mmu;
pub mod prefetch;
pub mod psr;
pub mod registers;
pub mod state;
pub mod tcm;
pub mod thumb;

pub use self::core::{Arm7Cpu, CpuConfig, InstructionHook};
pub use self::cpu_modes::Mode;
pub use self::exceptions::InputLine;
pub use self::psr::{CpuState, Psr};
pub use self::state::SaveState;
