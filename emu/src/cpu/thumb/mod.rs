//! # Thumb instruction set (16-bit)
//!
//! The compressed instruction set: nineteen fixed formats, selected by the
//! top bits of the halfword. Only BL (and BLX on v5) spans two halfwords,
//! encoded as a prefix/suffix pair.
//!
//! - [`instruction`]: decoding (`From<u16>`)
//! - [`operations`]: execution

pub mod instruction;
pub mod operations;
