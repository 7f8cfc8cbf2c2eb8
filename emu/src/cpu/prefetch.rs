//! Instruction prefetch queue.
//!
//! Up to three instruction words sit in the queue together with their
//! untranslated and translated addresses. Entries are always contiguous:
//! the head corresponds to the current PC and each following slot is four
//! bytes further on. A slot fetched through a failed translation is kept
//! with `translated == false` and raises a prefetch abort only if it is
//! ever consumed.
//!
//! The queue is refilled by the execute loop, which owns the MMU and the
//! bus; this module only manages the slots and the Thumb halfword
//! extraction.

use vecfixed::VecFixed;

use crate::bus::Endianness;

pub(crate) const PREFETCH_DEPTH: usize = 3;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PrefetchSlot {
    pub vaddr: u32,
    pub paddr: u32,
    pub word: u32,
    pub translated: bool,
}

pub struct PrefetchQueue {
    slots: VecFixed<PREFETCH_DEPTH, PrefetchSlot>,
    /// Shift that selects the halfword at an address with bit 1 clear.
    word0_shift: u32,
    /// Shift that selects the halfword at an address with bit 1 set.
    word1_shift: u32,
}

impl PrefetchQueue {
    pub fn new(endianness: Endianness) -> Self {
        let (word0_shift, word1_shift) = match endianness {
            Endianness::Little => (0, 16),
            Endianness::Big => (16, 0),
        };
        Self {
            slots: VecFixed::new(),
            word0_shift,
            word1_shift,
        }
    }

    pub fn invalidate(&mut self) {
        self.slots.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_full(&self) -> bool {
        self.slots.is_full()
    }

    /// Drops the whole queue when the head no longer matches the PC, which
    /// happens after any branch the consumer did not tell us about.
    pub fn realign(&mut self, pc: u32) {
        if let Some(head) = self.slots.front() {
            if head.vaddr != pc {
                self.slots.clear();
            }
        }
    }

    /// Virtual address the next refill should fetch from.
    pub fn next_fetch_vaddr(&self, pc: u32) -> u32 {
        pc.wrapping_add(self.slots.len() as u32 * 4)
    }

    pub fn push(&mut self, slot: PrefetchSlot) {
        let pushed = self.slots.push(slot);
        debug_assert!(pushed, "prefetch queue overfilled");
    }

    /// Takes the head word for an ARM fetch.
    pub fn consume_arm(&mut self) -> Option<PrefetchSlot> {
        self.slots.pop_front()
    }

    /// Extracts the halfword for a Thumb fetch at `pc`. The low halfword
    /// of a slot peeks without consuming; the high halfword retires the
    /// slot since the next fetch moves past it.
    pub fn consume_thumb(&mut self, pc: u32) -> Option<(u16, bool)> {
        if pc & 2 != 0 {
            let slot = self.slots.pop_front()?;
            Some(((slot.word >> self.word1_shift) as u16, slot.translated))
        } else {
            let slot = self.slots.front()?;
            Some(((slot.word >> self.word0_shift) as u16, slot.translated))
        }
    }
}
