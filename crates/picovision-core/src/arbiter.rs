//! Exclusive ownership of PIO instruction memory.
//!
//! Each PIO block has one shared 32-instruction memory. The PSRAM engine
//! swaps timing programs in and out at runtime, so the arbiter tracks the
//! single program it has resident per block and evicts it before loading the
//! next one. The registry sits behind a critical section because the
//! firmware keeps it in a `static`.

use core::cell::RefCell;

use critical_section::Mutex;
use picovision_hal::{PioBlock, ProgramMemory};

use crate::log;

const BLOCKS: usize = 2;

struct Registry<M: ProgramMemory> {
    memory: M,
    resident: [Option<(M::Program, u8)>; BLOCKS],
    loads: u32,
}

/// Process-wide registry of the program currently loaded in each PIO block.
pub struct ProgramArbiter<M: ProgramMemory> {
    inner: Mutex<RefCell<Registry<M>>>,
}

impl<M: ProgramMemory> ProgramArbiter<M> {
    pub const fn new(memory: M) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Registry {
                memory,
                resident: [None, None],
                loads: 0,
            })),
        }
    }

    /// Make `program` the only arbiter-owned program in `block` and return
    /// its load offset.
    ///
    /// Whatever was resident is removed first, even if it is the same
    /// program, so the returned offset always reflects a fresh load.
    pub fn change_exclusive_program(&self, block: PioBlock, program: M::Program) -> u8 {
        critical_section::with(|cs| {
            let mut reg = self.inner.borrow_ref_mut(cs);
            let slot = block.index();
            if let Some((old, offset)) = reg.resident[slot].take() {
                reg.memory.remove_program(block, old, offset);
            }
            let offset = reg.memory.add_program(block, program);
            reg.resident[slot] = Some((program, offset));
            reg.loads = reg.loads.wrapping_add(1);
            log::trace!("pio{} program loaded at {}", slot, offset);
            offset
        })
    }

    /// Unload the resident program of `block`, if any.
    pub fn release(&self, block: PioBlock) {
        critical_section::with(|cs| {
            let mut reg = self.inner.borrow_ref_mut(cs);
            if let Some((old, offset)) = reg.resident[block.index()].take() {
                reg.memory.remove_program(block, old, offset);
            }
        })
    }

    /// Program and offset currently owned in `block`.
    pub fn resident(&self, block: PioBlock) -> Option<(M::Program, u8)> {
        critical_section::with(|cs| self.inner.borrow_ref(cs).resident[block.index()])
    }

    /// Number of program loads performed since construction.
    pub fn load_count(&self) -> u32 {
        critical_section::with(|cs| self.inner.borrow_ref(cs).loads)
    }
}
