//! Atomic operations over linear memory
//!
//! Generated code reaches the atomics through the capability object with
//! byte addresses; here they are addressed by 32-bit word index.
//!
//! [`PolyfillAtomics`] performs the same three operations as separate
//! plain reads and writes. It is only correct while a single context
//! touches the buffer: two contexts racing through it can lose updates.
//! It is selected when shared memory is off, and threads are never
//! spawned in that configuration.

use crate::error::{RuntimeError, RuntimeResult};
use crate::memory::Memory;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// 32-bit atomic load, store and compare-exchange
pub trait Atomics: Send + Sync + fmt::Debug {
    fn load(&self, memory: &Memory, index: usize) -> RuntimeResult<i32>;

    fn store(&self, memory: &Memory, index: usize, value: i32) -> RuntimeResult<()>;

    /// Stores `value` if the word equals `expected`; returns the word's
    /// previous value either way.
    fn compare_exchange(&self, memory: &Memory, index: usize, expected: i32, value: i32) -> RuntimeResult<i32>;

    /// True when backed by real atomic instructions
    fn is_native(&self) -> bool;
}

fn word(memory: &Memory, index: usize) -> RuntimeResult<&AtomicU32> {
    memory.word(index).ok_or_else(|| {
        RuntimeError::Range(format!(
            "atomic access to word {} of a {}-byte buffer",
            index,
            memory.len()
        ))
    })
}

/// Sequentially consistent atomics
#[derive(Debug, Default)]
pub struct NativeAtomics;

impl Atomics for NativeAtomics {
    fn load(&self, memory: &Memory, index: usize) -> RuntimeResult<i32> {
        Ok(word(memory, index)?.load(Ordering::SeqCst) as i32)
    }

    fn store(&self, memory: &Memory, index: usize, value: i32) -> RuntimeResult<()> {
        word(memory, index)?.store(value as u32, Ordering::SeqCst);
        Ok(())
    }

    fn compare_exchange(&self, memory: &Memory, index: usize, expected: i32, value: i32) -> RuntimeResult<i32> {
        let previous = match word(memory, index)?.compare_exchange(
            expected as u32,
            value as u32,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(previous) | Err(previous) => previous,
        };
        Ok(previous as i32)
    }

    fn is_native(&self) -> bool {
        true
    }
}

/// Single-context stand-in for [`NativeAtomics`]; see the module docs.
#[derive(Debug, Default)]
pub struct PolyfillAtomics;

impl Atomics for PolyfillAtomics {
    fn load(&self, memory: &Memory, index: usize) -> RuntimeResult<i32> {
        Ok(word(memory, index)?.load(Ordering::Relaxed) as i32)
    }

    fn store(&self, memory: &Memory, index: usize, value: i32) -> RuntimeResult<()> {
        word(memory, index)?.store(value as u32, Ordering::Relaxed);
        Ok(())
    }

    fn compare_exchange(&self, memory: &Memory, index: usize, expected: i32, value: i32) -> RuntimeResult<i32> {
        let actual = self.load(memory, index)?;
        if actual == expected {
            self.store(memory, index, value)?;
        }
        Ok(actual)
    }

    fn is_native(&self) -> bool {
        false
    }
}

/// Picks the implementation for the shared-memory setting
pub fn select(use_shared_memory: bool) -> Arc<dyn Atomics> {
    if use_shared_memory {
        Arc::new(NativeAtomics)
    } else {
        tracing::debug!("shared memory disabled, using single-thread atomics polyfill");
        Arc::new(PolyfillAtomics)
    }
}
