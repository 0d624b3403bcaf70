//! Linear memory
//!
//! A fixed-size little-endian byte buffer shared by every execution
//! context of a program. The buffer is stored as 32-bit atomic words so
//! that contexts on different threads can reach the same bytes; ordinary
//! view accesses use relaxed ordering and only the atomics capability
//! (see [`crate::atomics`]) orders anything.
//!
//! Typed element access does no checking beyond the buffer end: reads past
//! it yield `None` and writes past it are dropped, as with host typed
//! arrays. [`Memory::copy_out`] is the one place a range is rejected.

use crate::error::{RuntimeError, RuntimeResult};
use crate::value::to_uint32;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use wasmjs_ir::MemType;

/// Handle to a linear-memory buffer. Clones share the same bytes.
#[derive(Clone)]
pub struct Memory {
    words: Arc<[AtomicU32]>,
    len: usize,
}

impl Memory {
    /// Allocates a zeroed buffer of `len` bytes. `len` must be a multiple
    /// of 8 so every view covers the whole buffer.
    pub fn new(len: usize) -> RuntimeResult<Self> {
        if len % 8 != 0 {
            return Err(RuntimeError::Range(format!(
                "buffer length {} is not a multiple of 8",
                len
            )));
        }
        let words = (0..len / 4).map(|_| AtomicU32::new(0)).collect();
        Ok(Self { words, len })
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True when both handles refer to the same buffer
    pub fn same_buffer(&self, other: &Memory) -> bool {
        Arc::ptr_eq(&self.words, &other.words)
    }

    /// Number of live handles to the buffer
    #[cfg(test)]
    pub(crate) fn handle_count(&self) -> usize {
        Arc::strong_count(&self.words)
    }

    pub(crate) fn word(&self, index: usize) -> Option<&AtomicU32> {
        self.words.get(index)
    }

    /// Number of `mtype` elements in the buffer
    pub fn element_count(&self, mtype: MemType) -> usize {
        self.len / mtype.size_of() as usize
    }

    fn mask(size: usize) -> u32 {
        if size == 4 {
            u32::MAX
        } else {
            (1u32 << (size * 8)) - 1
        }
    }

    /// Reads `size` (1, 2 or 4) aligned bytes at `byte`
    fn load_bits(&self, byte: usize, size: usize) -> u32 {
        let word = self.words[byte / 4].load(Ordering::Relaxed);
        (word >> ((byte % 4) * 8)) & Self::mask(size)
    }

    fn store_bits(&self, byte: usize, size: usize, bits: u32) {
        let word = &self.words[byte / 4];
        if size == 4 {
            word.store(bits, Ordering::Relaxed);
            return;
        }
        let shift = (byte % 4) * 8;
        let mask = Self::mask(size) << shift;
        // Neighbouring bytes of the same word may be written concurrently.
        let _ = word.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |w| {
            Some((w & !mask) | ((bits << shift) & mask))
        });
    }

    /// Reads element `index` of the `mtype` view
    pub fn get(&self, mtype: MemType, index: usize) -> Option<f64> {
        if index >= self.element_count(mtype) {
            return None;
        }
        let size = mtype.size_of() as usize;
        let byte = index * size;
        let value = match mtype {
            MemType::U8 => self.load_bits(byte, 1) as f64,
            MemType::I8 => self.load_bits(byte, 1) as u8 as i8 as f64,
            MemType::U16 => self.load_bits(byte, 2) as f64,
            MemType::I16 => self.load_bits(byte, 2) as u16 as i16 as f64,
            MemType::U32 => self.load_bits(byte, 4) as f64,
            MemType::I32 => self.load_bits(byte, 4) as i32 as f64,
            MemType::F32 => f32::from_bits(self.load_bits(byte, 4)) as f64,
            MemType::F64 => {
                let lo = self.load_bits(byte, 4) as u64;
                let hi = self.load_bits(byte + 4, 4) as u64;
                f64::from_bits((hi << 32) | lo)
            }
        };
        Some(value)
    }

    /// Writes element `index` of the `mtype` view, converting `value` the
    /// way a host typed array does. Returns false when out of range.
    pub fn set(&self, mtype: MemType, index: usize, value: f64) -> bool {
        if index >= self.element_count(mtype) {
            return false;
        }
        let size = mtype.size_of() as usize;
        let byte = index * size;
        match mtype {
            MemType::F32 => self.store_bits(byte, 4, (value as f32).to_bits()),
            MemType::F64 => {
                let bits = value.to_bits();
                self.store_bits(byte, 4, bits as u32);
                self.store_bits(byte + 4, 4, (bits >> 32) as u32);
            }
            _ => self.store_bits(byte, size, to_uint32(value)),
        }
        true
    }

    /// Validates `[src, src + size)` against the buffer
    fn check_range(&self, src: i64, size: i64) -> RuntimeResult<(usize, usize)> {
        let end = src.saturating_add(size);
        let len = self.len as i64;
        if end < src || src > len || src < 0 || end > len || end < 0 {
            tracing::warn!("rejected memory range [{}, {}) of [0, {})", src, end, len);
            return Err(RuntimeError::OutOfBounds {
                start: src,
                end,
                len: self.len,
            });
        }
        Ok((src as usize, end as usize))
    }

    /// Copies `size` bytes at `src` into the front of `dst`
    pub fn copy_out(&self, src: i64, size: i64, dst: &mut [u8]) -> RuntimeResult<()> {
        let (start, end) = self.check_range(src, size)?;
        let count = end - start;
        if dst.len() < count {
            return Err(RuntimeError::Range(format!(
                "destination holds {} bytes, {} requested",
                dst.len(),
                count
            )));
        }
        for (offset, slot) in dst[..count].iter_mut().enumerate() {
            *slot = self.load_bits(start + offset, 1) as u8;
        }
        Ok(())
    }

    /// Returns a copy of the `size` bytes at `src`
    pub fn read_range(&self, src: i64, size: i64) -> RuntimeResult<Vec<u8>> {
        let (start, end) = self.check_range(src, size)?;
        let mut out = vec![0u8; end - start];
        self.copy_out(src, size, &mut out)?;
        Ok(out)
    }

    /// Writes `bytes` starting at `offset`
    pub fn write_bytes(&self, offset: i64, bytes: &[u8]) -> RuntimeResult<()> {
        let (start, _) = self.check_range(offset, bytes.len() as i64)?;
        for (i, byte) in bytes.iter().enumerate() {
            self.store_bits(start + i, 1, *byte as u32);
        }
        Ok(())
    }
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memory").field("len", &self.len).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(len: usize) -> Memory {
        let memory = Memory::new(len).unwrap();
        let bytes: Vec<u8> = (0..len as u8).collect();
        memory.write_bytes(0, &bytes).unwrap();
        memory
    }

    #[test]
    fn test_bounds_are_enforced() {
        let memory = filled(16);
        let mut dst = [0u8; 32];

        assert!(memory.copy_out(-1, 4, &mut dst).is_err());
        assert!(memory.copy_out(10, 10, &mut dst).is_err());
        assert!(memory.copy_out(20, 1, &mut dst).is_err());

        let all = memory.read_range(0, 16).unwrap();
        assert_eq!(all, (0..16).collect::<Vec<u8>>());
    }

    #[test]
    fn test_out_of_bounds_message() {
        let memory = filled(16);
        let err = memory.read_range(10, 10).unwrap_err();
        assert_eq!(err.to_string(), "Range [10, 20) is out of bounds. [0, 16)");

        let err = memory.read_range(i64::MAX, 1).unwrap_err();
        assert!(matches!(err, RuntimeError::OutOfBounds { .. }));

        let err = memory.read_range(4, -2).unwrap_err();
        assert!(matches!(err, RuntimeError::OutOfBounds { start: 4, end: 2, .. }));
    }

    #[test]
    fn test_empty_ranges_at_the_edges() {
        let memory = filled(16);
        assert!(memory.read_range(16, 0).unwrap().is_empty());
        assert!(memory.read_range(0, 0).unwrap().is_empty());
    }

    #[test]
    fn test_destination_must_fit() {
        let memory = filled(16);
        let mut small = [0u8; 2];
        assert!(matches!(
            memory.copy_out(0, 4, &mut small),
            Err(RuntimeError::Range(_))
        ));
    }

    #[test]
    fn test_views_are_little_endian() {
        let memory = Memory::new(16).unwrap();
        memory.set(MemType::I32, 1, 0x0403_0201 as f64);

        assert_eq!(memory.get(MemType::U8, 4), Some(1.0));
        assert_eq!(memory.get(MemType::U8, 7), Some(4.0));
        assert_eq!(memory.get(MemType::U16, 2), Some(0x0201 as f64));
        assert_eq!(memory.get(MemType::U16, 3), Some(0x0403 as f64));
    }

    #[test]
    fn test_integer_writes_wrap() {
        let memory = Memory::new(8).unwrap();
        memory.set(MemType::I8, 0, 200.0);
        assert_eq!(memory.get(MemType::I8, 0), Some(-56.0));
        assert_eq!(memory.get(MemType::U8, 0), Some(200.0));

        memory.set(MemType::I32, 1, -1.0);
        assert_eq!(memory.get(MemType::U32, 1), Some(4294967295.0));
        assert_eq!(memory.get(MemType::I16, 2), Some(-1.0));
    }

    #[test]
    fn test_float_views() {
        let memory = Memory::new(16).unwrap();
        memory.set(MemType::F64, 1, 0.1);
        assert_eq!(memory.get(MemType::F64, 1), Some(0.1));

        memory.set(MemType::F32, 0, 0.1);
        assert_eq!(memory.get(MemType::F32, 0), Some(0.1f32 as f64));
    }

    #[test]
    fn test_out_of_range_elements() {
        let memory = Memory::new(8).unwrap();
        assert_eq!(memory.get(MemType::F64, 1), None);
        assert!(!memory.set(MemType::I32, 2, 1.0));
        assert_eq!(memory.get(MemType::U8, 7), Some(0.0));
    }

    #[test]
    fn test_clones_share_bytes() {
        let memory = Memory::new(8).unwrap();
        let other = memory.clone();
        other.set(MemType::U8, 3, 9.0);
        assert_eq!(memory.get(MemType::U8, 3), Some(9.0));
        assert!(memory.same_buffer(&other));
        assert!(!memory.same_buffer(&Memory::new(8).unwrap()));
    }

    #[test]
    fn test_length_must_be_multiple_of_eight() {
        assert!(Memory::new(12).is_err());
        assert_eq!(Memory::new(0).unwrap().len(), 0);
    }
}
