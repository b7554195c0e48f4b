//! Caller-owned input memory and typed views over raw tensor bytes.

use bytemuck::Pod;

/// An ordered list of caller-owned buffers.
///
/// Buffers are referenced, never copied or freed. The engine copies their
/// contents while a submission is being assembled, so they only need to stay
/// valid until the submitting call returns.
#[derive(Debug, Default, Clone)]
pub struct MemoryReference {
    buffers: Vec<(*const u8, usize)>,
}

impl MemoryReference {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a buffer. A null `base` is accepted only with `byte_size == 0`
    /// and contributes no bytes.
    pub fn add_buffer(&mut self, base: *const u8, byte_size: usize) {
        self.buffers.push((base, byte_size));
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn total_byte_size(&self) -> usize {
        self.buffers.iter().map(|(_, len)| len).sum()
    }

    /// `(base, byte_size)` of every buffer, in append order.
    pub fn buffers(&self) -> impl Iterator<Item = (*const u8, usize)> + '_ {
        self.buffers.iter().copied()
    }

    /// Borrow every buffer as a byte slice, in append order.
    ///
    /// # Safety
    ///
    /// Every non-null base pointer must be valid for reads of its byte size
    /// for the lifetime of the returned slices.
    pub unsafe fn slices(&self) -> Vec<&[u8]> {
        self.buffers
            .iter()
            .map(|&(base, len)| {
                if base.is_null() || len == 0 {
                    &[][..]
                } else {
                    // SAFETY: upheld by the caller.
                    unsafe { std::slice::from_raw_parts(base, len) }
                }
            })
            .collect()
    }
}

/// Decode native-endian elements from an unaligned byte buffer.
///
/// Trailing bytes that do not form a whole element are ignored.
pub fn read_elements<T: Pod>(bytes: &[u8]) -> Vec<T> {
    bytes
        .chunks_exact(std::mem::size_of::<T>())
        .map(bytemuck::pod_read_unaligned)
        .collect()
}

/// Encode elements into a native-endian byte buffer.
pub fn write_elements<T: Pod>(values: &[T]) -> Vec<u8> {
    bytemuck::cast_slice(values).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_preserves_order() {
        let first = [1u8, 2, 3];
        let second = [4u8, 5];
        let mut mem = MemoryReference::new();
        mem.add_buffer(first.as_ptr(), first.len());
        mem.add_buffer(second.as_ptr(), second.len());

        assert_eq!(mem.buffer_count(), 2);
        assert_eq!(mem.total_byte_size(), 5);
        let slices = unsafe { mem.slices() };
        assert_eq!(slices, vec![&first[..], &second[..]]);
    }

    #[test]
    fn test_null_empty_buffer() {
        let mut mem = MemoryReference::new();
        mem.add_buffer(std::ptr::null(), 0);
        let slices = unsafe { mem.slices() };
        assert!(slices[0].is_empty());
    }

    #[test]
    fn test_element_codec() {
        let values = [1i32, -2, 3];
        let bytes = write_elements(&values);
        assert_eq!(bytes.len(), 12);
        // Unaligned view still decodes.
        let mut shifted = vec![0u8];
        shifted.extend_from_slice(&bytes);
        assert_eq!(read_elements::<i32>(&shifted[1..]), values);
    }
}
