//! Host-side buffer storage.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use byteorder::{ByteOrder, LittleEndian};

use crate::bake::ZeroedWords;
use crate::device::{BufferHandle, BufferUsage, DeviceAddress, DeviceSize, WHOLE_SIZE};

/// Fill pattern of freshly created buffers.
pub const POISON: u32 = 0xcdcd_cdcd;

/// One buffer as 32-bit atomic words.
#[derive(Debug)]
pub struct HostBuffer {
    handle: BufferHandle,
    address: DeviceAddress,
    usage: BufferUsage,
    words: Box<[AtomicU32]>,
    /// Set by a whole-buffer zero fill, cleared by any other write.
    zeroed: AtomicBool,
}

impl HostBuffer {
    pub(crate) fn new(
        handle: BufferHandle,
        address: DeviceAddress,
        size: DeviceSize,
        usage: BufferUsage,
    ) -> Self {
        let words = (0..size.div_ceil(4)).map(|_| AtomicU32::new(POISON)).collect();
        Self {
            handle,
            address,
            usage,
            words,
            zeroed: AtomicBool::new(false),
        }
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn size(&self) -> DeviceSize {
        self.words.len() as DeviceSize * 4
    }

    /// Word range for a byte range, checking alignment and bounds.
    fn word_range(
        &self,
        offset: DeviceSize,
        size: DeviceSize,
    ) -> Result<std::ops::Range<usize>, String> {
        let size = if size == WHOLE_SIZE {
            self.size().saturating_sub(offset)
        } else {
            size
        };
        if offset % 4 != 0 || size % 4 != 0 {
            return Err(format!(
                "unaligned access at offset {} size {}",
                offset, size
            ));
        }
        if offset + size > self.size() {
            return Err(format!(
                "access [{}, {}) past end of {} byte buffer",
                offset,
                offset + size,
                self.size()
            ));
        }
        Ok((offset / 4) as usize..((offset + size) / 4) as usize)
    }

    /// Fill a range with a repeated word.
    pub fn fill(&self, offset: DeviceSize, size: DeviceSize, data: u32) -> Result<(), String> {
        let range = self.word_range(offset, size)?;
        let whole = range.start == 0 && range.end == self.words.len();
        for word in &self.words[range] {
            word.store(data, Ordering::Relaxed);
        }
        self.zeroed.store(whole && data == 0, Ordering::Release);
        Ok(())
    }

    /// Copy little-endian bytes in at `offset`.
    pub fn write(&self, offset: DeviceSize, bytes: &[u8]) -> Result<(), String> {
        let range = self.word_range(offset, bytes.len() as DeviceSize)?;
        for (word, chunk) in self.words[range].iter().zip(bytes.chunks_exact(4)) {
            word.store(LittleEndian::read_u32(chunk), Ordering::Relaxed);
        }
        self.zeroed.store(false, Ordering::Release);
        Ok(())
    }

    /// Snapshot of the whole buffer.
    pub fn read(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.words.len() * 4];
        for (word, chunk) in self.words.iter().zip(bytes.chunks_exact_mut(4)) {
            LittleEndian::write_u32(chunk, word.load(Ordering::Relaxed));
        }
        bytes
    }

    /// Snapshot of the words from `offset` to the end.
    pub fn words_from(&self, offset: DeviceSize) -> Result<Vec<u32>, String> {
        let range = self.word_range(offset, WHOLE_SIZE)?;
        Ok(self.words[range]
            .iter()
            .map(|w| w.load(Ordering::Relaxed))
            .collect())
    }

    /// Hand out the words for kernel output if they were zero filled since
    /// the last write. Consumes the zeroed state.
    pub fn take_zeroed(&self) -> Option<ZeroedWords<'_>> {
        if self.zeroed.swap(false, Ordering::AcqRel) {
            Some(ZeroedWords::assume_cleared(&self.words))
        } else {
            None
        }
    }

    /// Whether a zero fill is pending consumption.
    pub fn is_zeroed(&self) -> bool {
        self.zeroed.load(Ordering::Acquire)
    }
}
