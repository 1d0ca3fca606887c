//! Wire encoding of PSRAM commands and the chained-read command buffer.
//!
//! Every transfer is announced to the state machine as three words: a bit
//! count, the command byte and 24-bit address, and the absolute program
//! counter to jump to. The write and read programs count nibbles, two per
//! byte, and account differently for their fixed overhead.

use heapless::Vec;
use picovision_hal::PsramEntry;

use super::{PsramError, PAGE_MASK, PAGE_SIZE};

/// Quad write, 24-bit address.
pub const CMD_WRITE: u32 = 0x38 << 24;
/// Fast quad read with wait cycles, 24-bit address.
pub const CMD_READ: u32 = 0xEB << 24;

/// Capacity of the chained-read buffer, in words.
pub const COMMAND_BUFFER_WORDS: usize = 3 * 64;

/// Bit count word for a write burst of `bytes` bytes.
pub const fn write_count(bytes: u32) -> u32 {
    (bytes << 1) - 1
}

/// Bit count word for a read burst of `bytes` bytes.
pub const fn read_count(bytes: u32) -> u32 {
    (bytes << 1) - 4
}

/// Words the data channel must stream for a write of `bytes` bytes. The
/// program pulls one word past the payload and discards what it does not
/// shift out.
pub const fn write_stream_words(bytes: u32) -> u32 {
    (bytes >> 2) + 1
}

/// Length of the first burst at `addr`: up to the end of its page when bursts
/// may not cross pages, otherwise a full page worth.
pub const fn first_piece(addr: u32, len: u32, page_crossing_ok: bool) -> u32 {
    let room = if page_crossing_ok {
        PAGE_SIZE
    } else {
        PAGE_SIZE - (addr & PAGE_MASK)
    };
    if room < len {
        room
    } else {
        len
    }
}

/// Pre-built command stream for reads that need more than one burst.
///
/// The buffer is streamed into the TX FIFO by the command DMA channel while
/// the data channel collects the results, so it must not be touched until the
/// matching read has finished.
#[derive(Debug, Default)]
pub struct CommandBuffer {
    words: Vec<u32, COMMAND_BUFFER_WORDS>,
}

impl CommandBuffer {
    pub const fn new() -> Self {
        Self { words: Vec::new() }
    }

    pub fn clear(&mut self) {
        self.words.clear();
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Append the bursts reading `len` bytes at `addr`.
    ///
    /// `addr` and `len` are word-aligned. Pieces shorter than two words use
    /// the single-word read entry, which always transfers four bytes.
    pub fn push_read(
        &mut self,
        mut addr: u32,
        len: u32,
        page_crossing_ok: bool,
        program_offset: u8,
    ) -> Result<(), PsramError> {
        let mut remaining = len;
        let mut piece = first_piece(addr, len, page_crossing_ok);
        while remaining > 0 {
            if piece < 8 {
                self.push_triple(0, CMD_READ | addr, program_offset, PsramEntry::ReadOne)?;
            } else {
                self.push_triple(read_count(piece), CMD_READ | addr, program_offset, PsramEntry::Read)?;
            }
            remaining -= piece;
            addr += piece;
            piece = remaining.min(PAGE_SIZE);
        }
        Ok(())
    }

    fn push_triple(
        &mut self,
        count: u32,
        command: u32,
        program_offset: u8,
        entry: PsramEntry,
    ) -> Result<(), PsramError> {
        if self.words.len() + 3 > COMMAND_BUFFER_WORDS {
            return Err(PsramError::CommandBufferFull);
        }
        let pc = program_offset as u32 + entry.offset() as u32;
        for word in [count, command, pc] {
            self.words
                .push(word)
                .map_err(|_| PsramError::CommandBufferFull)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triples(buf: &CommandBuffer) -> impl Iterator<Item = &[u32]> {
        buf.as_slice().chunks(3)
    }

    #[test]
    fn counts_match_program_overhead() {
        assert_eq!(write_count(1), 1);
        assert_eq!(write_count(1024), 2047);
        assert_eq!(read_count(4), 4);
        assert_eq!(read_count(1024), 2044);
        assert_eq!(write_stream_words(5), 2);
        assert_eq!(write_stream_words(8), 3);
    }

    #[test]
    fn read_inside_one_page_is_one_burst() {
        let mut buf = CommandBuffer::new();
        buf.push_read(0x400, 64, false, 10).unwrap();
        let all: Vec<&[u32], 4> = triples(&buf).collect();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0], &[read_count(64), CMD_READ | 0x400, 10 + 9]);
    }

    #[test]
    fn read_across_page_is_split_at_boundary() {
        let mut buf = CommandBuffer::new();
        buf.push_read(PAGE_SIZE - 16, 48, false, 0).unwrap();
        let all: Vec<&[u32], 4> = triples(&buf).collect();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], &[read_count(16), CMD_READ | (PAGE_SIZE - 16), 9]);
        assert_eq!(all[1], &[read_count(32), CMD_READ | PAGE_SIZE, 9]);
    }

    #[test]
    fn short_tail_uses_single_word_entry() {
        let mut buf = CommandBuffer::new();
        buf.push_read(PAGE_SIZE - 4, 12, false, 3).unwrap();
        let all: Vec<&[u32], 4> = triples(&buf).collect();
        assert_eq!(all[0], &[0, CMD_READ | (PAGE_SIZE - 4), 3 + 18]);
        assert_eq!(all[1], &[read_count(8), CMD_READ | PAGE_SIZE, 3 + 9]);
    }

    #[test]
    fn crossing_allowed_splits_only_by_length() {
        let mut buf = CommandBuffer::new();
        buf.push_read(PAGE_SIZE - 16, 48, true, 0).unwrap();
        assert_eq!(buf.len(), 3);

        buf.clear();
        buf.push_read(8, 2 * PAGE_SIZE + 8, true, 0).unwrap();
        let addrs: Vec<u32, 4> = triples(&buf).map(|t| t[1] & 0xFF_FFFF).collect();
        assert_eq!(addrs.as_slice(), &[8, 8 + PAGE_SIZE, 8 + 2 * PAGE_SIZE]);
    }

    #[test]
    fn overflow_is_reported() {
        let mut buf = CommandBuffer::new();
        let pages = (COMMAND_BUFFER_WORDS / 3) as u32;
        buf.push_read(0, pages * PAGE_SIZE, false, 0).unwrap();
        assert_eq!(
            buf.push_read(0, 4, false, 0),
            Err(PsramError::CommandBufferFull)
        );
        assert_eq!(buf.len(), COMMAND_BUFFER_WORDS);
    }
}
