//! Splitting raw firmware images into program blocks.

/// One block-sized piece of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    /// Block index, starting at 0.
    pub index: usize,
    /// Offset of the block within the image.
    pub byte_offset: usize,
    /// Block contents; only the last block may be shorter than the block size.
    pub payload: &'a [u8],
}

/// Split `data` into index-ordered blocks of `block_size` bytes.
///
/// # Panics
///
/// Panics if `block_size` is 0.
pub fn chunks(data: &[u8], block_size: usize) -> impl ExactSizeIterator<Item = Chunk<'_>> + '_ {
    data.chunks(block_size)
        .enumerate()
        .map(move |(index, payload)| Chunk {
            index,
            byte_offset: index * block_size,
            payload,
        })
}

/// Number of blocks needed to hold `len` bytes.
#[must_use]
pub fn block_count(len: usize, block_size: usize) -> usize {
    if block_size == 0 {
        return 0;
    }
    len.div_ceil(block_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_in_order() {
        let data: Vec<u8> = (0..40).collect();
        let blocks: Vec<_> = chunks(&data, 16).collect();

        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].payload, &data[..16]);
        assert_eq!(blocks[1].byte_offset, 16);
        assert_eq!(blocks[2].index, 2);
        assert_eq!(blocks[2].payload, &data[32..]);
    }

    #[test]
    fn test_chunks_empty_image() {
        assert_eq!(chunks(&[], 16).len(), 0);
    }

    #[test]
    fn test_block_count() {
        assert_eq!(block_count(32, 16), 2);
        assert_eq!(block_count(33, 16), 3);
        assert_eq!(block_count(0, 16), 0);
        assert_eq!(block_count(10, 0), 0);
    }
}
