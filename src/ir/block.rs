use crate::errors::StructuralError;

use super::Instruction;

/// A contiguous, half-open range of instructions owned by an `if`, `while` or `function`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Block {
    pub start: usize,
    pub end: usize,
}

impl Block {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end, "block range is inverted");
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn instructions<'a>(&self, stream: &'a [Instruction]) -> &'a [Instruction] {
        &stream[self.start..self.end]
    }
}

/// Scans forward from `start` and returns the body up to the `end` that closes it, plus the
/// index of that `end`.
///
/// Nested openers raise the depth and their own `end` is kept inside the body; only an `end`
/// seen at depth zero terminates the scan, and it is not part of the block.
pub fn extract_block(
    stream: &[Instruction],
    start: usize,
) -> Result<(Block, usize), StructuralError> {
    let mut depth = 0usize;
    let mut index = start;

    while let Some(instruction) = stream.get(index) {
        if instruction.opens_block() {
            depth += 1;
        } else if matches!(instruction, Instruction::End) {
            if depth == 0 {
                return Ok((Block::new(start, index), index));
            }
            depth -= 1;
        }
        index += 1;
    }

    Err(StructuralError::UnterminatedBlock { position: start })
}
