use crate::errors::SlangError;

/// A bounded LIFO of integers. Every failing access reports the instruction that caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stack {
    values: Vec<i64>,
    capacity: usize,
}

impl Stack {
    pub fn new(capacity: usize) -> Self {
        Self {
            values: Vec::new(),
            capacity,
        }
    }

    /// A stack pre-populated bottom to top with `values`.
    pub fn with_values(
        values: Vec<i64>,
        capacity: usize,
        position: usize,
    ) -> Result<Self, SlangError> {
        if values.len() > capacity {
            return Err(SlangError::StackOverflow { position });
        }
        Ok(Self { values, capacity })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Bottom to top.
    pub fn values(&self) -> &[i64] {
        &self.values
    }

    pub fn top(&self) -> Option<i64> {
        self.values.last().copied()
    }

    pub fn push(&mut self, value: i64, position: usize) -> Result<(), SlangError> {
        if self.values.len() >= self.capacity {
            return Err(SlangError::StackOverflow { position });
        }
        self.values.push(value);
        Ok(())
    }

    pub fn pop(&mut self, position: usize) -> Result<i64, SlangError> {
        self.values
            .pop()
            .ok_or(SlangError::StackUnderflow { position })
    }

    /// Reads the value `depth` cells from the top, `1` being the top itself.
    pub fn peek(&self, depth: usize, position: usize) -> Result<i64, SlangError> {
        self.values
            .len()
            .checked_sub(depth)
            .filter(|_| depth > 0)
            .map(|index| self.values[index])
            .ok_or(SlangError::StackUnderflow { position })
    }

    /// Exchanges the top with the bottommost cell.
    pub fn flip(&mut self, position: usize) -> Result<(), SlangError> {
        let last = self
            .values
            .len()
            .checked_sub(1)
            .ok_or(SlangError::StackUnderflow { position })?;
        self.values.swap(0, last);
        Ok(())
    }
}
