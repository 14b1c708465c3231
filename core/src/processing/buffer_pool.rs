use crate::prelude::StepError;

/// Scoped pool of lane buffers that caps how many can be out at once.
pub struct BufferPool {
    buffers: Vec<Vec<f32>>,
    max_capacity: usize,
    outstanding: usize,
}

impl BufferPool {
    pub fn with_capacity(max_capacity: usize) -> Self {
        Self {
            buffers: Vec::with_capacity(max_capacity),
            max_capacity,
            outstanding: 0,
        }
    }

    /// Hands out a zeroed buffer of `length`, reusing a released one if any.
    pub fn checkout(&mut self, length: usize) -> Result<Vec<f32>, StepError> {
        if self.outstanding >= self.max_capacity {
            return Err(StepError::Internal("buffer pool depleted".to_string()));
        }
        self.outstanding += 1;
        Ok(match self.buffers.pop() {
            Some(mut buffer) => {
                buffer.resize(length, 0.0);
                buffer
            }
            None => vec![0.0; length],
        })
    }

    /// Returns a buffer back to the pool for reuse.
    pub fn release(&mut self, mut buffer: Vec<f32>) {
        buffer.clear();
        self.outstanding = self.outstanding.saturating_sub(1);
        if self.buffers.len() < self.max_capacity {
            self.buffers.push(buffer);
        }
    }

    pub fn reset(&mut self) {
        self.buffers.clear();
        self.outstanding = 0;
    }
}
