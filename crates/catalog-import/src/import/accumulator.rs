//! Batch accumulator
//!
//! Buffers validated rows until the configured batch size is reached. A run
//! owns exactly one accumulator, so there is no locking here.

use crate::models::ProductRow;

/// Ordered group of validated rows handed to the upsert engine
pub type Batch = Vec<ProductRow>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Accepted,
    /// The buffer reached the batch size and should be flushed
    BatchReady,
}

#[derive(Debug)]
pub struct BatchAccumulator {
    batch_size: usize,
    buffer: Batch,
}

impl BatchAccumulator {
    /// `batch_size` is clamped to at least one row
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            buffer: Vec::with_capacity(batch_size),
        }
    }

    pub fn add(&mut self, row: ProductRow) -> AddOutcome {
        self.buffer.push(row);
        if self.buffer.len() >= self.batch_size {
            AddOutcome::BatchReady
        } else {
            AddOutcome::Accepted
        }
    }

    /// Take the buffered rows, leaving the accumulator empty
    pub fn flush(&mut self) -> Batch {
        std::mem::replace(&mut self.buffer, Vec::with_capacity(self.batch_size))
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;

    fn product(n: u64) -> ProductRow {
        ProductRow {
            sku: format!("SKU-{}", n),
            name: format!("Product {}", n),
            description: String::new(),
            price: BigDecimal::from(n),
            line: n + 1,
        }
    }

    #[test]
    fn test_signals_ready_at_threshold() {
        let mut acc = BatchAccumulator::new(2);

        assert_eq!(acc.add(product(1)), AddOutcome::Accepted);
        assert_eq!(acc.add(product(2)), AddOutcome::BatchReady);

        let batch = acc.flush();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].sku, "SKU-1");
        assert_eq!(batch[1].sku, "SKU-2");
        assert!(acc.is_empty());
    }

    #[test]
    fn test_flush_returns_partial_batch() {
        let mut acc = BatchAccumulator::new(1000);
        acc.add(product(1));
        acc.add(product(2));
        acc.add(product(3));

        assert_eq!(acc.len(), 3);
        assert_eq!(acc.flush().len(), 3);
        assert!(acc.flush().is_empty());
    }

    #[test]
    fn test_zero_batch_size_is_clamped() {
        let mut acc = BatchAccumulator::new(0);
        assert_eq!(acc.batch_size(), 1);
        assert_eq!(acc.add(product(1)), AddOutcome::BatchReady);
    }
}
