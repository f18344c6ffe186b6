use super::result::IdentityResult;
use crate::domain::DomainError;

/// A batch moving through a multi-stage pipeline.
///
/// Every original position starts as `Success`. Each stage yields one outcome per
/// live item; failed items get their outcome recorded at their original position
/// and drop out, so later stages only see survivors. Once failed, a position is
/// never overwritten.
#[derive(Debug)]
pub struct FilteredBatch<T> {
    results: Vec<IdentityResult>,
    indices: Vec<usize>,
    items: Vec<T>,
}

impl<T> FilteredBatch<T> {
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        let items: Vec<T> = items.into_iter().collect();

        Self {
            results: vec![IdentityResult::Success; items.len()],
            indices: (0..items.len()).collect(),
            items,
        }
    }

    /// Number of live items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Original positions of the live items
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut [T] {
        &mut self.items
    }

    /// Record one stage's outcomes and drop the items that failed
    pub fn apply(
        &mut self,
        stage: &'static str,
        outcomes: Vec<IdentityResult>,
    ) -> Result<(), DomainError> {
        DomainError::ensure_aligned(stage, self.items.len(), outcomes.len())?;

        let items = std::mem::take(&mut self.items);
        let indices = std::mem::take(&mut self.indices);

        for ((index, item), outcome) in indices.into_iter().zip(items).zip(outcomes) {
            let keep = outcome.succeeded();
            self.results[index] = outcome;

            if keep {
                self.indices.push(index);
                self.items.push(item);
            }
        }

        Ok(())
    }

    /// Scatter the recorded outcomes back to the original positions
    pub fn into_results(self) -> Vec<IdentityResult> {
        self.results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::identity::IdentityError;

    #[test]
    fn test_new_batch_is_all_success() {
        let batch = FilteredBatch::new(["a", "b", "c"]);

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.indices(), &[0, 1, 2]);
        assert!(batch.into_results().iter().all(IdentityResult::succeeded));
    }

    #[test]
    fn test_apply_drops_failed_items() {
        let mut batch = FilteredBatch::new(["a", "b", "c", "d"]);

        batch
            .apply(
                "first",
                vec![
                    IdentityResult::Success,
                    IdentityResult::failed(IdentityError::PasswordRequiresDigit),
                    IdentityResult::Success,
                    IdentityResult::Success,
                ],
            )
            .unwrap();

        assert_eq!(batch.items(), &["a", "c", "d"]);
        assert_eq!(batch.indices(), &[0, 2, 3]);

        batch
            .apply(
                "second",
                vec![
                    IdentityResult::Success,
                    IdentityResult::Success,
                    IdentityResult::failed(IdentityError::ConcurrencyFailure),
                ],
            )
            .unwrap();

        assert_eq!(batch.items(), &["a", "c"]);

        let results = batch.into_results();
        assert!(results[0].succeeded());
        assert_eq!(results[1].errors(), &[IdentityError::PasswordRequiresDigit]);
        assert!(results[2].succeeded());
        assert_eq!(results[3].errors(), &[IdentityError::ConcurrencyFailure]);
    }

    #[test]
    fn test_apply_rejects_misaligned_outcomes() {
        let mut batch = FilteredBatch::new([1, 2]);

        let error = batch
            .apply("short", vec![IdentityResult::Success])
            .unwrap_err();

        assert!(matches!(error, DomainError::Misaligned { stage: "short", .. }));
    }

    #[test]
    fn test_empty_batch() {
        let mut batch: FilteredBatch<u8> = FilteredBatch::new([]);
        batch.apply("noop", vec![]).unwrap();

        assert!(batch.is_empty());
        assert!(batch.into_results().is_empty());
    }
}
