//! Batch outcome metrics. Installing a recorder is left to the host.

use metrics::{counter, histogram};

use crate::domain::identity::IdentityResult;

/// Record the outcome of one batch operation
pub fn record_batch(operation: &'static str, succeeded: usize, failed: usize) {
    counter!(
        "identity_batch_items_total",
        "operation" => operation,
        "outcome" => "succeeded"
    )
    .increment(succeeded as u64);
    counter!(
        "identity_batch_items_total",
        "operation" => operation,
        "outcome" => "failed"
    )
    .increment(failed as u64);
    histogram!("identity_batch_size", "operation" => operation)
        .record((succeeded + failed) as f64);
}

/// Count the outcomes of a batch and record them
pub fn record_results(operation: &'static str, results: &[IdentityResult]) {
    let succeeded = results.iter().filter(|r| r.succeeded()).count();
    record_batch(operation, succeeded, results.len() - succeeded);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::identity::IdentityError;

    #[test]
    fn test_record_without_recorder_is_noop() {
        record_batch("create", 3, 1);
        record_results(
            "update",
            &[
                IdentityResult::Success,
                IdentityResult::failed(IdentityError::ConcurrencyFailure),
            ],
        );
    }
}
