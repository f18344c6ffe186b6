//! Observability infrastructure - logging and batch metrics

mod logging;
mod metrics;

pub use logging::init_logging;
pub use metrics::{record_batch, record_results};
