//! Process-wide tracing setup.

pub mod tracing;

/// Initialize process-wide observability.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init() {
    tracing::init();
}
