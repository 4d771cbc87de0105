mod backoff;
mod executor;

pub use backoff::BackoffPolicy;
pub use executor::{ErrorClass, RetryContext, RetryError, RetryExecutor};
