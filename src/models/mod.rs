// Domain models shared by the pool, collectors and the display layer

mod host;
mod record;

pub use host::{DEFAULT_SSH_PORT, HostTarget, RetryPolicy};
pub use record::MetricRecord;
