mod health;
mod metrics;

pub use health::health;
pub use metrics::metrics;
