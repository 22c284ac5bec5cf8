pub mod clock;
pub mod config;
pub mod random;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    ApiConfig, CircuitBreakerConfig, DnsFailurePolicy, RetryConfig, UrlGuardConfig,
    WeightCacheConfig, WgerConfig,
};
pub use random::{FixedRandom, RandomSource, SeededRandom, ThreadRandom};
