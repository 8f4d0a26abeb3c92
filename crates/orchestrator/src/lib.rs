pub mod live;
pub mod monitor;
pub mod orchestrator;
pub mod rate_limit;

pub use orchestrator::Orchestrator;
pub use rate_limit::DomRateLimiter;
