pub mod pricing;
pub mod retry;

pub use pricing::PricingTable;
pub use retry::RetryPolicy;
