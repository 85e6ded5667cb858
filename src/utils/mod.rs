//! Utility modules

pub mod alerts;
pub mod logger;
pub mod metrics;
pub mod prices;

pub use alerts::AlertService;
pub use logger::init_logger;
pub use metrics::MetricsService;
pub use prices::PriceOracle;
