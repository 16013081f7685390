pub mod agent;
pub mod binance;
pub mod lifecycle;

pub use agent::Agent;
pub use binance::BinanceClient;
pub use lifecycle::{CycleOutcome, ReadinessError, RestartPolicy};
