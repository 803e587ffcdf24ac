pub mod access;
pub mod attack_chain;
pub mod backlog;
pub mod compliance;
pub mod config;
pub mod enums;
pub mod error;
pub mod matrix;
pub mod maturity;
pub mod monte_carlo;
pub mod rating;
pub mod reference;
pub mod requests;
pub mod sla;
pub mod sla_history;
pub mod validation;

pub use access::Policy;
pub use config::GrcConfig;
pub use enums::*;
pub use error::CoreError;
pub use rating::{RiskLevelSettings, ScoreLevel};
pub use validation::ValidationError;

/// Result type alias for grc-core operations
pub type Result<T> = std::result::Result<T, CoreError>;
