use thiserror::Error;

/// Top-level error type for the strider crates.
#[derive(Debug, Error)]
pub enum StriderError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Footstep plan error: {0}")]
    Plan(#[from] PlanError),

    #[error("Solver error: {0}")]
    Solver(#[from] SolverError),
}

/// Configuration errors, fatal at load time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Unknown foot surface: {0}")]
    UnknownSurface(String),

    #[error("Unknown footstep plan: {0}")]
    UnknownPlan(String),

    #[error("Unknown robot model: {0}")]
    UnknownRobotModel(String),
}

/// Footstep plan structural errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("Plan needs at least 2 contacts, got {got}")]
    TooFewContacts { got: usize },

    #[error("Plan cursor already at terminal footstep")]
    PastEnd,
}

/// Errors from the dense least-squares QP wrapper.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("QP solver reported {status}")]
    Infeasible { status: String },

    #[error("QP dimension mismatch: {message}")]
    DimensionMismatch { message: String },
}
