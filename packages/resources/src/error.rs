/// Misuse of a resource primitive, detected before anything is committed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("{operation}: unknown resource '{name}'")]
    UnknownResource {
        operation: &'static str,
        name: String,
    },
    #[error("{operation}: at least one resource amount is required")]
    MissingAmounts { operation: &'static str },
    #[error("{operation}: amount of '{name}' must not be negative")]
    NegativeAmount {
        operation: &'static str,
        name: String,
    },
    #[error("borrow: amount of '{name}' exceeds the pool capacity")]
    CapacityExceeded { name: String },
    #[error("decrease: capacity of '{name}' would drop below zero")]
    CapacityUnderflow { name: String },
    #[error("capacity of '{name}' must be greater than zero")]
    NonPositiveCapacity { name: String },
    #[error("usage: {0}")]
    Usage(&'static str),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
