//! Crate-wide error plumbing.
//!
//! Most code returns `anyhow::Result` and attaches context with
//! `.with_context(...)` at syscall/IO boundaries. The small set of errors the
//! CLI needs to match on by kind (not just print) are `RuntimeError`
//! variants, downcast out of the `anyhow::Error` chain at the call site that
//! cares.

pub type Result<T> = anyhow::Result<T>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no such container: {0}")]
    NoSuchContainer(String),

    #[error("no such network: {0}")]
    NoSuchNetwork(String),

    #[error("container {0} is not stopped")]
    ContainerNotStopped(String),

    #[error("container {0} has no running process")]
    ContainerNotRunning(String),

    #[error("invalid signal: {0}")]
    InvalidSignal(String),

    #[error("invalid CIDR: {0}")]
    InvalidCidr(String),

    #[error("address pool for {0} is exhausted")]
    PoolExhausted(String),

    #[error("missing user command")]
    MissingCommand,
}
