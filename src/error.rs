//! Typed routing errors.
//!
//! Everything else in the crate reports failures through `anyhow`. Routing
//! failures get their own type because callers branch on them: the rendered
//! messages are stable and callers may match either on the variant (via
//! `anyhow::Error::downcast_ref`) or on the message text.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoutingError {
    /// The type tag does not name any known importer.
    #[error("unsupported driver type: {0}")]
    UnsupportedDriver(String),

    /// The type tag is known but has no refresh strategy.
    #[error("data source type '{0}' does not support refresh")]
    RefreshUnsupported(String),

    /// PostgreSQL is recognised as a tag but has no importer.
    #[error("postgresql driver not supported yet")]
    PostgresUnsupported,
}
