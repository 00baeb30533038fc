//! [`Error`] returned by this crate.

use std::io;

use crate::metric::Kind;

/// Possible errors of creating or mutating a metric.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Supplied label names or values don't match the label schema of the
    /// metric.
    #[error(
        "labels of metric `{name}` don't match its schema: expected \
         {expected:?}, got {got:?}"
    )]
    SchemaMismatch {
        /// Name of the metric.
        name: String,

        /// Label names declared by the metric.
        expected: Vec<String>,

        /// Label names (or positional placeholders) supplied by the caller.
        got: Vec<String>,
    },

    /// Vector metric has been declared without any label.
    #[error("vector metric `{name}` must declare at least one label")]
    EmptySchema {
        /// Name of the metric.
        name: String,
    },

    /// Metric name is already bound to a metric of another [`Kind`].
    #[error(
        "metric `{name}` is already registered as {registered}, not as \
         {requested}"
    )]
    KindMismatch {
        /// Name of the metric.
        name: String,

        /// [`Kind`] the metric has been created with.
        registered: Kind,

        /// [`Kind`] the caller asked for.
        requested: Kind,
    },

    /// [`prometheus::Registry`] already contains a collector with the same
    /// identity.
    #[error("metric `{name}` is already registered in `prometheus::Registry`")]
    DuplicateRegistration {
        /// Fully qualified name of the metric.
        name: String,
    },

    /// Mutator of the metric has been shut down.
    #[error("metric `{name}` doesn't accept mutations anymore: shut down")]
    Closed {
        /// Name of the metric.
        name: String,
    },

    /// Mutator thread of the metric failed to start.
    #[error("failed to spawn mutator of metric `{name}`: {source}")]
    Spawn {
        /// Name of the metric.
        name: String,

        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Global [`Recorder`] has been installed already.
    ///
    /// [`Recorder`]: crate::Recorder
    #[error("global `promexporter::Recorder` is installed already")]
    AlreadyInstalled,

    /// Any other error of the [`prometheus`] backend.
    #[error(transparent)]
    Prometheus(#[from] prometheus::Error),
}

impl Error {
    /// Indicates whether this [`Error`] signals a broken single-registration
    /// invariant.
    #[must_use]
    pub const fn is_duplicate_registration(&self) -> bool {
        matches!(self, Self::DuplicateRegistration { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_mismatch_lists_both_sides() {
        let err = Error::SchemaMismatch {
            name: "devs".into(),
            expected: vec!["method".into(), "type".into()],
            got: vec!["#0".into()],
        };

        assert_eq!(
            err.to_string(),
            "labels of metric `devs` don't match its schema: expected \
             [\"method\", \"type\"], got [\"#0\"]",
        );
    }

    #[test]
    fn kind_mismatch_names_kinds() {
        let err = Error::KindMismatch {
            name: "up".into(),
            registered: Kind::Counter,
            requested: Kind::GaugeVec,
        };

        assert_eq!(
            err.to_string(),
            "metric `up` is already registered as counter, not as gauge \
             vector",
        );
    }
}
