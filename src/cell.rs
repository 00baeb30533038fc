//! Live state of the registered metrics and typed references to it.

use std::{fmt, marker::PhantomData, sync::Arc};

use crate::{
    metric::{
        Counter, CounterVec, Descriptor, Gauge, GaugeVec, Kind, LabelTuple,
        Typed,
    },
    mutator::{Mutator, Request},
    Error,
};

/// Live state backing a single registered metric.
///
/// The [`prometheus`] object itself is owned by the [`Mutator`] of this
/// [`Cell`], so the only way to change it is a [`Request`] to that
/// [`Mutator`].
#[derive(Debug)]
pub(crate) struct Cell {
    /// [`Descriptor`] this [`Cell`] has been created with.
    descriptor: Descriptor,

    /// [`Kind`] of the metric.
    kind: Kind,

    /// Sole writer of the metric.
    mutator: Mutator,
}

impl Cell {
    pub(crate) const fn new(
        descriptor: Descriptor,
        kind: Kind,
        mutator: Mutator,
    ) -> Self {
        Self { descriptor, kind, mutator }
    }

    pub(crate) const fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    pub(crate) const fn kind(&self) -> Kind {
        self.kind
    }

    pub(crate) fn submit(&self, req: Request) -> Result<(), Error> {
        self.mutator.submit(req)
    }

    pub(crate) fn flush(&self) -> Result<(), Error> {
        self.mutator.flush()
    }

    pub(crate) fn shutdown(&self) {
        self.mutator.shutdown();
    }
}

/// Reference to a registered metric of the `M` [`Kind`].
///
/// All the mutations go through the single dedicated writer of the metric,
/// so [`MetricRef`]s may be freely cloned and used from any thread. Each
/// mutation returns as soon as it's accepted by the writer, which is not
/// necessarily when it's applied. Use [`MetricRef::flush()`] to wait for
/// the latter.
///
/// # Example
///
/// ```rust
/// use promexporter::metric::LabelTuple;
///
/// let recorder = promexporter::Recorder::builder()
///     .with_registry(prometheus::Registry::new())
///     .build();
///
/// let devs = recorder.declare_counter_vec(
///     "company",
///     "devs",
///     "Developers activity.",
///     ["method", "type"],
/// )?;
/// devs.increment_with_values(&["1", "2"])?;
/// devs.increment_with_labels(&LabelTuple::from([
///     ("type", "2"),
///     ("method", "1"),
/// ]))?;
/// devs.flush()?;
///
/// assert_eq!(
///     recorder.render()?.trim(),
///     r#"
/// ## HELP company_devs Developers activity.
/// ## TYPE company_devs counter
/// company_devs{method="1",type="2"} 2
///     "#
///     .trim(),
/// );
/// # Ok::<_, promexporter::Error>(())
/// ```
pub struct MetricRef<M> {
    cell: Arc<Cell>,
    _kind: PhantomData<M>,
}

// Manual implementation is required to omit the redundant `M: Clone` trait
// bound imposed by `#[derive(Clone)]`.
impl<M> Clone for MetricRef<M> {
    fn clone(&self) -> Self {
        Self { cell: Arc::clone(&self.cell), _kind: PhantomData }
    }
}

impl<M: Typed> fmt::Debug for MetricRef<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricRef")
            .field("kind", &M::KIND)
            .field("descriptor", self.cell.descriptor())
            .finish_non_exhaustive()
    }
}

impl<M: Typed> MetricRef<M> {
    /// Wraps the provided [`Cell`], checking its [`Kind`] to be the `M` one.
    ///
    /// # Errors
    ///
    /// With [`Error::KindMismatch`] if the [`Cell`] is of another [`Kind`].
    pub(crate) fn try_new(cell: Arc<Cell>) -> Result<Self, Error> {
        if cell.kind() != M::KIND {
            return Err(Error::KindMismatch {
                name: cell.descriptor().name().into(),
                registered: cell.kind(),
                requested: M::KIND,
            });
        }
        Ok(Self { cell, _kind: PhantomData })
    }
}

impl<M> MetricRef<M> {
    /// Returns the [`Descriptor`] the referred metric has been created with.
    #[must_use]
    pub fn descriptor(&self) -> &Descriptor {
        self.cell.descriptor()
    }

    /// Indicates whether both [`MetricRef`]s refer the very same metric.
    #[must_use]
    pub fn same_cell(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    /// Blocks until all the mutations of the referred metric accepted so far
    /// are applied.
    ///
    /// # Errors
    ///
    /// With [`Error::Closed`] if the metric has been shut down.
    pub fn flush(&self) -> Result<(), Error> {
        self.cell.flush()
    }

    fn name(&self) -> &str {
        self.cell.descriptor().name()
    }
}

impl MetricRef<Counter> {
    /// Increments the referred counter by `1`.
    ///
    /// # Errors
    ///
    /// With [`Error::Closed`] if the metric has been shut down.
    pub fn increment(&self) -> Result<(), Error> {
        self.cell.submit(Request::Increment)
    }
}

impl MetricRef<Gauge> {
    /// Sets the referred gauge to the provided `value`.
    ///
    /// # Errors
    ///
    /// With [`Error::Closed`] if the metric has been shut down.
    pub fn set(&self, value: f64) -> Result<(), Error> {
        self.cell.submit(Request::Set(value))
    }
}

impl MetricRef<CounterVec> {
    /// Increments by `1` the series identified by the provided label
    /// `values`, bound positionally to the label schema of the metric.
    ///
    /// # Errors
    ///
    /// - [`Error::SchemaMismatch`] if the number of `values` differs from
    ///   the number of the declared labels.
    /// - [`Error::Closed`] if the metric has been shut down.
    pub fn increment_with_values<S: AsRef<str>>(
        &self,
        values: &[S],
    ) -> Result<(), Error> {
        let values =
            self.descriptor().schema().bind_values(self.name(), values)?;
        self.cell.submit(Request::IncrementLabeled(values))
    }

    /// Increments by `1` the series identified by the provided
    /// [`LabelTuple`].
    ///
    /// # Errors
    ///
    /// - [`Error::SchemaMismatch`] if names of the [`LabelTuple`] are not
    ///   exactly the declared label names (in any order).
    /// - [`Error::Closed`] if the metric has been shut down.
    pub fn increment_with_labels(
        &self,
        tuple: &LabelTuple,
    ) -> Result<(), Error> {
        let values = self.descriptor().schema().bind_tuple(self.name(), tuple)?;
        self.cell.submit(Request::IncrementLabeled(values))
    }
}

impl MetricRef<GaugeVec> {
    /// Sets the series identified by the provided label `values`, bound
    /// positionally to the label schema of the metric, to the provided
    /// `value`.
    ///
    /// # Errors
    ///
    /// - [`Error::SchemaMismatch`] if the number of `values` differs from
    ///   the number of the declared labels.
    /// - [`Error::Closed`] if the metric has been shut down.
    pub fn set_with_values<S: AsRef<str>>(
        &self,
        value: f64,
        values: &[S],
    ) -> Result<(), Error> {
        let values =
            self.descriptor().schema().bind_values(self.name(), values)?;
        self.cell.submit(Request::SetLabeled(value, values))
    }

    /// Sets the series identified by the provided [`LabelTuple`] to the
    /// provided `value`.
    ///
    /// # Errors
    ///
    /// - [`Error::SchemaMismatch`] if names of the [`LabelTuple`] are not
    ///   exactly the declared label names (in any order).
    /// - [`Error::Closed`] if the metric has been shut down.
    pub fn set_with_labels(
        &self,
        value: f64,
        tuple: &LabelTuple,
    ) -> Result<(), Error> {
        let values = self.descriptor().schema().bind_tuple(self.name(), tuple)?;
        self.cell.submit(Request::SetLabeled(value, values))
    }

    /// Drops all the series of the referred gauge and then sets the one
    /// identified by the provided [`LabelTuple`] to the provided `value`,
    /// leaving it the only series of the metric.
    ///
    /// # Errors
    ///
    /// - [`Error::SchemaMismatch`] if names of the [`LabelTuple`] are not
    ///   exactly the declared label names (in any order).
    /// - [`Error::Closed`] if the metric has been shut down.
    pub fn reset_then_set(
        &self,
        value: f64,
        tuple: &LabelTuple,
    ) -> Result<(), Error> {
        let values = self.descriptor().schema().bind_tuple(self.name(), tuple)?;
        self.cell.submit(Request::ResetThenSet(value, values))
    }
}
