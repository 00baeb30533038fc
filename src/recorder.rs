//! [`Recorder`] creating metrics lazily and routing their mutations.

use std::{fmt, sync::Arc};

use once_cell::sync::OnceCell;

use crate::{
    cell::MetricRef,
    exposition,
    failure::{self, strategy::PanicInDebugPropagateInRelease},
    metric::{
        Counter, CounterVec, Descriptor, Gauge, GaugeVec, LabelTuple, Typed,
    },
    storage::Storage,
    Error, IntoCow,
};

/// [`Recorder`] installed as the process-wide one.
pub type Global = Recorder<Arc<dyn failure::Strategy + Send + Sync>>;

/// Process-wide [`Recorder`].
static GLOBAL: OnceCell<Global> = OnceCell::new();

/// Returns the process-wide [`Recorder`], installing a default one on top of
/// the [`prometheus::default_registry()`] if none has been installed yet.
pub fn global() -> &'static Global {
    GLOBAL.get_or_init(|| Recorder::builder().build().into_dyn())
}

/// Registry of metrics identified by their names, creating each of them on
/// first use and registering it in a [`prometheus::Registry`] exactly once.
///
/// Each created metric gets a dedicated thread being its only writer, so
/// producers never race on the metric values, and never need to know whether
/// a metric exists already. By default, the [`prometheus::default_registry()`]
/// is used.
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
/// recorder.increment_counter("app", "requests", "Served requests.")?;
/// recorder.set_gauge("app", "temperature", "Current temperature.", 36.6)?;
/// recorder.increment_counter_vec(
///     "app",
///     "calls",
///     "Method calls.",
///     &LabelTuple::from([("method", "get"), ("type", "json")]),
/// )?;
/// recorder.flush()?;
///
/// assert_eq!(
///     recorder.render()?.trim(),
///     r#"
/// ## HELP app_calls Method calls.
/// ## TYPE app_calls counter
/// app_calls{method="get",type="json"} 1
/// ## HELP app_requests Served requests.
/// ## TYPE app_requests counter
/// app_requests 1
/// ## HELP app_temperature Current temperature.
/// ## TYPE app_temperature gauge
/// app_temperature 36.6
///     "#
///     .trim(),
/// );
/// # Ok::<_, promexporter::Error>(())
/// ```
///
/// # Errors
///
/// Creating a metric may fail: its [`Descriptor`] may be rejected by
/// [`prometheus`], or the [`prometheus::Registry`] may already contain a
/// collector of the same identity, registered bypassing this [`Recorder`].
/// Such [`Error`]s can be either returned to the caller, or turned into a
/// panic.
///
/// The desired behavior can be specified with a [`failure::Strategy`]
/// implementation of this [`Recorder`]. By default, a
/// [`PanicInDebugPropagateInRelease`] [`failure::Strategy`] is used. See
/// [`failure::strategy`] module for other available [`failure::Strategy`]s,
/// or provide your own one by implementing the [`failure::Strategy`] trait.
///
/// Misuse of an existing metric ([`Error::SchemaMismatch`] on its labels,
/// [`Error::KindMismatch`]) and [`Error::Closed`] are always returned to the
/// caller.
#[derive(Clone)]
pub struct Recorder<FailureStrategy = PanicInDebugPropagateInRelease> {
    /// [`Storage`] of the created metrics.
    storage: Arc<Storage>,

    /// [`failure::Strategy`] to apply when an [`Error`] is encountered while
    /// creating a metric.
    failure_strategy: FailureStrategy,
}

impl<S: fmt::Debug> fmt::Debug for Recorder<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recorder")
            .field("storage", &self.storage)
            .field("failure_strategy", &self.failure_strategy)
            .finish()
    }
}

impl Recorder {
    /// Starts building a new [`Recorder`] on top of the
    /// [`prometheus::default_registry()`].
    pub fn builder() -> Builder {
        Builder {
            registry: prometheus::default_registry().clone(),
            failure_strategy: PanicInDebugPropagateInRelease,
        }
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl<S> Recorder<S> {
    /// Returns the underlying [`prometheus::Registry`] backing this
    /// [`Recorder`].
    ///
    /// # Warning
    ///
    /// Any [`prometheus`] metrics registered directly in the returned
    /// [`prometheus::Registry`] are not known to this [`Recorder`], so trying
    /// to create a metric of the same identity via this [`Recorder`] results
    /// in an [`Error::DuplicateRegistration`].
    #[must_use]
    pub fn registry(&self) -> &prometheus::Registry {
        &self.storage.prometheus
    }

    /// Returns the number of metrics created by this [`Recorder`].
    #[must_use]
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Indicates whether this [`Recorder`] has created no metrics yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Encodes all the metrics of the underlying [`prometheus::Registry`] in
    /// the text exposition format.
    ///
    /// Mutations accepted but not applied yet are not reflected. Call
    /// [`Recorder::flush()`] before, if this matters.
    ///
    /// # Errors
    ///
    /// If [`prometheus::TextEncoder`] fails to encode the metrics.
    pub fn render(&self) -> Result<String, Error> {
        exposition::encode(self.registry())
    }

    /// Blocks until all the mutations accepted so far by all the metrics of
    /// this [`Recorder`] are applied.
    ///
    /// # Errors
    ///
    /// With [`Error::Closed`] if this [`Recorder`] has been shut down having
    /// created some metrics before.
    pub fn flush(&self) -> Result<(), Error> {
        self.storage.flush()
    }

    /// Shuts down all the metrics of this [`Recorder`], once the mutations
    /// accepted by them so far are applied.
    ///
    /// Afterwards, neither new metrics can be created, nor existing ones
    /// mutated, resulting in an [`Error::Closed`]. Already applied values
    /// remain exposed via the [`prometheus::Registry`].
    ///
    /// Idempotent.
    pub fn shutdown(&self) {
        self.storage.shutdown();
    }

    /// Erases the [`failure::Strategy`] type of this [`Recorder`], so it can
    /// be used as a [`Global`] one.
    fn into_dyn(self) -> Global
    where
        S: failure::Strategy + Send + Sync + 'static,
    {
        Recorder {
            storage: self.storage,
            failure_strategy: Arc::new(self.failure_strategy),
        }
    }
}

impl<S: failure::Strategy> Recorder<S> {
    /// Returns the metric described by the provided [`Descriptor`], creating
    /// it if it doesn't exist yet.
    ///
    /// If a metric with the same [`Descriptor::name()`] exists already, it's
    /// returned as is, even if it has been created with another
    /// [`Descriptor`].
    ///
    /// # Errors
    ///
    /// - [`Error::KindMismatch`] if the metric exists already being of
    ///   another [`Kind`].
    /// - Any [`Error`] of creating the metric, if the [`failure::Strategy`]
    ///   decides to propagate it.
    ///
    /// # Panics
    ///
    /// If the metric fails to be created and the [`failure::Strategy`]
    /// decides to panic.
    ///
    /// [`Kind`]: crate::metric::Kind
    pub fn metric<M: Typed>(
        &self,
        desc: Descriptor,
    ) -> Result<MetricRef<M>, Error> {
        let metric = self.resolve::<M>(&desc)?;
        if metric.descriptor() != &desc {
            tracing::warn!(
                metric = %desc.name(),
                existing = ?metric.descriptor(),
                declared = ?desc,
                "metric exists already with another descriptor, keeping it",
            );
        }
        Ok(metric)
    }

    /// Returns the metric with the provided `name`, if it has been created
    /// already.
    ///
    /// # Errors
    ///
    /// With [`Error::KindMismatch`] if the metric is of another [`Kind`].
    ///
    /// [`Kind`]: crate::metric::Kind
    pub fn get<M: Typed>(
        &self,
        name: &str,
    ) -> Result<Option<MetricRef<M>>, Error> {
        self.storage.get(name).map(MetricRef::try_new).transpose()
    }

    /// Creates all the metrics described by the provided [`Descriptor`]s
    /// (or reuses the existing ones).
    ///
    /// # Errors
    ///
    /// On the first [`Error`] returned by [`Recorder::metric()`]. The metrics
    /// created before it remain created.
    ///
    /// # Panics
    ///
    /// If a metric fails to be created and the [`failure::Strategy`] decides
    /// to panic.
    pub fn declare_all<M: Typed>(
        &self,
        descs: impl IntoIterator<Item = Descriptor>,
    ) -> Result<Vec<MetricRef<M>>, Error> {
        descs.into_iter().map(|d| self.metric(d)).collect()
    }

    /// Returns the counter vector with the provided `name`, creating it with
    /// the provided `label_names` if it doesn't exist yet.
    ///
    /// Idempotent: an existing counter vector is returned as is, without
    /// altering its labels.
    ///
    /// # Errors
    ///
    /// See [`Recorder::metric()`].
    ///
    /// # Panics
    ///
    /// See [`Recorder::metric()`].
    pub fn declare_counter_vec<I, L>(
        &self,
        namespace: &str,
        name: &str,
        help: &str,
        label_names: I,
    ) -> Result<MetricRef<CounterVec>, Error>
    where
        I: IntoIterator<Item = L>,
        L: Into<String>,
    {
        self.metric(
            Descriptor::new(namespace, name, help).with_labels(label_names),
        )
    }

    /// Increments by `1` the counter with the provided `name`, creating it if
    /// it doesn't exist yet.
    ///
    /// # Errors
    ///
    /// - [`Error::Closed`] if this [`Recorder`] has been shut down.
    /// - See [`Recorder::metric()`].
    ///
    /// # Panics
    ///
    /// See [`Recorder::metric()`].
    pub fn increment_counter(
        &self,
        namespace: &str,
        name: &str,
        help: &str,
    ) -> Result<(), Error> {
        self.lazy::<Counter>(name, || Descriptor::new(namespace, name, help))?
            .increment()
    }

    /// Increments by `1` the series of the counter vector with the provided
    /// `name`, identified by the provided [`LabelTuple`].
    ///
    /// If the counter vector doesn't exist yet, it's created with the names
    /// of the [`LabelTuple`] as its labels. Prefer declaring it explicitly
    /// via [`Recorder::declare_counter_vec()`] instead, as otherwise the
    /// first caller defines the labels for everyone.
    ///
    /// # Errors
    ///
    /// - [`Error::SchemaMismatch`] if the names of the [`LabelTuple`] are not
    ///   exactly the labels of the counter vector.
    /// - [`Error::Closed`] if this [`Recorder`] has been shut down.
    /// - See [`Recorder::metric()`].
    ///
    /// # Panics
    ///
    /// See [`Recorder::metric()`].
    pub fn increment_counter_vec(
        &self,
        namespace: &str,
        name: &str,
        help: &str,
        tuple: &LabelTuple,
    ) -> Result<(), Error> {
        self.lazy::<CounterVec>(name, || {
            Descriptor::new(namespace, name, help).with_schema(tuple.schema())
        })?
        .increment_with_labels(tuple)
    }

    /// Sets the gauge with the provided `name` to the provided `value`,
    /// creating it if it doesn't exist yet.
    ///
    /// # Errors
    ///
    /// - [`Error::Closed`] if this [`Recorder`] has been shut down.
    /// - See [`Recorder::metric()`].
    ///
    /// # Panics
    ///
    /// See [`Recorder::metric()`].
    pub fn set_gauge(
        &self,
        namespace: &str,
        name: &str,
        help: &str,
        value: f64,
    ) -> Result<(), Error> {
        self.lazy::<Gauge>(name, || Descriptor::new(namespace, name, help))?
            .set(value)
    }

    /// Sets the series `label_name="label_value"` of the single-label gauge
    /// vector with the provided `name` to the provided `value`, creating the
    /// gauge vector if it doesn't exist yet.
    ///
    /// # Errors
    ///
    /// - [`Error::SchemaMismatch`] if the gauge vector exists already having
    ///   other labels.
    /// - [`Error::Closed`] if this [`Recorder`] has been shut down.
    /// - See [`Recorder::metric()`].
    ///
    /// # Panics
    ///
    /// See [`Recorder::metric()`].
    pub fn set_gauge_vec(
        &self,
        namespace: &str,
        name: &str,
        help: &str,
        label_name: &str,
        label_value: &str,
        value: f64,
    ) -> Result<(), Error> {
        self.lazy::<GaugeVec>(name, || {
            Descriptor::new(namespace, name, help).with_labels([label_name])
        })?
        .set_with_labels(
            value,
            &LabelTuple::new().with(label_name, label_value),
        )
    }

    /// Makes the series identified by the provided [`LabelTuple`] the only
    /// series of the gauge vector with the provided `name`, set to the
    /// provided `value`.
    ///
    /// If the gauge vector doesn't exist yet, it's created with the names of
    /// the [`LabelTuple`] as its labels.
    ///
    /// # Errors
    ///
    /// - [`Error::SchemaMismatch`] if the names of the [`LabelTuple`] are not
    ///   exactly the labels of the gauge vector.
    /// - [`Error::Closed`] if this [`Recorder`] has been shut down.
    /// - See [`Recorder::metric()`].
    ///
    /// # Panics
    ///
    /// See [`Recorder::metric()`].
    pub fn replace_gauge_vec(
        &self,
        namespace: &str,
        name: &str,
        help: &str,
        tuple: &LabelTuple,
        value: f64,
    ) -> Result<(), Error> {
        self.lazy::<GaugeVec>(name, || {
            Descriptor::new(namespace, name, help).with_schema(tuple.schema())
        })?
        .reset_then_set(value, tuple)
    }

    /// Returns the existing metric with the provided `name`, or creates it
    /// out of the [`Descriptor`] returned by the provided closure.
    fn lazy<M: Typed>(
        &self,
        name: &str,
        desc: impl FnOnce() -> Descriptor,
    ) -> Result<MetricRef<M>, Error> {
        match self.storage.get(name) {
            Some(cell) => MetricRef::try_new(cell),
            None => self.resolve(&desc()),
        }
    }

    /// Resolves the metric described by the provided [`Descriptor`],
    /// applying the [`failure::Strategy`] to creation [`Error`]s.
    fn resolve<M: Typed>(
        &self,
        desc: &Descriptor,
    ) -> Result<MetricRef<M>, Error> {
        let cell = self.storage.resolve_or_create(desc, M::KIND).or_else(
            |e| match e {
                // Not a failure of creating, but a misuse of an existing
                // metric or a shut down `Recorder`.
                Error::KindMismatch { .. } | Error::Closed { .. } => Err(e),
                e => match self.failure_strategy.decide(&e) {
                    failure::Action::Propagate => Err(e),
                    failure::Action::Panic => panic!(
                        "failed to create {} `{}`: {e}",
                        M::KIND,
                        desc.name(),
                    ),
                },
            },
        )?;
        MetricRef::try_new(cell)
    }
}

/// Builder for building a [`Recorder`].
#[derive(Debug)]
#[must_use]
pub struct Builder<FailureStrategy = PanicInDebugPropagateInRelease> {
    /// [`prometheus::Registry`] to register the created metrics in.
    registry: prometheus::Registry,

    /// [`failure::Strategy`] of the built [`Recorder`] to apply when an
    /// [`Error`] is encountered while creating a metric.
    failure_strategy: FailureStrategy,
}

impl<S> Builder<S> {
    /// Sets the provided [`prometheus::Registry`] to be used by the built
    /// [`Recorder`].
    ///
    /// When not specified, the [`prometheus::default_registry()`] is used by
    /// default.
    ///
    /// # Example
    ///
    /// ```rust
    /// let custom = prometheus::Registry::new_custom(Some("my".into()), None)?;
    ///
    /// let recorder = promexporter::Recorder::builder()
    ///     .with_registry(&custom)
    ///     .build();
    ///
    /// recorder.increment_counter("", "count", "Count.")?;
    /// recorder.flush()?;
    ///
    /// let report = promexporter::exposition::encode(&custom)?;
    /// assert_eq!(
    ///     report.trim(),
    ///     r#"
    /// ## HELP my_count Count.
    /// ## TYPE my_count counter
    /// my_count 1
    ///     "#
    ///     .trim(),
    /// );
    /// # Ok::<_, promexporter::Error>(())
    /// ```
    pub fn with_registry<'r>(
        mut self,
        registry: impl IntoCow<'r, prometheus::Registry>,
    ) -> Self {
        self.registry = registry.into_cow().into_owned();
        self
    }

    /// Sets the provided [`failure::Strategy`] to be used by the built
    /// [`Recorder`].
    ///
    /// The default [`failure::Strategy`] is
    /// [`PanicInDebugPropagateInRelease`]. See [`failure::strategy`] module
    /// for other available [`failure::Strategy`]s, or provide your own one by
    /// implementing the [`failure::Strategy`] trait.
    ///
    /// # Example
    ///
    /// ```rust
    /// use promexporter::failure::strategy;
    ///
    /// let recorder = promexporter::Recorder::builder()
    ///     .with_registry(prometheus::Registry::new())
    ///     .with_failure_strategy(strategy::Propagate)
    ///     .build();
    ///
    /// let res = recorder.increment_counter("", "invalid.name", "help");
    /// assert!(res.is_err());
    /// assert!(recorder.is_empty());
    /// ```
    #[allow(clippy::missing_const_for_fn)] // false positive: drop
    pub fn with_failure_strategy<F>(self, strategy: F) -> Builder<F>
    where
        F: failure::Strategy,
    {
        Builder { registry: self.registry, failure_strategy: strategy }
    }

    /// Builds a [`Recorder`] out of this [`Builder`] without installing it
    /// as the [`global()`] one.
    pub fn build(self) -> Recorder<S> {
        let Self { registry, failure_strategy } = self;
        Recorder { storage: Arc::new(Storage::new(registry)), failure_strategy }
    }

    /// Builds a [`Recorder`] out of this [`Builder`] and tries to install it
    /// as the [`global()`] one.
    ///
    /// # Errors
    ///
    /// With [`Error::AlreadyInstalled`] if the [`global()`] [`Recorder`] has
    /// been installed (or used) already.
    pub fn try_build_and_install(self) -> Result<Recorder<S>, Error>
    where
        S: failure::Strategy + Clone + Send + Sync + 'static,
    {
        let rec = self.build();
        GLOBAL
            .set(rec.clone().into_dyn())
            .map_err(|_| Error::AlreadyInstalled)?;
        Ok(rec)
    }

    /// Builds a [`Recorder`] out of this [`Builder`] and installs it as the
    /// [`global()`] one.
    ///
    /// # Panics
    ///
    /// If the [`global()`] [`Recorder`] has been installed (or used) already.
    pub fn build_and_install(self) -> Recorder<S>
    where
        S: failure::Strategy + Clone + Send + Sync + 'static,
    {
        self.try_build_and_install().unwrap_or_else(|e| {
            panic!("failed to install `promexporter::Recorder`: {e}")
        })
    }
}
