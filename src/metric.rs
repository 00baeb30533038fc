//! Data model of the metrics: their [`Descriptor`]s, [`Kind`]s and label
//! [`Schema`]s.

use std::fmt;

use sealed::sealed;
use smallvec::SmallVec;

use crate::Error;

/// Label values bound to the order of a [`Schema`].
pub(crate) type Values = SmallVec<[String; 4]>;

/// Kind of a metric, fixed at its creation.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Kind {
    /// Scalar [`prometheus::IntCounter`].
    Counter,

    /// Scalar [`prometheus::Gauge`].
    Gauge,

    /// [`prometheus::IntCounterVec`] with a non-empty [`Schema`].
    CounterVec,

    /// [`prometheus::GaugeVec`] with a non-empty [`Schema`].
    GaugeVec,
}

impl Kind {
    /// Indicates whether this [`Kind`] requires a non-empty [`Schema`].
    #[must_use]
    pub const fn is_vec(self) -> bool {
        matches!(self, Self::CounterVec | Self::GaugeVec)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::CounterVec => "counter vector",
            Self::GaugeVec => "gauge vector",
        })
    }
}

/// Type-level [`Kind`] of a [`MetricRef`].
///
/// [`MetricRef`]: crate::MetricRef
#[sealed]
pub trait Typed {
    /// [`Kind`] represented by this type.
    const KIND: Kind;
}

/// Type-level [`Kind::Counter`].
#[derive(Clone, Copy, Debug)]
pub struct Counter;

/// Type-level [`Kind::Gauge`].
#[derive(Clone, Copy, Debug)]
pub struct Gauge;

/// Type-level [`Kind::CounterVec`].
#[derive(Clone, Copy, Debug)]
pub struct CounterVec;

/// Type-level [`Kind::GaugeVec`].
#[derive(Clone, Copy, Debug)]
pub struct GaugeVec;

#[sealed]
impl Typed for Counter {
    const KIND: Kind = Kind::Counter;
}

#[sealed]
impl Typed for Gauge {
    const KIND: Kind = Kind::Gauge;
}

#[sealed]
impl Typed for CounterVec {
    const KIND: Kind = Kind::CounterVec;
}

#[sealed]
impl Typed for GaugeVec {
    const KIND: Kind = Kind::GaugeVec;
}

/// Immutable identity of a metric.
///
/// Only the [`Descriptor::name()`] is used to identify a metric in a
/// [`Recorder`], while the [`Descriptor::namespace()`] only prefixes the
/// name exposed to [`prometheus`].
///
/// [`Recorder`]: crate::Recorder
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Descriptor {
    namespace: String,
    name: String,
    help: String,
    schema: Schema,
}

impl Descriptor {
    /// Creates a new [`Descriptor`] with an empty [`Schema`].
    #[must_use]
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        help: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            help: help.into(),
            schema: Schema::default(),
        }
    }

    /// Sets the label names of this [`Descriptor`], in the order positional
    /// values are bound to them.
    #[must_use]
    pub fn with_labels<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.schema = names.into_iter().collect();
        self
    }

    /// Sets the provided [`Schema`] of this [`Descriptor`].
    #[must_use]
    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = schema;
        self
    }

    /// Returns the namespace of the described metric.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the name of the described metric, identifying it in a
    /// [`Recorder`].
    ///
    /// [`Recorder`]: crate::Recorder
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the `help` description of the described metric.
    #[must_use]
    pub fn help(&self) -> &str {
        &self.help
    }

    /// Returns the label [`Schema`] of the described metric.
    #[must_use]
    pub const fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Returns the name of the described metric as exposed by [`prometheus`].
    #[must_use]
    pub fn fq_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}_{}", self.namespace, self.name)
        }
    }

    fn opts(&self) -> prometheus::Opts {
        // `prometheus` crate doesn't allow empty `help`, so we fall back to
        // the metric name, as its best description available.
        let help = if self.help.is_empty() { &self.name } else { &self.help };
        prometheus::Opts::new(self.name.as_str(), help.as_str())
            .namespace(self.namespace.as_str())
    }
}

/// Ordered label names of a vector metric.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Schema(SmallVec<[String; 4]>);

impl<S: Into<String>> FromIterator<S> for Schema {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl Schema {
    /// Returns the number of labels in this [`Schema`].
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Indicates whether this [`Schema`] has no labels (describes a scalar
    /// metric).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the label names of this [`Schema`] in their declared
    /// order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Binds the provided `values` to this [`Schema`] positionally.
    ///
    /// # Errors
    ///
    /// With [`Error::SchemaMismatch`] if the number of `values` differs from
    /// the number of labels.
    pub(crate) fn bind_values<S: AsRef<str>>(
        &self,
        metric: &str,
        values: &[S],
    ) -> Result<Values, Error> {
        if values.len() != self.len() {
            return Err(Error::SchemaMismatch {
                name: metric.into(),
                expected: self.0.to_vec(),
                got: (0..values.len()).map(|i| format!("#{i}")).collect(),
            });
        }
        Ok(values.iter().map(|v| v.as_ref().to_owned()).collect())
    }

    /// Binds the values of the provided [`LabelTuple`] to this [`Schema`] by
    /// their names, regardless of the order they're listed in.
    ///
    /// # Errors
    ///
    /// With [`Error::SchemaMismatch`] if names of the [`LabelTuple`] are not
    /// exactly the ones of this [`Schema`].
    pub(crate) fn bind_tuple(
        &self,
        metric: &str,
        tuple: &LabelTuple,
    ) -> Result<Values, Error> {
        let mismatch = || Error::SchemaMismatch {
            name: metric.into(),
            expected: self.0.to_vec(),
            got: tuple.names().map(ToOwned::to_owned).collect(),
        };

        if tuple.len() != self.len() {
            return Err(mismatch());
        }
        // Equal lengths plus every schema name being found means the sets of
        // names are equal, as a `Schema` of a created metric has no
        // duplicates.
        self.names()
            .map(|name| {
                tuple.value_of(name).map(ToOwned::to_owned).ok_or_else(mismatch)
            })
            .collect()
    }
}

/// Binding of a label name to its value.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Label {
    /// Name of the label.
    pub name: String,

    /// Value of the label.
    pub value: String,
}

impl Label {
    /// Creates a new [`Label`].
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into() }
    }
}

impl<N: Into<String>, V: Into<String>> From<(N, V)> for Label {
    fn from((name, value): (N, V)) -> Self {
        Self::new(name, value)
    }
}

/// Ordered [`Label`]s identifying a single series of a vector metric.
///
/// ```rust
/// use promexporter::metric::LabelTuple;
///
/// let tuple = LabelTuple::from([("method", "GET"), ("type", "json")]);
///
/// assert_eq!(tuple.value_of("type"), Some("json"));
/// assert_eq!(tuple.names().collect::<Vec<_>>(), ["method", "type"]);
/// ```
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LabelTuple(SmallVec<[Label; 4]>);

impl LabelTuple {
    /// Creates a new empty [`LabelTuple`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a [`Label`] to this [`LabelTuple`].
    #[must_use]
    pub fn with(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.0.push(Label::new(name, value));
        self
    }

    /// Returns the number of [`Label`]s in this [`LabelTuple`].
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Indicates whether this [`LabelTuple`] contains no [`Label`]s.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the [`Label`]s of this [`LabelTuple`].
    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.0.iter()
    }

    /// Iterates over the label names of this [`LabelTuple`].
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|l| l.name.as_str())
    }

    /// Returns the value of the first [`Label`] with the provided `name`, if
    /// any.
    #[must_use]
    pub fn value_of(&self, name: &str) -> Option<&str> {
        self.0.iter().find(|l| l.name == name).map(|l| l.value.as_str())
    }

    /// Infers a [`Schema`] from the names of this [`LabelTuple`], in their
    /// order.
    #[must_use]
    pub fn schema(&self) -> Schema {
        self.names().collect()
    }
}

impl<L: Into<Label>> FromIterator<L> for LabelTuple {
    fn from_iter<I: IntoIterator<Item = L>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl<L: Into<Label>, const N: usize> From<[L; N]> for LabelTuple {
    fn from(labels: [L; N]) -> Self {
        labels.into_iter().collect()
    }
}

/// [`prometheus`] object backing a metric.
#[derive(Clone, Debug)]
pub(crate) enum Handle {
    Counter(prometheus::IntCounter),
    Gauge(prometheus::Gauge),
    CounterVec(prometheus::IntCounterVec),
    GaugeVec(prometheus::GaugeVec),
}

impl Handle {
    /// Builds a new [`prometheus`] object of the provided [`Kind`] out of the
    /// provided [`Descriptor`].
    ///
    /// # Errors
    ///
    /// - [`Error::SchemaMismatch`] if a scalar [`Kind`] is given labels.
    /// - [`Error::EmptySchema`] if a vector [`Kind`] is given no labels.
    /// - [`Error::Prometheus`] if [`prometheus`] rejects the [`Descriptor`].
    pub(crate) fn build(kind: Kind, desc: &Descriptor) -> Result<Self, Error> {
        let labels = desc.schema.names().collect::<SmallVec<[_; 10]>>();
        if kind.is_vec() && labels.is_empty() {
            return Err(Error::EmptySchema { name: desc.name.clone() });
        }
        if !kind.is_vec() && !labels.is_empty() {
            return Err(Error::SchemaMismatch {
                name: desc.name.clone(),
                expected: vec![],
                got: desc.schema.0.to_vec(),
            });
        }

        let opts = desc.opts();
        Ok(match kind {
            Kind::Counter => {
                Self::Counter(prometheus::IntCounter::with_opts(opts)?)
            }
            Kind::Gauge => Self::Gauge(prometheus::Gauge::with_opts(opts)?),
            Kind::CounterVec => {
                Self::CounterVec(prometheus::IntCounterVec::new(opts, &labels)?)
            }
            Kind::GaugeVec => {
                Self::GaugeVec(prometheus::GaugeVec::new(opts, &labels)?)
            }
        })
    }
}

impl prometheus::core::Collector for Handle {
    fn desc(&self) -> Vec<&prometheus::core::Desc> {
        match self {
            Self::Counter(m) => m.desc(),
            Self::Gauge(m) => m.desc(),
            Self::CounterVec(v) => v.desc(),
            Self::GaugeVec(v) => v.desc(),
        }
    }

    fn collect(&self) -> Vec<prometheus::proto::MetricFamily> {
        match self {
            Self::Counter(m) => m.collect(),
            Self::Gauge(m) => m.collect(),
            Self::CounterVec(v) => v.collect(),
            Self::GaugeVec(v) => v.collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn schema(names: &[&str]) -> Schema {
        names.iter().copied().collect()
    }

    #[test]
    fn fq_name_joins_namespace() {
        let desc = Descriptor::new("companyNameSpace", "devs", "help");
        assert_eq!(desc.fq_name(), "companyNameSpace_devs");

        let desc = Descriptor::new("", "devs", "help");
        assert_eq!(desc.fq_name(), "devs");
    }

    #[test]
    fn positional_binding_keeps_order() {
        let values = schema(&["method", "type"])
            .bind_values("devs", &["GET", "json"])
            .unwrap();

        assert_eq!(values.as_slice(), ["GET", "json"]);
    }

    #[test]
    fn positional_binding_rejects_partial_values() {
        let err = schema(&["method", "type"])
            .bind_values("devs", &["GET"])
            .unwrap_err();

        assert!(
            matches!(
                err,
                Error::SchemaMismatch { ref name, .. } if name == "devs",
            ),
            "unexpected error: {err}",
        );
    }

    #[test]
    fn tuple_binding_rejects_foreign_names() {
        let tuple = LabelTuple::from([("method", "GET"), ("kind", "json")]);

        let err = schema(&["method", "type"]).bind_tuple("devs", &tuple);

        assert!(matches!(err, Err(Error::SchemaMismatch { .. })));
    }

    #[test]
    fn tuple_binding_rejects_repeated_names() {
        let tuple = LabelTuple::from([("method", "GET"), ("method", "PUT")]);

        let err = schema(&["method", "type"]).bind_tuple("devs", &tuple);

        assert!(matches!(err, Err(Error::SchemaMismatch { .. })));
    }

    #[test]
    fn tuple_infers_schema_in_order() {
        let tuple = LabelTuple::new().with("type", "x").with("method", "a");

        assert_eq!(tuple.schema(), schema(&["type", "method"]));
    }

    #[test]
    fn scalar_kinds_refuse_labels() {
        let desc = Descriptor::new("ns", "up", "help").with_labels(["zone"]);

        assert!(matches!(
            Handle::build(Kind::Gauge, &desc),
            Err(Error::SchemaMismatch { .. }),
        ));
    }

    #[test]
    fn vector_kinds_require_labels() {
        let desc = Descriptor::new("ns", "requests", "help");

        assert!(matches!(
            Handle::build(Kind::CounterVec, &desc),
            Err(Error::EmptySchema { .. }),
        ));
    }

    #[test]
    fn empty_help_falls_back_to_name() {
        let desc = Descriptor::new("ns", "requests", "");

        assert!(Handle::build(Kind::Counter, &desc).is_ok());
    }

    proptest! {
        #[test]
        fn tuple_binding_ignores_label_order(
            pair in prop::collection::hash_set("[a-z]{1,8}", 1..6)
                .prop_map(|set| set.into_iter().collect::<Vec<_>>())
                .prop_flat_map(|names| {
                    (Just(names.clone()), Just(names).prop_shuffle())
                }),
        ) {
            let (names, shuffled) = pair;
            let schema = names.iter().cloned().collect::<Schema>();
            let tuple = shuffled
                .iter()
                .map(|n| (n.clone(), format!("v_{n}")))
                .collect::<LabelTuple>();

            let values = schema.bind_tuple("m", &tuple).unwrap();

            let expected =
                names.iter().map(|n| format!("v_{n}")).collect::<Vec<_>>();
            prop_assert_eq!(values.to_vec(), expected);
        }

        #[test]
        fn positional_binding_requires_exact_arity(
            len in 1usize..6,
            given in 0usize..8,
        ) {
            let schema = (0..len).map(|i| format!("l{i}")).collect::<Schema>();
            let values = (0..given).map(|i| i.to_string()).collect::<Vec<_>>();

            prop_assert_eq!(
                schema.bind_values("m", &values).is_ok(),
                len == given,
            );
        }
    }
}
