//! Lazily created [`prometheus`] metrics, each mutated by its own dedicated
//! single-writer thread.
//!
//! Producers refer metrics by their names only, never caring whether a metric
//! exists already: the first use creates and registers it in a
//! [`prometheus::Registry`], while concurrent first uses end up with the very
//! same metric.

pub mod exposition;
pub mod failure;
pub mod metric;
pub mod recorder;

mod cell;
mod error;
mod mutator;
mod storage;

use std::borrow::Cow;

use sealed::sealed;

#[doc(inline)]
pub use self::{
    cell::MetricRef, error::Error, metric::LabelTuple, recorder::Recorder,
};

/// Installs the default [`Recorder`] as the [`recorder::global()`] one.
///
/// # Errors
///
/// With [`Error::AlreadyInstalled`] if the [`recorder::global()`]
/// [`Recorder`] has been installed (or used) already.
pub fn install() -> Result<Recorder, Error> {
    Recorder::builder().try_build_and_install()
}

/// Increments the counter with the provided `name` of the
/// [`recorder::global()`] [`Recorder`].
///
/// # Errors
///
/// See [`Recorder::increment_counter()`].
pub fn increment_counter(
    namespace: &str,
    name: &str,
    help: &str,
) -> Result<(), Error> {
    recorder::global().increment_counter(namespace, name, help)
}

/// Increments the series of the counter vector with the provided `name` of
/// the [`recorder::global()`] [`Recorder`].
///
/// # Errors
///
/// See [`Recorder::increment_counter_vec()`].
pub fn increment_counter_vec(
    namespace: &str,
    name: &str,
    help: &str,
    tuple: &LabelTuple,
) -> Result<(), Error> {
    recorder::global().increment_counter_vec(namespace, name, help, tuple)
}

/// Sets the gauge with the provided `name` of the [`recorder::global()`]
/// [`Recorder`].
///
/// # Errors
///
/// See [`Recorder::set_gauge()`].
pub fn set_gauge(
    namespace: &str,
    name: &str,
    help: &str,
    value: f64,
) -> Result<(), Error> {
    recorder::global().set_gauge(namespace, name, help, value)
}

/// Sets the series of the single-label gauge vector with the provided `name`
/// of the [`recorder::global()`] [`Recorder`].
///
/// # Errors
///
/// See [`Recorder::set_gauge_vec()`].
pub fn set_gauge_vec(
    namespace: &str,
    name: &str,
    help: &str,
    label_name: &str,
    label_value: &str,
    value: f64,
) -> Result<(), Error> {
    recorder::global()
        .set_gauge_vec(namespace, name, help, label_name, label_value, value)
}

/// Replaces all the series of the gauge vector with the provided `name` of
/// the [`recorder::global()`] [`Recorder`] with the single one.
///
/// # Errors
///
/// See [`Recorder::replace_gauge_vec()`].
pub fn replace_gauge_vec(
    namespace: &str,
    name: &str,
    help: &str,
    tuple: &LabelTuple,
    value: f64,
) -> Result<(), Error> {
    recorder::global().replace_gauge_vec(namespace, name, help, tuple, value)
}

/// Blocks until all the mutations accepted so far by the
/// [`recorder::global()`] [`Recorder`] are applied.
///
/// # Errors
///
/// See [`Recorder::flush()`].
pub fn flush() -> Result<(), Error> {
    recorder::global().flush()
}

/// Shuts down the [`recorder::global()`] [`Recorder`].
///
/// See [`Recorder::shutdown()`].
pub fn shutdown() {
    recorder::global().shutdown();
}

/// Encodes the metrics of the [`recorder::global()`] [`Recorder`] in the text
/// exposition format.
///
/// # Errors
///
/// See [`Recorder::render()`].
pub fn render() -> Result<String, Error> {
    recorder::global().render()
}

/// Conversion into a [`Cow`].
#[sealed]
pub trait IntoCow<'a, T: ToOwned + ?Sized + 'a> {
    /// Performs the conversion.
    fn into_cow(self) -> Cow<'a, T>;
}

#[sealed]
impl IntoCow<'static, prometheus::Registry> for prometheus::Registry {
    fn into_cow(self) -> Cow<'static, prometheus::Registry> {
        Cow::Owned(self)
    }
}

#[sealed]
impl<'a> IntoCow<'a, prometheus::Registry> for &'a prometheus::Registry {
    fn into_cow(self) -> Cow<'a, prometheus::Registry> {
        Cow::Borrowed(self)
    }
}

#[cfg(test)]
mod tests {
    use super::{metric::Counter, *};

    #[test]
    fn uses_global_recorder() {
        increment_counter("promexporter_test", "global_hits", "Hits.").unwrap();
        increment_counter("promexporter_test", "global_hits", "Hits.").unwrap();
        flush().unwrap();

        let hits = recorder::global()
            .get::<Counter>("global_hits")
            .unwrap()
            .expect("metric should be created");
        assert_eq!(hits.descriptor().namespace(), "promexporter_test");
        assert!(render()
            .unwrap()
            .contains("promexporter_test_global_hits 2"));
        assert!(matches!(install(), Err(Error::AlreadyInstalled)));
    }
}
