//! Single-writer threads applying mutations to [`prometheus`] objects.

use std::{
    sync::Mutex,
    thread::{self, JoinHandle},
};

use crossbeam::channel::{self, Receiver, Sender};
use smallvec::SmallVec;

use crate::{
    metric::{Handle, Values},
    Error,
};

/// Mutation requested from a [`Mutator`].
#[derive(Debug)]
pub(crate) enum Request {
    /// Adds `1` to a [`Handle::Counter`].
    Increment,

    /// Replaces the value of a [`Handle::Gauge`].
    Set(f64),

    /// Adds `1` to the series of a [`Handle::CounterVec`], creating the
    /// series on first use.
    IncrementLabeled(Values),

    /// Replaces the value of the series of a [`Handle::GaugeVec`].
    SetLabeled(f64, Values),

    /// Clears all the series of a [`Handle::GaugeVec`] and then sets the
    /// value of the provided one.
    ResetThenSet(f64, Values),

    /// Acknowledges that all the previously accepted [`Request`]s have been
    /// applied.
    Flush(Sender<()>),

    /// Stops the [`Mutator`].
    Shutdown,
}

/// Sole writer of a [`Handle`], applying [`Request`]s to it in the order
/// they're accepted.
///
/// Its sink has zero capacity, so a [`Mutator::submit()`] returns only once
/// the dedicated thread has taken the [`Request`] over, and, thus, has
/// applied all the ones accepted before it.
#[derive(Debug)]
pub(crate) struct Mutator {
    /// Name of the metric this [`Mutator`] is dedicated to.
    name: String,

    /// Rendezvous sink of [`Request`]s.
    sink: Sender<Request>,

    /// Thread applying the [`Request`]s, taken on shutdown.
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Mutator {
    /// Spawns a new [`Mutator`] thread taking exclusive ownership of the
    /// provided [`Handle`].
    ///
    /// # Errors
    ///
    /// With [`Error::Spawn`] if the OS refuses to spawn a thread.
    pub(crate) fn spawn(name: &str, handle: Handle) -> Result<Self, Error> {
        let (sink, requests) = channel::bounded(0);
        let worker = thread::Builder::new()
            .name(format!("promexporter:{name}"))
            .spawn({
                let name = name.to_owned();
                move || run(&name, &handle, &requests)
            })
            .map_err(|source| Error::Spawn { name: name.into(), source })?;

        Ok(Self {
            name: name.into(),
            sink,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Hands the provided [`Request`] over to this [`Mutator`], blocking
    /// until it's accepted.
    ///
    /// # Errors
    ///
    /// With [`Error::Closed`] if this [`Mutator`] has been shut down.
    pub(crate) fn submit(&self, req: Request) -> Result<(), Error> {
        self.sink
            .send(req)
            .map_err(|_| Error::Closed { name: self.name.clone() })
    }

    /// Blocks until all the [`Request`]s accepted by this [`Mutator`] so far
    /// are applied.
    ///
    /// # Errors
    ///
    /// With [`Error::Closed`] if this [`Mutator`] has been shut down.
    pub(crate) fn flush(&self) -> Result<(), Error> {
        let (ack, done) = channel::bounded(1);
        self.submit(Request::Flush(ack))?;
        done.recv().map_err(|_| Error::Closed { name: self.name.clone() })
    }

    /// Stops this [`Mutator`] once all the [`Request`]s accepted before are
    /// applied, and waits for its thread to finish.
    ///
    /// Idempotent.
    pub(crate) fn shutdown(&self) {
        // PANIC: `Mutex` usage is fully panic-safe here.
        #![allow(clippy::missing_panics_doc, clippy::unwrap_used)]

        // Fails only if the thread is gone already, which is what we want.
        _ = self.sink.send(Request::Shutdown);

        let worker = self.worker.lock().unwrap().take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                tracing::error!(metric = %self.name, "mutator thread panicked");
            }
        }
    }
}

/// Applies the received [`Request`]s to the provided [`Handle`] until a
/// [`Request::Shutdown`] is received or all the senders are dropped.
fn run(name: &str, handle: &Handle, requests: &Receiver<Request>) {
    tracing::debug!(metric = %name, "mutator started");

    for req in requests {
        match req {
            Request::Shutdown => break,
            Request::Flush(ack) => {
                // Nobody may wait for the acknowledgement anymore.
                _ = ack.send(());
            }
            req => apply(name, handle, req),
        }
    }

    tracing::debug!(metric = %name, "mutator stopped");
}

/// Applies the provided [`Request`] to the provided [`Handle`].
fn apply(name: &str, handle: &Handle, req: Request) {
    match (handle, req) {
        (Handle::Counter(c), Request::Increment) => c.inc(),
        (Handle::Gauge(g), Request::Set(v)) => g.set(v),
        (Handle::CounterVec(v), Request::IncrementLabeled(values)) => {
            match v.get_metric_with_label_values(&as_strs(&values)) {
                Ok(c) => c.inc(),
                Err(e) => log_unresolved(name, &values, &e),
            }
        }
        (Handle::GaugeVec(v), Request::SetLabeled(val, values)) => {
            match v.get_metric_with_label_values(&as_strs(&values)) {
                Ok(g) => g.set(val),
                Err(e) => log_unresolved(name, &values, &e),
            }
        }
        (Handle::GaugeVec(v), Request::ResetThenSet(val, values)) => {
            v.reset();
            match v.get_metric_with_label_values(&as_strs(&values)) {
                Ok(g) => g.set(val),
                Err(e) => log_unresolved(name, &values, &e),
            }
        }
        (_, req) => {
            // `MetricRef` exposes only requests matching its `Kind`.
            tracing::error!(
                metric = %name,
                request = ?req,
                "request doesn't match the metric kind",
            );
        }
    }
}

fn as_strs(values: &Values) -> SmallVec<[&str; 10]> {
    values.iter().map(String::as_str).collect()
}

fn log_unresolved(name: &str, values: &Values, err: &prometheus::Error) {
    tracing::error!(
        metric = %name,
        values = ?values,
        error = %err,
        "failed to resolve series",
    );
}

#[cfg(test)]
mod tests {
    use smallvec::smallvec;

    use super::*;
    use crate::metric::{Descriptor, Kind};

    fn handle(kind: Kind, labels: &[&str]) -> Handle {
        let desc = Descriptor::new("test", "metric", "help")
            .with_labels(labels.iter().copied());
        Handle::build(kind, &desc).unwrap()
    }

    #[test]
    fn applies_requests_in_submission_order() {
        let h = handle(Kind::Gauge, &[]);
        let Handle::Gauge(gauge) = h.clone() else { unreachable!() };
        let mutator = Mutator::spawn("metric", h).unwrap();

        for v in 1..=100 {
            mutator.submit(Request::Set(f64::from(v))).unwrap();
        }
        mutator.flush().unwrap();

        assert_eq!(gauge.get(), 100.0);
    }

    #[test]
    fn drains_accepted_requests_on_shutdown() {
        let h = handle(Kind::Counter, &[]);
        let Handle::Counter(counter) = h.clone() else { unreachable!() };
        let mutator = Mutator::spawn("metric", h).unwrap();

        for _ in 0..50 {
            mutator.submit(Request::Increment).unwrap();
        }
        mutator.shutdown();

        assert_eq!(counter.get(), 50);
    }

    #[test]
    fn refuses_requests_after_shutdown() {
        let mutator =
            Mutator::spawn("metric", handle(Kind::Counter, &[])).unwrap();

        mutator.shutdown();
        mutator.shutdown();

        assert!(matches!(
            mutator.submit(Request::Increment),
            Err(Error::Closed { .. }),
        ));
        assert!(matches!(mutator.flush(), Err(Error::Closed { .. })));
    }

    #[test]
    fn reset_then_set_leaves_single_series() {
        let h = handle(Kind::GaugeVec, &["method", "type"]);
        let Handle::GaugeVec(vec) = h.clone() else { unreachable!() };
        let mutator = Mutator::spawn("metric", h).unwrap();

        mutator
            .submit(Request::SetLabeled(5.0, smallvec!["a".into(), "x".into()]))
            .unwrap();
        mutator
            .submit(Request::SetLabeled(7.0, smallvec!["b".into(), "y".into()]))
            .unwrap();
        mutator
            .submit(Request::ResetThenSet(
                9.0,
                smallvec!["c".into(), "z".into()],
            ))
            .unwrap();
        mutator.flush().unwrap();

        let families = prometheus::core::Collector::collect(&vec);
        assert_eq!(families[0].get_metric().len(), 1);
        assert_eq!(vec.with_label_values(&["c", "z"]).get(), 9.0);
    }

    #[test]
    fn ignores_requests_of_foreign_kind() {
        let h = handle(Kind::Counter, &[]);
        let Handle::Counter(counter) = h.clone() else { unreachable!() };
        let mutator = Mutator::spawn("metric", h).unwrap();

        mutator.submit(Request::Set(3.0)).unwrap();
        mutator.submit(Request::Increment).unwrap();
        mutator.flush().unwrap();

        assert_eq!(counter.get(), 1);
    }
}
