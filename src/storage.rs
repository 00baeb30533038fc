//! Name-indexed storage of [`Cell`]s, creating them lazily.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, RwLock,
    },
};

use crate::{
    cell::Cell,
    metric::{Descriptor, Handle, Kind},
    mutator::Mutator,
    Error,
};

/// Storage of [`Cell`]s backed by a [`prometheus::Registry`], registering
/// each newly created metric in it exactly once.
#[derive(Debug)]
pub(crate) struct Storage {
    /// [`prometheus::Registry`] every created metric is registered in.
    pub(crate) prometheus: prometheus::Registry,

    /// [`Cell`]s indexed by their metric names.
    cells: RwLock<HashMap<String, Arc<Cell>>>,

    /// Indicator whether this [`Storage`] has been shut down and doesn't
    /// create new [`Cell`]s anymore.
    closed: AtomicBool,
}

impl Storage {
    /// Creates a new empty [`Storage`] on top of the provided
    /// [`prometheus::Registry`].
    pub(crate) fn new(prometheus: prometheus::Registry) -> Self {
        Self {
            prometheus,
            cells: RwLock::default(),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns the [`Cell`] of the metric named as the provided
    /// [`Descriptor`], creating it if there is none yet.
    ///
    /// Creation happens in a single critical section, so concurrent callers
    /// racing on the same new name end up with the very same [`Cell`], and
    /// the [`prometheus::Registry`] sees a single registration.
    ///
    /// An already existing [`Cell`] is returned as is, even if it has been
    /// created with another [`Descriptor`].
    ///
    /// # Errors
    ///
    /// - [`Error::KindMismatch`] if the existing [`Cell`] is of another
    ///   [`Kind`].
    /// - [`Error::Closed`] if this [`Storage`] has been shut down.
    /// - [`Error::SchemaMismatch`], [`Error::EmptySchema`] or
    ///   [`Error::Prometheus`] if the [`Descriptor`] is invalid for the
    ///   [`Kind`].
    /// - [`Error::Spawn`] if the mutator thread cannot be started.
    /// - [`Error::DuplicateRegistration`] if the [`prometheus::Registry`]
    ///   already has a collector of the same identity registered behind the
    ///   back of this [`Storage`].
    pub(crate) fn resolve_or_create(
        &self,
        desc: &Descriptor,
        kind: Kind,
    ) -> Result<Arc<Cell>, Error> {
        // PANIC: `RwLock` usage is panic-safe here (considering the
        //        `prometheus::Registry::register()` does not).
        #![allow(
            clippy::missing_panics_doc,
            clippy::unwrap_in_result,
            clippy::unwrap_used
        )]

        if let Some(cell) = self.get(desc.name()) {
            return check_kind(cell, kind);
        }

        let mut cells = self.cells.write().unwrap();
        if let Some(cell) = cells.get(desc.name()) {
            return check_kind(Arc::clone(cell), kind);
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed { name: desc.name().into() });
        }

        let handle = Handle::build(kind, desc)?;
        let collector = handle.clone();
        let mutator = Mutator::spawn(desc.name(), handle)?;
        // We register in `prometheus::Registry` after the `Mutator` is
        // spawned, so a failed registration leaves nothing behind: dropping
        // the `Mutator` disconnects and stops its thread.
        self.prometheus.register(Box::new(collector)).map_err(|e| match e {
            prometheus::Error::AlreadyReg => {
                Error::DuplicateRegistration { name: desc.fq_name() }
            }
            e => e.into(),
        })?;

        tracing::debug!(
            metric = %desc.fq_name(),
            kind = %kind,
            labels = ?desc.schema(),
            "metric created",
        );

        let cell = Arc::new(Cell::new(desc.clone(), kind, mutator));
        drop(cells.insert(desc.name().into(), Arc::clone(&cell)));
        Ok(cell)
    }

    /// Returns the [`Cell`] of the metric with the provided `name`, if any.
    pub(crate) fn get(&self, name: &str) -> Option<Arc<Cell>> {
        // PANIC: `RwLock` usage is fully panic-safe here.
        #![allow(clippy::missing_panics_doc, clippy::unwrap_used)]

        self.cells.read().unwrap().get(name).cloned()
    }

    /// Returns the number of [`Cell`]s in this [`Storage`].
    pub(crate) fn len(&self) -> usize {
        // PANIC: `RwLock` usage is fully panic-safe here.
        #![allow(clippy::missing_panics_doc, clippy::unwrap_used)]

        self.cells.read().unwrap().len()
    }

    /// Indicates whether this [`Storage`] has no [`Cell`]s.
    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Blocks until all the mutations accepted so far by every [`Cell`] are
    /// applied.
    ///
    /// # Errors
    ///
    /// With [`Error::Closed`] if an existing [`Cell`] has been shut down.
    /// Having no [`Cell`]s, there is nothing to wait for, so a shut down
    /// empty [`Storage`] flushes successfully.
    pub(crate) fn flush(&self) -> Result<(), Error> {
        self.snapshot().iter().try_for_each(|cell| cell.flush())
    }

    /// Stops creating new [`Cell`]s and shuts down every existing one, after
    /// all the mutations accepted by it are applied.
    ///
    /// Idempotent.
    pub(crate) fn shutdown(&self) {
        // PANIC: `RwLock` usage is fully panic-safe here.
        #![allow(clippy::missing_panics_doc, clippy::unwrap_used)]

        let cells = {
            // Holding the write lock guarantees no `Cell` is being created
            // while we snapshot them.
            let cells = self.cells.write().unwrap();
            self.closed.store(true, Ordering::Release);
            cells.values().cloned().collect::<Vec<_>>()
        };
        for cell in &cells {
            cell.shutdown();
        }

        tracing::debug!(metrics = cells.len(), "storage shut down");
    }

    fn snapshot(&self) -> Vec<Arc<Cell>> {
        // PANIC: `RwLock` usage is fully panic-safe here.
        #![allow(clippy::missing_panics_doc, clippy::unwrap_used)]

        self.cells.read().unwrap().values().cloned().collect()
    }
}

fn check_kind(cell: Arc<Cell>, kind: Kind) -> Result<Arc<Cell>, Error> {
    if cell.kind() != kind {
        return Err(Error::KindMismatch {
            name: cell.descriptor().name().into(),
            registered: cell.kind(),
            requested: kind,
        });
    }
    Ok(cell)
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn storage() -> Storage {
        Storage::new(prometheus::Registry::new())
    }

    #[test]
    fn creates_cell_once() {
        let storage = storage();
        let desc = Descriptor::new("ns", "hits", "Hits.");

        let first = storage.resolve_or_create(&desc, Kind::Counter).unwrap();
        let second = storage.resolve_or_create(&desc, Kind::Counter).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(storage.len(), 1);
        assert_eq!(storage.prometheus.gather().len(), 1);
    }

    #[test]
    fn creates_cell_once_under_race() {
        let storage = storage();
        let desc = Descriptor::new("ns", "raced", "Raced.");

        let cells = thread::scope(|s| {
            let handles = (0..64)
                .map(|_| {
                    s.spawn(|| {
                        storage.resolve_or_create(&desc, Kind::Gauge).unwrap()
                    })
                })
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .collect::<Vec<_>>()
        });

        assert!(cells.iter().all(|c| Arc::ptr_eq(c, &cells[0])));
        assert_eq!(storage.len(), 1);
        assert_eq!(storage.prometheus.gather().len(), 1);
    }

    #[test]
    fn keeps_existing_cell_for_other_namespace() {
        let storage = storage();

        let first = storage
            .resolve_or_create(&Descriptor::new("a", "up", "Up."), Kind::Gauge)
            .unwrap();
        let second = storage
            .resolve_or_create(&Descriptor::new("b", "up", "Up."), Kind::Gauge)
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.descriptor().namespace(), "a");
    }

    #[test]
    fn refuses_other_kind() {
        let storage = storage();
        let desc = Descriptor::new("ns", "up", "Up.");
        _ = storage.resolve_or_create(&desc, Kind::Counter).unwrap();

        let res = storage.resolve_or_create(&desc, Kind::Gauge);

        assert!(matches!(
            res,
            Err(Error::KindMismatch {
                registered: Kind::Counter,
                requested: Kind::Gauge,
                ..
            }),
        ));
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn detects_registration_behind_its_back() {
        let storage = storage();
        storage
            .prometheus
            .register(Box::new(
                prometheus::IntCounter::new("ns_external", "help").unwrap(),
            ))
            .unwrap();

        let res = storage.resolve_or_create(
            &Descriptor::new("ns", "external", "help"),
            Kind::Counter,
        );

        assert!(matches!(
            res,
            Err(Error::DuplicateRegistration { ref name })
                if name == "ns_external",
        ));
        assert_eq!(storage.len(), 0);
    }

    #[test]
    fn refuses_invalid_names() {
        let storage = storage();

        let res = storage.resolve_or_create(
            &Descriptor::new("ns", "invalid.name", "help"),
            Kind::Counter,
        );

        assert!(matches!(res, Err(Error::Prometheus(_))));
        assert!(storage.is_empty());
    }

    #[test]
    fn refuses_creation_after_shutdown() {
        let storage = storage();
        let existing = storage
            .resolve_or_create(
                &Descriptor::new("ns", "old", "Old."),
                Kind::Counter,
            )
            .unwrap();

        storage.shutdown();

        assert!(matches!(
            storage.resolve_or_create(
                &Descriptor::new("ns", "new", "New."),
                Kind::Counter,
            ),
            Err(Error::Closed { .. }),
        ));
        assert!(matches!(storage.flush(), Err(Error::Closed { .. })));
        assert!(matches!(
            existing.submit(crate::mutator::Request::Increment),
            Err(Error::Closed { .. }),
        ));
    }

    #[test]
    fn flushes_empty_storage_after_shutdown() {
        let storage = storage();

        storage.shutdown();

        assert!(storage.flush().is_ok());
        assert!(matches!(
            storage.resolve_or_create(
                &Descriptor::new("ns", "late", "Late."),
                Kind::Gauge,
            ),
            Err(Error::Closed { .. }),
        ));
    }
}
