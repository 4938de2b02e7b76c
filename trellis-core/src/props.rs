//! Prop Bridge
//!
//! Props are inputs written by whoever owns the host: attribute reflection,
//! a parent component, a test. They live in one container per instance
//! instead of one cell per prop, so a writer can set many props with a single
//! notification.
//!
//! Until the instance is instrumented the container is a plain map. At
//! instrumentation it is replaced by an observable one that keeps the values
//! already written. From then on reads are tracked and writes run inside a
//! transaction.

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::reactive::{transaction, Atom};
use crate::value::Value;

enum PropStorage {
    Plain(IndexMap<String, Value>),
    Observable {
        atom: Atom,
        values: IndexMap<String, Value>,
    },
}

pub(crate) struct PropBridge {
    storage: RwLock<PropStorage>,
}

impl PropBridge {
    pub(crate) fn new() -> Self {
        Self {
            storage: RwLock::new(PropStorage::Plain(IndexMap::new())),
        }
    }

    /// Swap the plain container for its observable form. Idempotent.
    pub(crate) fn materialize(&self) {
        let mut storage = self.storage.write();
        if let PropStorage::Plain(values) = &mut *storage {
            let values = std::mem::take(values);
            tracing::debug!(props = values.len(), "materialized prop storage");
            *storage = PropStorage::Observable {
                atom: Atom::new(),
                values,
            };
        }
    }

    pub(crate) fn is_observable(&self) -> bool {
        matches!(*self.storage.read(), PropStorage::Observable { .. })
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        match &*self.storage.read() {
            PropStorage::Plain(values) | PropStorage::Observable { values, .. } => {
                values.contains_key(name)
            }
        }
    }

    /// Read a prop. Unset props read as [`Value::Undefined`].
    pub(crate) fn get(&self, name: &str) -> Value {
        let (atom, value) = match &*self.storage.read() {
            PropStorage::Plain(values) => (None, values.get(name).cloned()),
            PropStorage::Observable { atom, values } => {
                (Some(atom.clone()), values.get(name).cloned())
            }
        };
        if let Some(atom) = atom {
            atom.report_observed();
        }
        value.unwrap_or_default()
    }

    /// Snapshot of every prop written so far.
    pub(crate) fn entries(&self) -> IndexMap<String, Value> {
        let (atom, values) = match &*self.storage.read() {
            PropStorage::Plain(values) => (None, values.clone()),
            PropStorage::Observable { atom, values } => (Some(atom.clone()), values.clone()),
        };
        if let Some(atom) = atom {
            atom.report_observed();
        }
        values
    }

    pub(crate) fn set(&self, name: &str, value: Value) {
        self.set_many(std::iter::once((name.to_owned(), value)));
    }

    /// Write several props with at most one notification.
    pub(crate) fn set_many<I>(&self, props: I)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let props: Vec<(String, Value)> = props.into_iter().collect();
        transaction(|| {
            let changed = {
                let mut storage = self.storage.write();
                match &mut *storage {
                    PropStorage::Plain(values) => {
                        values.extend(props);
                        None
                    }
                    PropStorage::Observable { atom, values } => {
                        let mut changed = false;
                        for (name, value) in props {
                            let previous = values.insert(name, value.clone());
                            changed |= !previous.is_some_and(|p| Value::same_reference(&p, &value));
                        }
                        changed.then(|| atom.clone())
                    }
                }
            };
            if let Some(atom) = changed {
                atom.report_changed();
            }
        });
    }

    /// Mutate one prop. Always counts as a change. `f` runs on a copy with
    /// no lock held.
    pub(crate) fn update<F>(&self, name: &str, f: F)
    where
        F: FnOnce(&mut Value),
    {
        let mut value = match &*self.storage.read() {
            PropStorage::Plain(values) | PropStorage::Observable { values, .. } => {
                values.get(name).cloned().unwrap_or_default()
            }
        };
        f(&mut value);

        transaction(|| {
            let atom = {
                let mut storage = self.storage.write();
                let (atom, values) = match &mut *storage {
                    PropStorage::Plain(values) => (None, values),
                    PropStorage::Observable { atom, values } => (Some(atom.clone()), values),
                };
                values.insert(name.to_owned(), value);
                atom
            };
            if let Some(atom) = atom {
                atom.report_changed();
            }
        });
    }

    pub(crate) fn observer_count(&self) -> usize {
        match &*self.storage.read() {
            PropStorage::Plain(_) => 0,
            PropStorage::Observable { atom, .. } => atom.observer_count(),
        }
    }
}
