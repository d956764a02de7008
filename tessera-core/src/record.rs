//! Records carrying their native key identity.

use std::ops::Deref;

use crate::entity::DatastoreKey;

/// A value paired with the key it was loaded from.
///
/// The key is a companion, not part of the value: equality only compares
/// values, and `Deref` exposes the value directly. Stores never see this
/// type; the storage layer marshals it into a plain record with the key as
/// a sidecar field and rebuilds it on the way out.
#[derive(Debug, Clone)]
pub struct Keyed<T> {
    value: T,
    key: DatastoreKey,
}

impl<T> Keyed<T> {
    pub fn new(value: T, key: DatastoreKey) -> Self {
        Self { value, key }
    }

    /// Originating key of this record.
    pub fn key(&self) -> &DatastoreKey {
        &self.key
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn into_parts(self) -> (T, DatastoreKey) {
        (self.value, self.key)
    }

    /// Map the inner value, keeping the key.
    pub fn map<U, F>(self, f: F) -> Keyed<U>
    where
        F: FnOnce(T) -> U,
    {
        Keyed {
            value: f(self.value),
            key: self.key,
        }
    }
}

impl<T: PartialEq> PartialEq for Keyed<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T: Eq> Eq for Keyed<T> {}

impl<T> Deref for Keyed<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> AsRef<T> for Keyed<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

/// Outcome of loading a single key from the datastore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyLookup<T> {
    Found(T),
    NotFound,
}

impl<T> KeyLookup<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            Self::NotFound => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

impl<T> From<Option<T>> for KeyLookup<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Self::Found(value),
            None => Self::NotFound,
        }
    }
}
