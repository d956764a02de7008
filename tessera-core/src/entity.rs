//! Entity kinds and native datastore keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a stored record type (the datastore's "kind").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKind(String);

impl EntityKind {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EntityKind {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityKind {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for EntityKind {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Identifier part of a key path element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyId {
    /// Numeric id allocated by the datastore.
    Id(i64),
    /// Caller-chosen string name.
    Name(String),
}

impl From<i64> for KeyId {
    fn from(id: i64) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for KeyId {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for KeyId {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

/// One `(kind, id)` step in an ancestor path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathElement {
    pub kind: EntityKind,
    /// `None` for an incomplete key that has not been allocated yet.
    pub id: Option<KeyId>,
}

/// Native key identity of a stored entity.
///
/// Keys are a namespace plus an ancestor path; the last path element names
/// the entity itself. The cache layer treats them as opaque identities that
/// travel next to cached payloads (see `Keyed`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatastoreKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub path: Vec<PathElement>,
}

impl DatastoreKey {
    /// Create a root key for `kind` with the given id or name.
    pub fn new(kind: impl Into<EntityKind>, id: impl Into<KeyId>) -> Self {
        Self {
            namespace: None,
            path: vec![PathElement {
                kind: kind.into(),
                id: Some(id.into()),
            }],
        }
    }

    /// Create an incomplete root key (no id allocated yet).
    pub fn incomplete(kind: impl Into<EntityKind>) -> Self {
        Self {
            namespace: None,
            path: vec![PathElement {
                kind: kind.into(),
                id: None,
            }],
        }
    }

    /// Create a child key below `self`.
    pub fn child(&self, kind: impl Into<EntityKind>, id: impl Into<KeyId>) -> Self {
        let mut path = self.path.clone();
        path.push(PathElement {
            kind: kind.into(),
            id: Some(id.into()),
        });
        Self {
            namespace: self.namespace.clone(),
            path,
        }
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Kind of the entity this key points to.
    pub fn kind(&self) -> Option<&EntityKind> {
        self.path.last().map(|element| &element.kind)
    }

    /// Id or name of the entity this key points to.
    pub fn id(&self) -> Option<&KeyId> {
        self.path.last().and_then(|element| element.id.as_ref())
    }

    /// Parent key, if this key has ancestors.
    pub fn parent(&self) -> Option<DatastoreKey> {
        if self.path.len() < 2 {
            return None;
        }
        Some(Self {
            namespace: self.namespace.clone(),
            path: self.path[..self.path.len() - 1].to_vec(),
        })
    }

    /// True when every path element carries an id or name.
    pub fn is_complete(&self) -> bool {
        !self.path.is_empty() && self.path.iter().all(|element| element.id.is_some())
    }
}
