//! Backing-store handles.
//!
//! keel does not know how to talk to a database. It only needs to know that
//! one is there and whether it answers. Whoever owns the real client wraps it
//! in a [`BackingStore`], hands an `Arc` to [`Stores`], and stays responsible
//! for closing it.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;

use crate::error::Error;

/// Which persistence collaborator a handle stands for.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum StoreKind {
    Relational,
    Document,
    Cache,
}

impl StoreKind {
    pub const ALL: [StoreKind; 3] = [Self::Relational, Self::Document, Self::Cache];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Relational => "relational",
            Self::Document   => "document",
            Self::Cache      => "cache",
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed liveness check.
#[derive(Debug, thiserror::Error)]
#[error("{store}: {message}")]
pub struct StoreError {
    pub store: String,
    pub message: String,
}

impl StoreError {
    pub fn new(store: impl Into<String>, message: impl Into<String>) -> Self {
        Self { store: store.into(), message: message.into() }
    }
}

/// An opaque connection to a persistence collaborator.
///
/// Implementations must be safe to share across concurrent requests.
#[async_trait]
pub trait BackingStore: Send + Sync + 'static {
    /// Short name used in logs and readiness output.
    fn name(&self) -> &str;

    /// Connectivity check.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// The set of store handles a service is built with.
///
/// Holds shared references only; dropping a `Stores` never closes anything.
#[derive(Clone, Default)]
pub struct Stores {
    relational: Option<Arc<dyn BackingStore>>,
    document: Option<Arc<dyn BackingStore>>,
    cache: Option<Arc<dyn BackingStore>>,
}

impl Stores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn relational(mut self, store: Arc<dyn BackingStore>) -> Self {
        self.relational = Some(store);
        self
    }

    pub fn document(mut self, store: Arc<dyn BackingStore>) -> Self {
        self.document = Some(store);
        self
    }

    pub fn cache(mut self, store: Arc<dyn BackingStore>) -> Self {
        self.cache = Some(store);
        self
    }

    pub fn get(&self, kind: StoreKind) -> Option<&Arc<dyn BackingStore>> {
        match kind {
            StoreKind::Relational => self.relational.as_ref(),
            StoreKind::Document   => self.document.as_ref(),
            StoreKind::Cache      => self.cache.as_ref(),
        }
    }

    /// Every present handle, in [`StoreKind::ALL`] order.
    pub fn iter(&self) -> impl Iterator<Item = (StoreKind, &Arc<dyn BackingStore>)> {
        StoreKind::ALL
            .into_iter()
            .filter_map(|kind| self.get(kind).map(|store| (kind, store)))
    }

    /// Fails on the first missing handle.
    pub(crate) fn validate(&self) -> Result<(), Error> {
        match StoreKind::ALL.into_iter().find(|kind| self.get(*kind).is_none()) {
            Some(kind) => Err(Error::MissingStore(kind)),
            None => Ok(()),
        }
    }

    /// Pings every present store concurrently.
    pub async fn ping_all(&self) -> Vec<(StoreKind, Result<(), StoreError>)> {
        let checks = self.iter().map(|(kind, store)| async move { (kind, store.ping().await) });
        join_all(checks).await
    }
}

impl fmt::Debug for Stores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.iter().map(|(kind, store)| (kind.as_str(), store.name())))
            .finish()
    }
}
