#![warn(clippy::all, missing_docs)]

//! Client-side cache for remote REST collections.
//!
//! A [`CrudCoordinator`] issues create/read/update/patch/delete calls through
//! a [`Transport`], folds each successful response into a sorted
//! [`CacheStore`] and publishes the new snapshot through a replay-latest
//! [`Broadcast`] to every subscriber.

pub mod broadcast;
pub mod config;
pub mod coordinator;
pub mod entity;
pub mod error;
pub mod sort;
pub mod store;
pub mod transport;
pub mod url;

pub use broadcast::{Broadcast, Snapshot, SubscriptionId};
pub use config::AppConfig;
pub use coordinator::CrudCoordinator;
pub use entity::Entity;
pub use error::{CrudError, CrudResult, TransportError};
pub use sort::{SortDescriptor, SortOrder};
pub use store::CacheStore;
pub use transport::{CredentialProvider, HttpTransport, StaticToken, Transport};
pub use url::{HierarchicalUrl, PathParams, UrlResolver};
