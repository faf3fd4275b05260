//! # Scoped Loader
//!
//! Request-scoped **batching** and **memoization** of point lookups, the usual
//! cure for the N+1 query problem.
//!
//! ## Overview
//!
//! Code that resolves relations one record at a time ("load the author of
//! this post") tends to issue one query per record. A [`Loader`] collects
//! those single-key requests while they are issued concurrently, hands the
//! deduplicated keys to a [`BatchFn`] in one call, and delivers each caller
//! its own outcome. Every key is fetched at most once for as long as the
//! loader lives; later requests are answered from its memoization table.
//!
//! Key components include:
//!
//! - The [`BatchFn`] contract between loaders and the backing store
//! - [`Loader`], which deduplicates, batches, dispatches and memoizes
//! - [`LoaderRegistry`], the loaders of one unit of work
//! - [`RequestScope`], the unit of work itself, with its cancellation
//!
//! ## Architecture
//!
//! ### Scopes
//!
//! Memoized entries must never outlive the unit of work that produced them:
//! cached data from one request is stale, or outright foreign, in the next.
//! A fresh [`RequestScope`] and [`LoaderRegistry`] are therefore built for
//! every unit of work and passed explicitly to the code that needs them.
//! Dropping the scope drops its loaders and all their state.
//!
//! ### Outcomes
//!
//! A key resolves to an [`Outcome`]: a value, an absence (`Ok(None)`, the
//! entity does not exist), or a [`LoadError`]. Errors are per key: a failure
//! the batch function reports for one key never touches its siblings, while
//! a failure of the whole call is copied to every key of that call. Failed
//! keys are memoized like any other outcome and are not retried.
//!
//! ### Dispatch
//!
//! Each loader runs a small background task on the Tokio runtime. It waits
//! for the first queued key, keeps the dispatch window open for
//! [`LoaderConfig::delay`] so concurrent callers can join, and sends out
//! batches of at most [`LoaderConfig::max_batch_size`] keys. A full queue is
//! sent out immediately.
//!
//! ## Example
//!
//! ```ignore
//! let mut scope = RequestScope::new();
//! let registry = LoaderRegistry::builder(LoaderConfig::default())
//!     .register_users(store.clone())
//!     .build(&scope);
//! scope.attach(registry)?;
//!
//! let author_ids: Vec<u64> = posts.iter().map(|p| p.user_id).collect();
//! let (authors, errors) = load_users(&scope, &author_ids).await?;
//! ```

mod dispatch;
mod pending;

pub mod batch_fn;
pub mod config;
pub mod error;
pub mod loader;
pub mod registry;
pub mod scope;
pub mod users;

pub use batch_fn::{BatchFn, BatchResult, Keyed, KeyedBatchFn, align_outcomes};
pub use config::LoaderConfig;
pub use error::{LoadError, Outcome, RegistryError, ScopedLoadError, partition};
pub use loader::Loader;
pub use registry::{LoaderRegistry, RegistryBuilder};
pub use scope::{Cancellation, RequestScope};
pub use users::{StoreError, User, UserBatch, UserLoaderFn, UserStore, load_user, load_users};
