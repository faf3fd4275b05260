//! Batched loading of user records.
//!
//! Posts and other records carry the id of their author; rendering a list of
//! them needs one user per record. Going through the scope's user loader turns
//! those lookups into one `users_by_ids` query per dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::batch_fn::{Keyed, KeyedBatchFn};
use crate::error::{LoadError, ScopedLoadError, partition};
use crate::registry::RegistryBuilder;
use crate::scope::RequestScope;

/// The loader type user lookups are registered under.
pub type UserLoaderFn = Keyed<UserBatch>;

/// Public view of a user account. Credentials never leave the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub email: String,
    pub username: String,
    pub full_name: String,
    pub role: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("user store unavailable: {message}")]
    Unavailable { message: String },

    #[error("user query failed: {message}")]
    Query { message: String },
}

/// Persistent storage of users, as seen by the loader.
#[async_trait]
pub trait UserStore: Send + Sync + 'static {
    /// Fetches every user whose id is in `ids` with a single query.
    ///
    /// Ids without a user are simply absent from the map.
    async fn users_by_ids(&self, ids: &[u64]) -> Result<HashMap<u64, User>, StoreError>;
}

/// Batch function fetching users through a [`UserStore`].
pub struct UserBatch {
    store: Arc<dyn UserStore>,
}

impl UserBatch {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl KeyedBatchFn for UserBatch {
    type Key = u64;
    type Value = User;
    type Error = StoreError;

    async fn load_map(&self, keys: &[u64]) -> Result<HashMap<u64, User>, StoreError> {
        self.store.users_by_ids(keys).await
    }
}

impl RegistryBuilder {
    /// Registers the user loader backed by `store`.
    pub fn register_users(self, store: Arc<dyn UserStore>) -> Self {
        self.register(Keyed::new(UserBatch::new(store)))
    }
}

/// Loads one user through the scope's user loader.
///
/// `Ok(None)` means no such user. A scope without a user loader is a
/// configuration error and fails before anything is fetched.
pub async fn load_user(scope: &RequestScope, id: u64) -> Result<Option<User>, ScopedLoadError<StoreError>> {
    let loader = scope.loader::<UserLoaderFn>()?;
    Ok(loader.load(id).await?)
}

/// Loads many users through the scope's user loader.
///
/// # Returns
///
/// `(users, errors)`, both aligned with `ids`. Position `i` holds the user,
/// the error, or neither when the user does not exist.
pub async fn load_users(
    scope: &RequestScope,
    ids: &[u64],
) -> Result<(Vec<Option<User>>, Vec<Option<LoadError<StoreError>>>), ScopedLoadError<StoreError>> {
    let loader = scope.loader::<UserLoaderFn>()?;
    let outcomes = loader.load_many(ids.iter().copied()).await;
    Ok(partition(outcomes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoaderConfig;
    use crate::error::RegistryError;
    use crate::registry::LoaderRegistry;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    fn user(id: u64) -> User {
        User {
            id,
            email: format!("user{id}@example.com"),
            username: format!("user{id}"),
            full_name: format!("User {id}"),
            role: "user".to_string(),
            active: true,
        }
    }

    /// Knows users 1 through 10 and counts queries.
    #[derive(Default)]
    struct MemoryStore {
        queries: Mutex<Vec<Vec<u64>>>,
        offline: bool,
    }

    #[async_trait]
    impl UserStore for MemoryStore {
        async fn users_by_ids(&self, ids: &[u64]) -> Result<HashMap<u64, User>, StoreError> {
            self.queries.lock().unwrap().push(ids.to_vec());
            if self.offline {
                return Err(StoreError::Unavailable { message: "connection reset".to_string() });
            }
            Ok(ids
                .iter()
                .filter(|id| (1..=10).contains(*id))
                .map(|id| (*id, user(*id)))
                .collect())
        }
    }

    fn scope_with(store: Arc<MemoryStore>) -> RequestScope {
        let mut scope = RequestScope::new();
        let registry = LoaderRegistry::builder(LoaderConfig::default())
            .register_users(store)
            .build(&scope);
        scope.attach(registry).unwrap();
        scope
    }

    #[tokio::test]
    async fn test_load_user() {
        let store = Arc::new(MemoryStore::default());
        let scope = scope_with(store.clone());

        assert_eq!(load_user(&scope, 3).await, Ok(Some(user(3))));
        assert_eq!(load_user(&scope, 42).await, Ok(None));
        assert_eq!(load_user(&scope, 3).await, Ok(Some(user(3))));

        assert_eq!(*store.queries.lock().unwrap(), vec![vec![3], vec![42]]);
    }

    #[tokio::test]
    async fn test_load_users_for_a_page_of_posts() {
        let store = Arc::new(MemoryStore::default());
        let scope = scope_with(store.clone());
        let authors = [2, 5, 2, 99, 5];

        let (users, errors) = load_users(&scope, &authors).await.unwrap();

        assert_eq!(users, vec![Some(user(2)), Some(user(5)), Some(user(2)), None, Some(user(5))]);
        assert!(errors.iter().all(Option::is_none));
        assert_eq!(*store.queries.lock().unwrap(), vec![vec![2, 5, 99]]);
    }

    #[tokio::test]
    async fn test_store_failure_reaches_every_caller() {
        let store = Arc::new(MemoryStore { offline: true, ..Default::default() });
        let scope = scope_with(store);
        let expected = LoadError::Batch(StoreError::Unavailable { message: "connection reset".to_string() });

        let (users, errors) = load_users(&scope, &[1, 2]).await.unwrap();

        assert_eq!(users, vec![None, None]);
        assert_eq!(errors, vec![Some(expected.clone()), Some(expected.clone())]);
        assert_eq!(load_user(&scope, 1).await, Err(ScopedLoadError::Load(expected)));
    }

    #[tokio::test]
    async fn test_missing_registry_fails_fast() {
        let scope = RequestScope::new();

        assert_eq!(
            load_user(&scope, 1).await,
            Err(ScopedLoadError::Registry(RegistryError::NotAttached))
        );
        assert_eq!(
            load_users(&scope, &[1]).await,
            Err(ScopedLoadError::Registry(RegistryError::NotAttached))
        );
    }

    #[tokio::test]
    async fn test_registry_without_user_loader() {
        let mut scope = RequestScope::new();
        let registry = LoaderRegistry::builder(LoaderConfig::default()).build(&scope);
        scope.attach(registry).unwrap();

        let err = load_user(&scope, 1).await.unwrap_err();
        assert!(matches!(err, ScopedLoadError::Registry(RegistryError::NotConfigured { .. })));
    }

    #[test]
    fn test_user_serializes_without_credentials() {
        let json = serde_json::to_value(user(1)).unwrap();
        assert_eq!(json["username"], "user1");
        assert!(json.get("password").is_none());
    }
}
