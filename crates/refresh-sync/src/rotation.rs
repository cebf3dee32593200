//! Version rotation: prepare, create alias, repoint the consumer.
//!
//! The steps run strictly in that order, and the consumer pointer is only
//! written after the alias exists. Any failure before the repoint leaves the
//! pointer at its pre-run value.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use refresh_types::{alias_name_for_run, PrepareOutcome, PrepareStatus, ServingAlias};

use crate::client::{KnowledgeIndexClient, KnowledgeIndexError};
use crate::consumer::{ConsumerConfigError, ConsumerConfigStore};

/// Rotation failures.
///
/// Every variant except [`RotationError::Repoint`] leaves the consumer
/// pointer untouched.
#[derive(Debug, Error)]
pub enum RotationError {
    #[error("Failed to read consumer configuration: {0}")]
    ReadConfig(#[source] ConsumerConfigError),

    #[error("Prepare failed: {0}")]
    Prepare(#[source] KnowledgeIndexError),

    #[error("Prepare returned non-servable status: {0}")]
    PrepareRejected(PrepareStatus),

    #[error("Failed to create alias '{name}': {source}")]
    CreateAlias {
        name: String,
        #[source]
        source: KnowledgeIndexError,
    },

    #[error("Alias {} created but consumer was not repointed: {source}", .alias.alias_id)]
    Repoint {
        alias: ServingAlias,
        #[source]
        source: ConsumerConfigError,
    },
}

impl RotationError {
    /// A repoint failure leaves a built but unreferenced alias behind.
    pub fn requires_operator(&self) -> bool {
        matches!(self, RotationError::Repoint { .. })
    }

    pub fn pointer_untouched(&self) -> bool {
        !self.requires_operator()
    }

    /// Transport-level failure of a step that is safe to repeat.
    pub fn is_transient(&self) -> bool {
        match self {
            RotationError::Prepare(e) => e.is_transient(),
            RotationError::ReadConfig(ConsumerConfigError::Unavailable(_)) => true,
            _ => false,
        }
    }
}

/// Result of a successful rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationOutcome {
    pub prepare: PrepareOutcome,
    pub alias: ServingAlias,
    /// Alias the consumer pointed at before the run
    pub previous_alias: Option<String>,
    pub config_version: u64,
}

pub struct RotationManager {
    client: Arc<dyn KnowledgeIndexClient>,
    consumers: Arc<dyn ConsumerConfigStore>,
    alias_key: String,
    alias_prefix: String,
}

impl RotationManager {
    pub fn new(
        client: Arc<dyn KnowledgeIndexClient>,
        consumers: Arc<dyn ConsumerConfigStore>,
        alias_key: impl Into<String>,
        alias_prefix: impl Into<String>,
    ) -> Self {
        Self {
            client,
            consumers,
            alias_key: alias_key.into(),
            alias_prefix: alias_prefix.into(),
        }
    }

    pub async fn rotate(
        &self,
        index_id: &str,
        consumer_id: &str,
    ) -> Result<RotationOutcome, RotationError> {
        self.rotate_at(index_id, consumer_id, Utc::now()).await
    }

    /// Rotate using `run_at` to name the new alias.
    pub async fn rotate_at(
        &self,
        index_id: &str,
        consumer_id: &str,
        run_at: DateTime<Utc>,
    ) -> Result<RotationOutcome, RotationError> {
        let current = self
            .consumers
            .get_config(consumer_id)
            .await
            .map_err(RotationError::ReadConfig)?;
        let previous_alias = current.get(&self.alias_key).map(str::to_string);

        // 1. Prepare
        let status = self
            .client
            .prepare(index_id)
            .await
            .map_err(RotationError::Prepare)?;
        let prepare = PrepareOutcome {
            status,
            prepared_at: Utc::now(),
        };
        if !status.is_servable() {
            warn!(
                index = index_id,
                status = %status,
                "Prepare did not produce a servable snapshot"
            );
            return Err(RotationError::PrepareRejected(status));
        }
        info!(index = index_id, status = %status, "Index prepared");

        // 2. Alias
        let alias_name = alias_name_for_run(&self.alias_prefix, run_at);
        let alias_id = self
            .client
            .create_alias(index_id, &alias_name)
            .await
            .map_err(|source| RotationError::CreateAlias {
                name: alias_name.clone(),
                source,
            })?;
        let alias = ServingAlias {
            alias_id,
            alias_name,
            created_at: Utc::now(),
        };
        info!(alias = %alias.alias_name, alias_id = %alias.alias_id, "Alias created");

        // 3. Repoint
        let written = match self
            .consumers
            .compare_and_swap(
                consumer_id,
                &self.alias_key,
                previous_alias.as_deref(),
                &alias.alias_id,
            )
            .await
        {
            Ok(written) => written,
            Err(source) => {
                error!(
                    consumer = consumer_id,
                    alias_id = %alias.alias_id,
                    error = %source,
                    "Consumer repoint failed; new alias is not live"
                );
                return Err(RotationError::Repoint { alias, source });
            }
        };

        info!(
            consumer = consumer_id,
            previous = previous_alias.as_deref().unwrap_or("-"),
            alias_id = %alias.alias_id,
            version = written.version,
            "Consumer repointed"
        );
        Ok(RotationOutcome {
            prepare,
            alias,
            previous_alias,
            config_version: written.version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::InMemoryConsumerConfigStore;
    use crate::memory::InMemoryKnowledgeIndex;
    use chrono::TimeZone;

    struct Fixture {
        index: Arc<InMemoryKnowledgeIndex>,
        consumers: Arc<InMemoryConsumerConfigStore>,
        manager: RotationManager,
    }

    fn fixture() -> Fixture {
        let index = Arc::new(InMemoryKnowledgeIndex::new());
        let consumers = Arc::new(
            InMemoryConsumerConfigStore::new().with_value("chat", "alias_id", "alias-old"),
        );
        let manager = RotationManager::new(index.clone(), consumers.clone(), "alias_id", "refresh");
        Fixture {
            index,
            consumers,
            manager,
        }
    }

    async fn pointer(f: &Fixture) -> Option<String> {
        f.consumers
            .get_config("chat")
            .await
            .unwrap()
            .get("alias_id")
            .map(str::to_string)
    }

    #[tokio::test]
    async fn test_rotation_repoints_consumer() {
        let f = fixture();
        let run_at = Utc.with_ymd_and_hms(2026, 3, 1, 3, 0, 0).unwrap();

        let outcome = f.manager.rotate_at("kb-1", "chat", run_at).await.unwrap();

        assert_eq!(outcome.alias.alias_name, "refresh-20260301-030000");
        assert_eq!(outcome.previous_alias.as_deref(), Some("alias-old"));
        assert_eq!(pointer(&f).await, Some(outcome.alias.alias_id.clone()));
        assert_eq!(f.index.aliases().len(), 1);
    }

    #[tokio::test]
    async fn test_prepare_failure_leaves_pointer() {
        let f = fixture();
        f.index.fail_prepare("index busy");

        let err = f.manager.rotate("kb-1", "chat").await.unwrap_err();

        assert!(matches!(err, RotationError::Prepare(_)));
        assert!(err.pointer_untouched());
        assert!(f.index.aliases().is_empty());
        assert_eq!(pointer(&f).await.as_deref(), Some("alias-old"));
    }

    #[tokio::test]
    async fn test_non_servable_prepare_leaves_pointer() {
        let f = fixture();
        f.index.set_prepare_status(PrepareStatus::Failed);

        let err = f.manager.rotate("kb-1", "chat").await.unwrap_err();

        assert!(matches!(err, RotationError::PrepareRejected(PrepareStatus::Failed)));
        assert!(f.index.aliases().is_empty());
        assert_eq!(pointer(&f).await.as_deref(), Some("alias-old"));
    }

    #[tokio::test]
    async fn test_unrecognised_prepare_status_leaves_pointer() {
        let f = fixture();
        f.index.set_prepare_status(PrepareStatus::Unknown);

        let err = f.manager.rotate("kb-1", "chat").await.unwrap_err();

        assert!(matches!(err, RotationError::PrepareRejected(PrepareStatus::Unknown)));
        assert!(err.pointer_untouched());
        assert!(f.index.aliases().is_empty());
        assert_eq!(pointer(&f).await.as_deref(), Some("alias-old"));
    }

    #[tokio::test]
    async fn test_alias_failure_leaves_pointer() {
        let f = fixture();
        f.index.fail_create_alias("quota exceeded");

        let err = f.manager.rotate("kb-1", "chat").await.unwrap_err();

        assert!(matches!(err, RotationError::CreateAlias { .. }));
        assert!(!err.requires_operator());
        assert_eq!(f.index.prepare_calls(), 1);
        assert_eq!(pointer(&f).await.as_deref(), Some("alias-old"));
    }

    #[tokio::test]
    async fn test_repoint_failure_requires_operator() {
        let f = fixture();
        f.consumers.fail_writes(true);

        let err = f.manager.rotate("kb-1", "chat").await.unwrap_err();

        assert!(err.requires_operator());
        match &err {
            RotationError::Repoint { alias, .. } => assert_eq!(alias.alias_id, "alias-1"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(pointer(&f).await.as_deref(), Some("alias-old"));
    }

    #[tokio::test]
    async fn test_concurrent_manual_change_is_not_clobbered() {
        let f = fixture();
        // Operator edits the pointer between our read and our write.
        struct Racing {
            inner: Arc<InMemoryConsumerConfigStore>,
        }
        #[async_trait::async_trait]
        impl ConsumerConfigStore for Racing {
            async fn get_config(
                &self,
                consumer_id: &str,
            ) -> Result<crate::consumer::VersionedConfig, ConsumerConfigError> {
                let config = self.inner.get_config(consumer_id).await;
                self.inner.overwrite(consumer_id, "alias_id", "alias-manual");
                config
            }

            async fn compare_and_swap(
                &self,
                consumer_id: &str,
                key: &str,
                expected_old: Option<&str>,
                new: &str,
            ) -> Result<crate::consumer::VersionedConfig, ConsumerConfigError> {
                self.inner
                    .compare_and_swap(consumer_id, key, expected_old, new)
                    .await
            }
        }

        let manager = RotationManager::new(
            f.index.clone(),
            Arc::new(Racing {
                inner: f.consumers.clone(),
            }),
            "alias_id",
            "refresh",
        );
        let err = manager.rotate("kb-1", "chat").await.unwrap_err();

        assert!(matches!(
            err,
            RotationError::Repoint {
                source: ConsumerConfigError::Conflict { .. },
                ..
            }
        ));
        assert_eq!(pointer(&f).await.as_deref(), Some("alias-manual"));
    }

    #[tokio::test]
    async fn test_unreadable_config_aborts_before_prepare() {
        let f = fixture();
        f.consumers.fail_reads(true);

        let err = f.manager.rotate("kb-1", "chat").await.unwrap_err();

        assert!(matches!(err, RotationError::ReadConfig(_)));
        assert!(err.is_transient());
        assert_eq!(f.index.prepare_calls(), 0);
    }
}
