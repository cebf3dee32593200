//! Partition catalog resolution.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use refresh_types::Partition;

use crate::client::{KnowledgeIndexClient, KnowledgeIndexError};

/// Resolves the partitions registered against one knowledge index.
///
/// The list is read once per run and never mutated afterwards. Service
/// order is preserved; a partition id listed twice is kept at its first
/// position.
pub struct PartitionCatalog {
    client: Arc<dyn KnowledgeIndexClient>,
    index_id: String,
}

impl PartitionCatalog {
    pub fn new(client: Arc<dyn KnowledgeIndexClient>, index_id: impl Into<String>) -> Self {
        Self {
            client,
            index_id: index_id.into(),
        }
    }

    pub fn index_id(&self) -> &str {
        &self.index_id
    }

    pub async fn resolve(&self) -> Result<Vec<Partition>, KnowledgeIndexError> {
        let listed = self.client.list_partitions(&self.index_id).await?;

        let mut seen = HashSet::new();
        let mut partitions = Vec::with_capacity(listed.len());
        for partition in listed {
            if seen.insert(partition.id.clone()) {
                partitions.push(partition);
            } else {
                warn!(partition = %partition.id, "Duplicate partition in catalog, ignoring");
            }
        }

        info!(
            index = %self.index_id,
            count = partitions.len(),
            names = ?partitions.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            "Resolved partition catalog"
        );
        Ok(partitions)
    }
}
