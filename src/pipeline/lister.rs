//! Turns a query into the set of shard keys written by its unload.

use crate::config::{Config, ListingConfig};
use crate::error::{PipelineError, Result};
use crate::run::{Query, RunId, ShardKey};
use crate::warehouse::{UnloadRequest, Warehouse};
use futures::TryStreamExt;
use object_store::{ObjectMeta, ObjectStore};
use std::sync::Arc;

/// Keys found under a run prefix after the unload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardListing {
    /// Data shards, in key order
    pub shards: Vec<ShardKey>,

    /// Other objects written under the run prefix (manifests, metadata)
    pub auxiliary: Vec<ShardKey>,
}

impl ShardListing {
    /// Every key under the run prefix. This is the set cleanup deletes.
    pub fn all_keys(&self) -> Vec<ShardKey> {
        self.shards.iter().chain(&self.auxiliary).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}

/// Unloads a query and lists the resulting shards.
pub struct ShardLister {
    warehouse: Arc<dyn Warehouse>,
    store: Arc<dyn ObjectStore>,
    config: Arc<Config>,
}

impl ShardLister {
    pub fn new(warehouse: Arc<dyn Warehouse>, store: Arc<dyn ObjectStore>, config: Arc<Config>) -> Self {
        Self {
            warehouse,
            store,
            config,
        }
    }

    /// Unload request for `query` into the namespace of `run`.
    pub fn unload_request(&self, query: &Query, run: &RunId) -> UnloadRequest {
        UnloadRequest {
            query: query.clone(),
            destination: format!("{}/{}/", self.config.storage.base_uri(), run),
            delimiter: self.config.unload.delimiter,
            compressed: false,
            iam_role: self.config.unload.iam_role.clone(),
        }
    }

    /// Unload `query` under `run`'s prefix and list the shards it produced.
    pub async fn list_shards(&self, query: &Query, run: &RunId) -> Result<ShardListing> {
        let request = self.unload_request(query, run);

        tracing::info!("Unloading query to {}", request.destination);
        self.warehouse
            .unload(&request)
            .await
            .map_err(|source| PipelineError::Unload {
                destination: request.destination.clone(),
                source,
            })?;

        let prefix = run.prefix_under(&self.config.storage.prefix);
        let objects: Vec<ObjectMeta> = self
            .store
            .list(Some(&prefix))
            .try_collect()
            .await
            .map_err(|source| PipelineError::Listing {
                prefix: prefix.to_string(),
                source,
            })?;

        let listing = select_shards(objects, &self.config.storage.bucket, &self.config.unload.listing);
        tracing::info!(
            "Listed {} shards ({} auxiliary objects) under {}",
            listing.shards.len(),
            listing.auxiliary.len(),
            prefix
        );

        Ok(listing)
    }
}

/// Split listed objects into data shards and auxiliary objects.
fn select_shards(mut objects: Vec<ObjectMeta>, bucket: &str, listing: &ListingConfig) -> ShardListing {
    objects.sort_by(|a, b| a.location.cmp(&b.location));

    let mut result = ShardListing::default();
    for (position, meta) in objects.into_iter().enumerate() {
        let key = ShardKey::new(bucket, meta.location.clone());

        let excluded = position < listing.skip_leading
            || (listing.skip_empty_objects && meta.size == 0)
            || listing
                .exclude_suffixes
                .iter()
                .any(|suffix| meta.location.as_ref().ends_with(suffix.as_str()));

        if excluded {
            tracing::debug!("Skipping non-data object {}", key);
            result.auxiliary.push(key);
        } else {
            result.shards.push(key);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::path::Path;

    fn meta(location: &str, size: u64) -> ObjectMeta {
        ObjectMeta {
            location: Path::from(location),
            last_modified: Default::default(),
            size,
            e_tag: None,
            version: None,
        }
    }

    fn paths(keys: &[ShardKey]) -> Vec<&str> {
        keys.iter().map(|k| k.path.as_ref()).collect()
    }

    #[test]
    fn test_select_shards_filters_manifest_and_empty() {
        let objects = vec![
            meta("unload/run/0001_part_00", 10),
            meta("unload/run/manifest", 200),
            meta("unload/run/0000_part_00", 10),
            meta("unload/run/0002_part_00", 0),
        ];

        let listing = select_shards(objects, "bucket", &ListingConfig::default());

        assert_eq!(paths(&listing.shards), vec!["unload/run/0000_part_00", "unload/run/0001_part_00"]);
        assert_eq!(paths(&listing.auxiliary), vec!["unload/run/0002_part_00", "unload/run/manifest"]);
        assert_eq!(listing.all_keys().len(), 4);
        assert!(listing.shards.iter().all(|k| k.bucket == "bucket"));
    }

    #[test]
    fn test_select_shards_keeps_empty_objects_when_configured() {
        let objects = vec![meta("unload/run/0000_part_00", 0)];
        let listing_config = ListingConfig {
            skip_empty_objects: false,
            ..ListingConfig::default()
        };

        let listing = select_shards(objects, "bucket", &listing_config);
        assert_eq!(listing.len(), 1);
    }

    #[test]
    fn test_select_shards_positional_skip() {
        let objects: Vec<ObjectMeta> = (0..7)
            .map(|i| meta(&format!("unload/run/{:04}_part_00", i), 10))
            .collect();
        let listing_config = ListingConfig {
            exclude_suffixes: Vec::new(),
            skip_empty_objects: false,
            skip_leading: 5,
        };

        let listing = select_shards(objects, "bucket", &listing_config);

        assert_eq!(paths(&listing.shards), vec!["unload/run/0005_part_00", "unload/run/0006_part_00"]);
        assert_eq!(listing.auxiliary.len(), 5);
    }

    #[test]
    fn test_select_shards_empty_listing() {
        let listing = select_shards(Vec::new(), "bucket", &ListingConfig::default());
        assert!(listing.is_empty());
        assert!(listing.all_keys().is_empty());
    }
}
