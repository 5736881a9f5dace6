//! Feed snapshot source / 快照数据源
//!
//! The spreadsheet ingestion layer is a black box: given a day-month tag
//! it yields the full product list for that date, or fails when the date
//! is unknown. The search subsystem only depends on the trait.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::models::Product;

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("no snapshot available for date {0}")]
    DataUnavailable(String),
    #[error("snapshot read failed: {0}")]
    Read(String),
    #[error("snapshot parse failed: {0}")]
    Parse(String),
}

/// Black-box snapshot provider / 快照提供者
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(&self, date: &str) -> Result<Vec<Product>, FeedError>;
}

/// Directory of `products_<DD-MM>.json` files written by the ingestion
/// job / 摄取任务落盘的 JSON 快照目录
pub struct JsonFeed {
    dir: PathBuf,
}

impl JsonFeed {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn snapshot_path(&self, date: &str) -> PathBuf {
        self.dir.join(format!("products_{}.json", date))
    }
}

#[async_trait]
impl SnapshotSource for JsonFeed {
    async fn fetch_snapshot(&self, date: &str) -> Result<Vec<Product>, FeedError> {
        let path = self.snapshot_path(date);
        if !path.exists() {
            return Err(FeedError::DataUnavailable(date.to_string()));
        }
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| FeedError::Read(e.to_string()))?;
        let products: Vec<Product> =
            serde_json::from_str(&raw).map_err(|e| FeedError::Parse(e.to_string()))?;
        tracing::debug!(date, count = products.len(), "feed snapshot loaded");
        Ok(products)
    }
}

/// Fixed in-memory snapshots, used as a test double and for seeding demo
/// data / 内存快照（测试替身）
#[derive(Default)]
pub struct StaticFeed {
    snapshots: HashMap<String, Vec<Product>>,
}

impl StaticFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(mut self, date: &str, products: Vec<Product>) -> Self {
        self.snapshots.insert(date.to_string(), products);
        self
    }
}

#[async_trait]
impl SnapshotSource for StaticFeed {
    async fn fetch_snapshot(&self, date: &str) -> Result<Vec<Product>, FeedError> {
        self.snapshots
            .get(date)
            .cloned()
            .ok_or_else(|| FeedError::DataUnavailable(date.to_string()))
    }
}
