use crate::error::AppError;
use crate::images::ImageCapture;
use async_trait::async_trait;

/// The search index mirror. Documents are keyed by the image id, and every
/// write is idempotent: upserting or deleting the same id twice converges.
#[async_trait]
pub trait Searcher: Send + Sync {
    async fn ensure_index_exists(&self) -> Result<(), AppError>;
    async fn upsert_image(&self, image: &ImageCapture) -> Result<(), AppError>;
    async fn delete_image(&self, id: i64) -> Result<(), AppError>;
    async fn get_image(&self, id: i64) -> Result<Option<ImageCapture>, AppError>;
    /// An empty query matches every document.
    async fn search_images(&self, query: &str, limit: usize) -> Result<Vec<ImageCapture>, AppError>;
    async fn count_images(&self) -> Result<u64, AppError>;
    /// Every indexed document. Used by reconciliation.
    async fn all_images(&self) -> Result<Vec<ImageCapture>, AppError>;
}
