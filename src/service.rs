use crate::error::AppError;
use crate::images::{ImageCapture, ImageDto};
use crate::pagination::PageRequest;
use crate::search::Searcher;
use crate::store::RecordStore;
use crate::sync::SyncBridge;
use crate::validation::{check_content_types, check_identifiers, require_complete, validate_for_create};
use std::sync::Arc;

/// Request-facing operations on images. Writes commit to the record store
/// and then nudge the sync bridge; they never wait for the index.
#[derive(Clone)]
pub struct ImageService {
    store: RecordStore,
    searcher: Arc<dyn Searcher>,
    bridge: Arc<SyncBridge>,
}

impl ImageService {
    pub fn new(store: RecordStore, searcher: Arc<dyn Searcher>, bridge: Arc<SyncBridge>) -> Self {
        Self {
            store,
            searcher,
            bridge,
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn searcher(&self) -> &Arc<dyn Searcher> {
        &self.searcher
    }

    pub fn bridge(&self) -> &Arc<SyncBridge> {
        &self.bridge
    }

    pub async fn create(&self, dto: ImageDto) -> Result<ImageCapture, AppError> {
        log::debug!("Request to save image: guid={:?}", dto.guid);
        let image = validate_for_create(dto)?;
        let created = self.store.insert(image).await?;
        self.bridge.on_create(created.id);
        Ok(created)
    }

    /// Ids must agree and the target must exist in the record store.
    pub async fn validate_for_update(&self, id: i64, dto: &ImageDto) -> Result<(), AppError> {
        check_identifiers(id, dto)?;
        if !self.store.exists(id).await? {
            return Err(AppError::UpdateTargetNotFound(id));
        }
        Ok(())
    }

    pub async fn update(&self, id: i64, dto: ImageDto) -> Result<ImageCapture, AppError> {
        log::debug!("Request to update image {}", id);
        self.validate_for_update(id, &dto).await?;
        let image = require_complete(dto)?.with_id(id);
        let updated = self.store.update(image).await?;
        self.bridge.on_update(updated.id);
        Ok(updated)
    }

    pub async fn partial_update(&self, id: i64, dto: ImageDto) -> Result<ImageCapture, AppError> {
        log::debug!("Request to partially update image {}", id);
        self.validate_for_update(id, &dto).await?;
        check_content_types(&dto)?;
        let updated = self.store.patch(id, dto).await?;
        self.bridge.on_update(updated.id);
        Ok(updated)
    }

    pub async fn find_page(&self, page: PageRequest) -> Result<(Vec<ImageCapture>, u64), AppError> {
        log::debug!("Request to get a page of images: {:?}", page);
        let total = self.store.count().await?;
        let images = self.store.find_page(page).await?;
        Ok((images, total))
    }

    pub async fn find_one(&self, id: i64) -> Result<ImageCapture, AppError> {
        log::debug!("Request to get image {}", id);
        self.store.find_one(id).await?.ok_or_else(|| AppError::not_found(id))
    }

    pub async fn delete(&self, id: i64) -> Result<(), AppError> {
        log::debug!("Request to delete image {}", id);
        if !self.store.delete(id).await? {
            return Err(AppError::not_found(id));
        }
        self.bridge.on_delete(id);
        Ok(())
    }

    /// Queries the search index only; results may trail recent writes.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<ImageCapture>, AppError> {
        log::debug!("Request to search images for query {:?}", query);
        self.searcher.search_images(query, limit).await
    }
}
