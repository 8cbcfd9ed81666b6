//! Tag and category listings, cached as whole collections.

use std::sync::Arc;

use crate::application::error::AppError;
use crate::application::repos::TaxonomyRepo;
use crate::cache::{CacheAside, InvalidationRouter, keys};
use crate::domain::posts::{CategoryRecord, TagRecord};

pub struct TaxonomyService {
    cache: Arc<CacheAside>,
    invalidation: Arc<InvalidationRouter>,
    taxonomy: Arc<dyn TaxonomyRepo>,
}

impl TaxonomyService {
    pub fn new(
        cache: Arc<CacheAside>,
        invalidation: Arc<InvalidationRouter>,
        taxonomy: Arc<dyn TaxonomyRepo>,
    ) -> Self {
        Self {
            cache,
            invalidation,
            taxonomy,
        }
    }

    pub async fn list_tags(&self) -> Result<Vec<TagRecord>, AppError> {
        self.cache
            .get_or_compute(&keys::tags_all(), Some(keys::TAXONOMY_TTL), false, || async {
                self.taxonomy.list_tags().await.map_err(AppError::from)
            })
            .await
    }

    pub async fn list_categories(&self) -> Result<Vec<CategoryRecord>, AppError> {
        self.cache
            .get_or_compute(
                &keys::categories_all(),
                Some(keys::TAXONOMY_TTL),
                false,
                || async {
                    self.taxonomy
                        .list_categories()
                        .await
                        .map_err(AppError::from)
                },
            )
            .await
    }

    pub async fn create_tag(&self, name: String) -> Result<TagRecord, AppError> {
        if name.trim().is_empty() {
            return Err(AppError::validation("tag name must not be empty"));
        }
        let tag = self.taxonomy.create_tag(name).await?;
        self.invalidation.drop_taxonomy().await?;
        Ok(tag)
    }

    pub async fn create_category(
        &self,
        name: String,
        description: Option<String>,
    ) -> Result<CategoryRecord, AppError> {
        if name.trim().is_empty() {
            return Err(AppError::validation("category name must not be empty"));
        }
        let category = self.taxonomy.create_category(name, description).await?;
        self.invalidation.drop_taxonomy().await?;
        Ok(category)
    }
}
