use crate::config::AppConfig;
use crate::error::AppError;
use crate::images::ImageCapture;
use crate::search::Searcher;
use async_trait::async_trait;
use elasticsearch::{
    http::{
        response::Response,
        transport::{SingleNodeConnectionPool, TransportBuilder},
        StatusCode,
    },
    params::Refresh,
    CountParts, DeleteParts, Elasticsearch, GetParts, IndexParts, SearchParts,
};
use serde_json::{json, Value};
use url::Url;

const INDEX_NAME: &str = "images";
const SCAN_PAGE_SIZE: usize = 500;

pub struct ElasticsearchSearcher {
    client: Elasticsearch,
}

impl ElasticsearchSearcher {
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        log::debug!("Creating Elasticsearch client for URL: {}", config.elasticsearch_url);
        let url = Url::parse(&config.elasticsearch_url)
            .map_err(|e| AppError::Generic(format!("invalid elasticsearch_url: {}", e)))?;
        let conn_pool = SingleNodeConnectionPool::new(url);
        let transport = TransportBuilder::new(conn_pool)
            .disable_proxy()
            .build()
            .map_err(|e| AppError::Generic(format!("cannot build Elasticsearch transport: {}", e)))?;
        let client = Elasticsearch::new(transport);
        log::trace!("Elasticsearch client created successfully.");
        Ok(Self { client })
    }

    async fn hits(response: Response) -> Result<Vec<ImageCapture>, AppError> {
        let body = response.error_for_status_code()?.json::<Value>().await?;
        log::trace!("Elasticsearch search response: {:?}", body);
        sources(&body)
    }
}

fn mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "id": { "type": "long" },
                "guid": { "type": "keyword" },
                "plate": { "type": "keyword" },
                "imageLp": { "type": "binary" },
                "imageLpContentType": { "type": "keyword" },
                "imageThumb": { "type": "binary" },
                "imageThumbContentType": { "type": "keyword" },
                "anpr": { "type": "keyword" },
                "rfid": { "type": "keyword" },
                "dataStatus": { "type": "keyword" },
                "gantry": { "type": "long" },
                "lane": { "type": "long" },
                "kph": { "type": "long" },
                "ambush": { "type": "long" },
                "direction": { "type": "long" },
                "vehicle": { "type": "long" },
                "issue": { "type": "text" },
                "status": { "type": "keyword" }
            }
        }
    })
}

fn search_body(query: &str, limit: usize) -> Value {
    if query.trim().is_empty() {
        json!({
            "query": { "match_all": {} },
            "size": limit,
            "sort": [{ "id": "asc" }]
        })
    } else {
        json!({
            "query": {
                "query_string": {
                    "query": query,
                    "default_field": "*"
                }
            },
            "size": limit
        })
    }
}

fn scan_body(after: Option<i64>) -> Value {
    let mut body = json!({
        "query": { "match_all": {} },
        "size": SCAN_PAGE_SIZE,
        "sort": [{ "id": "asc" }]
    });
    if let Some(after) = after {
        body["search_after"] = json!([after]);
    }
    body
}

fn sources(body: &Value) -> Result<Vec<ImageCapture>, AppError> {
    let mut images = Vec::new();
    if let Some(hits) = body["hits"]["hits"].as_array() {
        for hit in hits {
            if let Some(source) = hit.get("_source") {
                images.push(serde_json::from_value(source.clone())?);
            }
        }
    }
    Ok(images)
}

#[async_trait]
impl Searcher for ElasticsearchSearcher {
    async fn ensure_index_exists(&self) -> Result<(), AppError> {
        log::debug!("Checking if Elasticsearch index '{}' exists.", INDEX_NAME);
        let index_exists = self
            .client
            .indices()
            .exists(elasticsearch::indices::IndicesExistsParts::Index(&[INDEX_NAME]))
            .send()
            .await?
            .status_code()
            .is_success();

        if !index_exists {
            log::info!("Elasticsearch index '{}' does not exist. Creating it.", INDEX_NAME);
            self.client
                .indices()
                .create(elasticsearch::indices::IndicesCreateParts::Index(INDEX_NAME))
                .body(mapping())
                .send()
                .await?
                .error_for_status_code()?;
            log::info!("Elasticsearch index '{}' created successfully.", INDEX_NAME);
        } else {
            log::debug!("Elasticsearch index '{}' already exists.", INDEX_NAME);
        }

        Ok(())
    }

    async fn upsert_image(&self, image: &ImageCapture) -> Result<(), AppError> {
        log::debug!("Indexing image {} in Elasticsearch", image.id);
        let id = image.id.to_string();
        self.client
            .index(IndexParts::IndexId(INDEX_NAME, &id))
            .body(image)
            .refresh(Refresh::True)
            .send()
            .await?
            .error_for_status_code()?;
        Ok(())
    }

    async fn delete_image(&self, id: i64) -> Result<(), AppError> {
        log::debug!("Deleting image {} from Elasticsearch", id);
        let doc_id = id.to_string();
        let response = self
            .client
            .delete(DeleteParts::IndexId(INDEX_NAME, &doc_id))
            .refresh(Refresh::True)
            .send()
            .await?;
        if response.status_code() == StatusCode::NOT_FOUND {
            log::trace!("Image {} was already absent from Elasticsearch", id);
            return Ok(());
        }
        response.error_for_status_code()?;
        Ok(())
    }

    async fn get_image(&self, id: i64) -> Result<Option<ImageCapture>, AppError> {
        let doc_id = id.to_string();
        let response = self
            .client
            .get(GetParts::IndexId(INDEX_NAME, &doc_id))
            .send()
            .await?;
        if response.status_code() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response.error_for_status_code()?.json::<Value>().await?;
        match body.get("_source") {
            Some(source) => Ok(Some(serde_json::from_value(source.clone())?)),
            None => Ok(None),
        }
    }

    async fn search_images(&self, query: &str, limit: usize) -> Result<Vec<ImageCapture>, AppError> {
        log::debug!("Searching Elasticsearch for images with query: {}", query);
        let response = self
            .client
            .search(SearchParts::Index(&[INDEX_NAME]))
            .body(search_body(query, limit))
            .send()
            .await?;
        if response.status_code() == StatusCode::BAD_REQUEST {
            let body = response.json::<Value>().await?;
            return Err(AppError::InvalidRequest(format!(
                "search query rejected: {}",
                body["error"]["reason"].as_str().unwrap_or("unknown reason")
            )));
        }
        let images = Self::hits(response).await?;
        log::debug!("Found {} images in Elasticsearch for query: {}", images.len(), query);
        Ok(images)
    }

    async fn count_images(&self) -> Result<u64, AppError> {
        let body = self
            .client
            .count(CountParts::Index(&[INDEX_NAME]))
            .send()
            .await?
            .error_for_status_code()?
            .json::<Value>()
            .await?;
        body["count"]
            .as_u64()
            .ok_or_else(|| AppError::Generic("count response has no count".into()))
    }

    async fn all_images(&self) -> Result<Vec<ImageCapture>, AppError> {
        let mut images: Vec<ImageCapture> = Vec::new();
        let mut after = None;
        loop {
            let response = self
                .client
                .search(SearchParts::Index(&[INDEX_NAME]))
                .body(scan_body(after))
                .send()
                .await?;
            let page = Self::hits(response).await?;
            let done = page.len() < SCAN_PAGE_SIZE;
            after = page.last().map(|image| image.id);
            images.extend(page);
            if done || after.is_none() {
                break;
            }
        }
        log::debug!("Scanned {} images from Elasticsearch", images.len());
        Ok(images)
    }
}
