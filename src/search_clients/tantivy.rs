use crate::config::AppConfig;
use crate::error::AppError;
use crate::images::ImageCapture;
use crate::search::Searcher;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tantivy::collector::{DocSetCollector, TopDocs};
use tantivy::directory::MmapDirectory;
use tantivy::query::{AllQuery, Query, QueryParser, TermQuery};
use tantivy::schema::{Document, Field, IndexRecordOption, Schema, INDEXED, STORED, STRING, TEXT};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyError, Term};

const WRITER_MEMORY_BYTES: usize = 50_000_000;

#[derive(Clone, Copy)]
struct Fields {
    id: Field,
    guid: Field,
    plate: Field,
    anpr: Field,
    rfid: Field,
    data_status: Field,
    gantry: Field,
    lane: Field,
    kph: Field,
    ambush: Field,
    direction: Field,
    vehicle: Field,
    issue: Field,
    status: Field,
    image_lp_content_type: Field,
    image_thumb_content_type: Field,
    // full JSON of the capture, so reads return exactly what was written
    source: Field,
}

impl Fields {
    fn default_search_fields(&self) -> Vec<Field> {
        vec![
            self.guid,
            self.plate,
            self.anpr,
            self.rfid,
            self.data_status,
            self.issue,
            self.status,
        ]
    }
}

fn build_schema() -> (Schema, Fields) {
    let mut schema_builder = Schema::builder();

    let fields = Fields {
        id: schema_builder.add_i64_field("id", INDEXED | STORED),
        guid: schema_builder.add_text_field("guid", STRING),
        plate: schema_builder.add_text_field("plate", STRING),
        anpr: schema_builder.add_text_field("anpr", STRING),
        rfid: schema_builder.add_text_field("rfid", STRING),
        data_status: schema_builder.add_text_field("dataStatus", STRING),
        gantry: schema_builder.add_i64_field("gantry", INDEXED),
        lane: schema_builder.add_i64_field("lane", INDEXED),
        kph: schema_builder.add_i64_field("kph", INDEXED),
        ambush: schema_builder.add_i64_field("ambush", INDEXED),
        direction: schema_builder.add_i64_field("direction", INDEXED),
        vehicle: schema_builder.add_i64_field("vehicle", INDEXED),
        issue: schema_builder.add_text_field("issue", TEXT),
        status: schema_builder.add_text_field("status", STRING),
        image_lp_content_type: schema_builder.add_text_field("imageLpContentType", STRING),
        image_thumb_content_type: schema_builder.add_text_field("imageThumbContentType", STRING),
        source: schema_builder.add_text_field("source", STORED),
    };

    (schema_builder.build(), fields)
}

pub struct TantivySearcher {
    index: Index,
    reader: IndexReader,
    writer: Arc<Mutex<IndexWriter>>,
    fields: Fields,
}

impl TantivySearcher {
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        let index_path = &config.tantivy_index_path;
        log::debug!("Initializing Tantivy searcher with index path: {}", index_path);

        std::fs::create_dir_all(index_path)?;
        let (schema, fields) = build_schema();
        let directory = MmapDirectory::open(index_path).map_err(TantivyError::from)?;
        let index = Index::open_or_create(directory, schema)?;

        log::debug!("Tantivy searcher initialized successfully.");
        Self::with_index(index, fields)
    }

    /// A RAM-only index, gone when the searcher is dropped.
    pub fn in_memory() -> Result<Self, AppError> {
        let (schema, fields) = build_schema();
        Self::with_index(Index::create_in_ram(schema), fields)
    }

    fn with_index(index: Index, fields: Fields) -> Result<Self, AppError> {
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let writer = index.writer_with_num_threads(1, WRITER_MEMORY_BYTES)?;
        Ok(Self {
            index,
            reader,
            writer: Arc::new(Mutex::new(writer)),
            fields,
        })
    }

    fn to_document(fields: &Fields, image: &ImageCapture) -> Result<Document, AppError> {
        let mut doc = Document::default();
        doc.add_i64(fields.id, image.id);
        doc.add_text(fields.guid, &image.guid);
        doc.add_text(fields.data_status, &image.data_status);
        doc.add_i64(fields.gantry, image.gantry);
        doc.add_i64(fields.lane, image.lane);
        doc.add_i64(fields.vehicle, image.vehicle);

        let optional_text = [
            (fields.plate, &image.plate),
            (fields.anpr, &image.anpr),
            (fields.rfid, &image.rfid),
            (fields.issue, &image.issue),
            (fields.status, &image.status),
            (fields.image_lp_content_type, &image.image_lp_content_type),
            (fields.image_thumb_content_type, &image.image_thumb_content_type),
        ];
        for (field, value) in optional_text {
            if let Some(value) = value {
                doc.add_text(field, value);
            }
        }

        let optional_numbers = [
            (fields.kph, image.kph),
            (fields.ambush, image.ambush),
            (fields.direction, image.direction),
        ];
        for (field, value) in optional_numbers {
            if let Some(value) = value {
                doc.add_i64(field, value);
            }
        }

        doc.add_text(fields.source, &serde_json::to_string(image)?);
        Ok(doc)
    }

    fn from_document(fields: &Fields, doc: &Document) -> Result<ImageCapture, AppError> {
        let source = doc
            .get_first(fields.source)
            .and_then(|v| v.as_text())
            .ok_or_else(|| AppError::Generic("indexed document has no stored source".into()))?;
        Ok(serde_json::from_str(source)?)
    }

    fn id_term(fields: &Fields, id: i64) -> Term {
        Term::from_field_i64(fields.id, id)
    }

    /// Applies `f` to the shared writer, commits, and reloads the reader so
    /// the change is visible to the next search.
    async fn write<F>(&self, f: F) -> Result<(), AppError>
    where
        F: FnOnce(&mut IndexWriter, &Fields) -> Result<(), AppError> + Send + 'static,
    {
        let writer = self.writer.clone();
        let reader = self.reader.clone();
        let fields = self.fields;

        tokio::task::spawn_blocking(move || {
            let mut index_writer = writer
                .lock()
                .map_err(|_| AppError::Generic("tantivy writer lock poisoned".into()))?;
            if let Err(e) = f(&mut *index_writer, &fields) {
                index_writer.rollback()?;
                return Err(e);
            }
            index_writer.commit()?;
            reader.reload()?;
            log::trace!("Tantivy index writer committed changes.");
            Ok(())
        })
        .await?
    }

    async fn collect<Q>(&self, query: Q, limit: usize) -> Result<Vec<ImageCapture>, AppError>
    where
        Q: Query + 'static,
    {
        let reader = self.reader.clone();
        let fields = self.fields;

        tokio::task::spawn_blocking(move || {
            let searcher = reader.searcher();
            let top_docs = searcher.search(&query, &TopDocs::with_limit(limit.max(1)))?;
            let mut images = Vec::with_capacity(top_docs.len());
            for (_score, doc_address) in top_docs {
                let retrieved_doc = searcher.doc(doc_address)?;
                images.push(Self::from_document(&fields, &retrieved_doc)?);
            }
            Ok(images)
        })
        .await?
    }
}

#[async_trait]
impl Searcher for TantivySearcher {
    async fn ensure_index_exists(&self) -> Result<(), AppError> {
        // Tantivy creates the index on new, so this is a no-op
        log::debug!("Tantivy index existence is handled during initialization.");
        Ok(())
    }

    async fn upsert_image(&self, image: &ImageCapture) -> Result<(), AppError> {
        let image = image.clone();
        log::debug!("Indexing image {} in Tantivy", image.id);
        self.write(move |index_writer, fields| {
            let doc = Self::to_document(fields, &image)?;
            index_writer.delete_term(Self::id_term(fields, image.id));
            index_writer.add_document(doc)?;
            Ok(())
        })
        .await
    }

    async fn delete_image(&self, id: i64) -> Result<(), AppError> {
        log::debug!("Deleting image {} from Tantivy", id);
        self.write(move |index_writer, fields| {
            index_writer.delete_term(Self::id_term(fields, id));
            Ok(())
        })
        .await
    }

    async fn get_image(&self, id: i64) -> Result<Option<ImageCapture>, AppError> {
        let query = TermQuery::new(Self::id_term(&self.fields, id), IndexRecordOption::Basic);
        Ok(self.collect(query, 1).await?.into_iter().next())
    }

    async fn search_images(&self, query: &str, limit: usize) -> Result<Vec<ImageCapture>, AppError> {
        log::debug!("Searching Tantivy for images with query: {}", query);
        let images = if query.trim().is_empty() {
            self.collect(AllQuery, limit).await?
        } else {
            let query_parser = QueryParser::for_index(&self.index, self.fields.default_search_fields());
            let parsed = query_parser.parse_query(query)?;
            self.collect(parsed, limit).await?
        };
        log::debug!("Found {} images in Tantivy for query: {}", images.len(), query);
        Ok(images)
    }

    async fn count_images(&self) -> Result<u64, AppError> {
        let reader = self.reader.clone();
        tokio::task::spawn_blocking(move || Ok(reader.searcher().num_docs())).await?
    }

    async fn all_images(&self) -> Result<Vec<ImageCapture>, AppError> {
        let reader = self.reader.clone();
        let fields = self.fields;

        tokio::task::spawn_blocking(move || {
            let searcher = reader.searcher();
            let addresses = searcher.search(&AllQuery, &DocSetCollector)?;
            let mut images = addresses
                .into_iter()
                .map(|address| {
                    let doc = searcher.doc(address)?;
                    Self::from_document(&fields, &doc)
                })
                .collect::<Result<Vec<_>, AppError>>()?;
            images.sort_by_key(|image| image.id);
            Ok(images)
        })
        .await?
    }
}
