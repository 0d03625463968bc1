use crate::error::AppError;
use crate::images::{ImageCapture, ImageDto, NewImage};
use crate::pagination::PageRequest;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = "id, guid, plate, image_lp, image_lp_content_type, image_thumb, \
     image_thumb_content_type, anpr, rfid, data_status, gantry, lane, kph, ambush, direction, \
     vehicle, issue, status";

/// A change waiting to be applied to the search index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOp {
    /// Snapshot of the row as it was committed.
    Upsert(ImageCapture),
    Delete,
}

impl IndexOp {
    fn kind(&self) -> &'static str {
        match self {
            IndexOp::Upsert(_) => "upsert",
            IndexOp::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutboxEntry {
    pub seq: i64,
    pub image_id: i64,
    pub op: IndexOp,
    pub attempts: u32,
}

/// The authoritative record store: an `images` table plus the
/// `index_outbox` table that every write appends to in the same transaction.
#[derive(Clone)]
pub struct RecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl RecordStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
                log::debug!("Created database directory: {:?}", parent);
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        log::info!("Record store opened at {:?}", path);
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, AppError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, AppError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS images (
                id                        INTEGER PRIMARY KEY AUTOINCREMENT,
                guid                      TEXT NOT NULL,
                plate                     TEXT,
                image_lp                  BLOB,
                image_lp_content_type     TEXT,
                image_thumb               BLOB,
                image_thumb_content_type  TEXT,
                anpr                      TEXT,
                rfid                      TEXT,
                data_status               TEXT NOT NULL,
                gantry                    INTEGER NOT NULL,
                lane                      INTEGER NOT NULL,
                kph                       INTEGER,
                ambush                    INTEGER,
                direction                 INTEGER,
                vehicle                   INTEGER NOT NULL,
                issue                     TEXT,
                status                    TEXT
            );

            CREATE TABLE IF NOT EXISTS index_outbox (
                seq           INTEGER PRIMARY KEY AUTOINCREMENT,
                image_id      INTEGER NOT NULL,
                op            TEXT NOT NULL,
                payload       TEXT,
                attempts      INTEGER NOT NULL DEFAULT 0,
                last_error    TEXT,
                enqueued_at   INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_index_outbox_image_id
                ON index_outbox(image_id);",
        )?;
        log::debug!("Record store schema initialized");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn with_conn<F, T>(&self, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&mut Connection) -> Result<T, AppError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| AppError::Generic("record store connection lock poisoned".into()))?;
            f(&mut *guard)
        })
        .await?
    }

    /// Inserts a row and queues its index upsert atomically.
    pub async fn insert(&self, image: NewImage) -> Result<ImageCapture, AppError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO images (guid, plate, image_lp, image_lp_content_type, image_thumb,
                    image_thumb_content_type, anpr, rfid, data_status, gantry, lane, kph, ambush,
                    direction, vehicle, issue, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                params![
                    image.guid,
                    image.plate,
                    image.image_lp,
                    image.image_lp_content_type,
                    image.image_thumb,
                    image.image_thumb_content_type,
                    image.anpr,
                    image.rfid,
                    image.data_status,
                    image.gantry,
                    image.lane,
                    image.kph,
                    image.ambush,
                    image.direction,
                    image.vehicle,
                    image.issue,
                    image.status,
                ],
            )?;
            let created = image.with_id(tx.last_insert_rowid());
            enqueue(&tx, created.id, &IndexOp::Upsert(created.clone()))?;
            tx.commit()?;
            log::debug!("Inserted image {}", created.id);
            Ok(created)
        })
        .await
    }

    /// Full replace of an existing row. Fails with `UpdateTargetNotFound`
    /// if the row is gone.
    pub async fn update(&self, image: ImageCapture) -> Result<ImageCapture, AppError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            write_row(&tx, &image)?;
            enqueue(&tx, image.id, &IndexOp::Upsert(image.clone()))?;
            tx.commit()?;
            log::debug!("Updated image {}", image.id);
            Ok(image)
        })
        .await
    }

    /// Read-merge-write inside one transaction.
    pub async fn patch(&self, id: i64, patch: ImageDto) -> Result<ImageCapture, AppError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let mut image = select_one(&tx, id)?.ok_or(AppError::UpdateTargetNotFound(id))?;
            image.merge(patch);
            write_row(&tx, &image)?;
            enqueue(&tx, id, &IndexOp::Upsert(image.clone()))?;
            tx.commit()?;
            log::debug!("Patched image {}", id);
            Ok(image)
        })
        .await
    }

    /// Deletes a row and queues its index removal. Returns `false` (and
    /// queues nothing) when the row did not exist.
    pub async fn delete(&self, id: i64) -> Result<bool, AppError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute("DELETE FROM images WHERE id = ?1", params![id])?;
            if removed == 0 {
                return Ok(false);
            }
            enqueue(&tx, id, &IndexOp::Delete)?;
            tx.commit()?;
            log::debug!("Deleted image {}", id);
            Ok(true)
        })
        .await
    }

    pub async fn find_one(&self, id: i64) -> Result<Option<ImageCapture>, AppError> {
        self.with_conn(move |conn| Ok(select_one(conn, id)?)).await
    }

    pub async fn exists(&self, id: i64) -> Result<bool, AppError> {
        self.with_conn(move |conn| {
            let found: Option<i64> = conn
                .query_row("SELECT 1 FROM images WHERE id = ?1", params![id], |row| row.get(0))
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    pub async fn find_page(&self, page: PageRequest) -> Result<Vec<ImageCapture>, AppError> {
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM images ORDER BY {} LIMIT ?1 OFFSET ?2",
                SELECT_COLUMNS,
                page.order_by()
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![page.size as i64, page.offset()], row_to_image)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    /// Every row, ordered by id. Used by reconciliation.
    pub async fn find_all(&self) -> Result<Vec<ImageCapture>, AppError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {} FROM images ORDER BY id", SELECT_COLUMNS))?;
            let rows = stmt.query_map([], row_to_image)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    pub async fn count(&self) -> Result<u64, AppError> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
    }

    /// Oldest outbox entries first.
    pub async fn pending_ops(&self, limit: usize) -> Result<Vec<OutboxEntry>, AppError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT seq, image_id, op, payload, attempts FROM index_outbox ORDER BY seq LIMIT ?1",
            )?;
            let raw = stmt
                .query_map(params![limit as i64], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, u32>(4)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            raw.into_iter()
                .map(|(seq, image_id, kind, payload, attempts)| {
                    let op = match (kind.as_str(), payload) {
                        ("upsert", Some(payload)) => IndexOp::Upsert(serde_json::from_str(&payload)?),
                        ("delete", _) => IndexOp::Delete,
                        (other, _) => {
                            return Err(AppError::Generic(format!(
                                "outbox entry {} has unknown op '{}'",
                                seq, other
                            )))
                        }
                    };
                    Ok(OutboxEntry {
                        seq,
                        image_id,
                        op,
                        attempts,
                    })
                })
                .collect()
        })
        .await
    }

    /// Removes an applied entry from the outbox.
    pub async fn ack(&self, seq: i64) -> Result<(), AppError> {
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM index_outbox WHERE seq = ?1", params![seq])?;
            Ok(())
        })
        .await
    }

    pub async fn record_failure(&self, seq: i64, reason: String) -> Result<(), AppError> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE index_outbox SET attempts = attempts + 1, last_error = ?2 WHERE seq = ?1",
                params![seq, reason],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn pending_count(&self) -> Result<u64, AppError> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM index_outbox", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
    }

    /// Ids that still have index changes queued.
    pub async fn pending_image_ids(&self) -> Result<HashSet<i64>, AppError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT DISTINCT image_id FROM index_outbox")?;
            let ids = stmt.query_map([], |row| row.get(0))?;
            Ok(ids.collect::<Result<HashSet<i64>, _>>()?)
        })
        .await
    }

    /// Milliseconds since the oldest pending entry was queued.
    pub async fn oldest_pending_age_ms(&self) -> Result<Option<i64>, AppError> {
        self.with_conn(|conn| {
            let oldest: Option<i64> =
                conn.query_row("SELECT MIN(enqueued_at) FROM index_outbox", [], |row| row.get(0))?;
            Ok(oldest.map(|at| (Utc::now().timestamp_millis() - at).max(0)))
        })
        .await
    }

    /// Writes a row without queueing an index change, leaving the index
    /// behind on purpose.
    #[cfg(test)]
    pub(crate) async fn insert_unsynced(&self, image: NewImage) -> Result<ImageCapture, AppError> {
        let created = self.insert(image).await?;
        let id = created.id;
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM index_outbox WHERE image_id = ?1", params![id])?;
            Ok(())
        })
        .await?;
        Ok(created)
    }
}

fn enqueue(tx: &Transaction<'_>, image_id: i64, op: &IndexOp) -> Result<(), AppError> {
    let payload = match op {
        IndexOp::Upsert(image) => Some(serde_json::to_string(image)?),
        IndexOp::Delete => None,
    };
    tx.execute(
        "INSERT INTO index_outbox (image_id, op, payload, enqueued_at) VALUES (?1, ?2, ?3, ?4)",
        params![image_id, op.kind(), payload, Utc::now().timestamp_millis()],
    )?;
    log::trace!("Queued index {} for image {}", op.kind(), image_id);
    Ok(())
}

fn write_row(tx: &Transaction<'_>, image: &ImageCapture) -> Result<(), AppError> {
    let changed = tx.execute(
        "UPDATE images SET guid = ?2, plate = ?3, image_lp = ?4, image_lp_content_type = ?5,
            image_thumb = ?6, image_thumb_content_type = ?7, anpr = ?8, rfid = ?9,
            data_status = ?10, gantry = ?11, lane = ?12, kph = ?13, ambush = ?14,
            direction = ?15, vehicle = ?16, issue = ?17, status = ?18
         WHERE id = ?1",
        params![
            image.id,
            image.guid,
            image.plate,
            image.image_lp,
            image.image_lp_content_type,
            image.image_thumb,
            image.image_thumb_content_type,
            image.anpr,
            image.rfid,
            image.data_status,
            image.gantry,
            image.lane,
            image.kph,
            image.ambush,
            image.direction,
            image.vehicle,
            image.issue,
            image.status,
        ],
    )?;
    if changed == 0 {
        return Err(AppError::UpdateTargetNotFound(image.id));
    }
    Ok(())
}

fn select_one(conn: &Connection, id: i64) -> rusqlite::Result<Option<ImageCapture>> {
    conn.query_row(
        &format!("SELECT {} FROM images WHERE id = ?1", SELECT_COLUMNS),
        params![id],
        row_to_image,
    )
    .optional()
}

fn row_to_image(row: &Row<'_>) -> rusqlite::Result<ImageCapture> {
    Ok(ImageCapture {
        id: row.get(0)?,
        guid: row.get(1)?,
        plate: row.get(2)?,
        image_lp: row.get(3)?,
        image_lp_content_type: row.get(4)?,
        image_thumb: row.get(5)?,
        image_thumb_content_type: row.get(6)?,
        anpr: row.get(7)?,
        rfid: row.get(8)?,
        data_status: row.get(9)?,
        gantry: row.get(10)?,
        lane: row.get(11)?,
        kph: row.get(12)?,
        ambush: row.get(13)?,
        direction: row.get(14)?,
        vehicle: row.get(15)?,
        issue: row.get(16)?,
        status: row.get(17)?,
    })
}
