//! HTTP-level tests for the images API: status codes, record store effects,
//! and eventual propagation into the search index.

use actix_web::http::{header, StatusCode};
use actix_web::{test, web, App};
use rfid_images::config::SyncConfig;
use rfid_images::images::{ImageCapture, ImageDto};
use rfid_images::search::Searcher;
use rfid_images::search_clients::tantivy::TantivySearcher;
use rfid_images::service::ImageService;
use rfid_images::store::RecordStore;
use rfid_images::sync::SyncBridge;
use rfid_images::web_server;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const ENTITY_API_URL: &str = "/api/images";
const ENTITY_SEARCH_API_URL: &str = "/api/_search/images";
const MERGE_PATCH: &str = "application/merge-patch+json";
const WINDOW: Duration = Duration::from_secs(5);

// =============================================================================
// Test Utilities
// =============================================================================

fn default_body() -> Value {
    json!({
        "guid": "AAAAAAAAAA",
        "plate": "AAAAAAAAAA",
        "imageLp": "AA==",
        "imageLpContentType": "image/jpg",
        "imageThumb": "AA==",
        "imageThumbContentType": "image/jpg",
        "anpr": "AAAAAAAAAA",
        "rfid": "AAAAAAAAAA",
        "dataStatus": "AAAAAAAAAA",
        "gantry": 1,
        "lane": 1,
        "kph": 1,
        "ambush": 1,
        "direction": 1,
        "vehicle": 1,
        "issue": "AAAAAAAAAA",
        "status": "AAAAAAAAAA"
    })
}

fn updated_body(id: i64) -> Value {
    json!({
        "id": id,
        "guid": "BBBBBBBBBB",
        "plate": "BBBBBBBBBB",
        "imageLp": "AQ==",
        "imageLpContentType": "image/png",
        "imageThumb": "AQ==",
        "imageThumbContentType": "image/png",
        "anpr": "BBBBBBBBBB",
        "rfid": "BBBBBBBBBB",
        "dataStatus": "BBBBBBBBBB",
        "gantry": 2,
        "lane": 2,
        "kph": 2,
        "ambush": 2,
        "direction": 2,
        "vehicle": 2,
        "issue": "BBBBBBBBBB",
        "status": "BBBBBBBBBB"
    })
}

fn setup() -> ImageService {
    let store = RecordStore::open_in_memory().expect("in-memory store");
    let searcher: Arc<dyn Searcher> = Arc::new(TantivySearcher::in_memory().expect("in-memory index"));
    let bridge = SyncBridge::new(store.clone(), searcher.clone(), SyncConfig::default());
    bridge.spawn();
    ImageService::new(store, searcher, bridge)
}

macro_rules! app {
    ($service:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($service.clone()))
                .configure(|cfg| web_server::configure(cfg, 1 << 20)),
        )
        .await
    };
}

/// Saves an image and waits until the index has it, like a seeded fixture.
async fn seed(service: &ImageService) -> ImageCapture {
    let dto: ImageDto = serde_json::from_value(default_body()).unwrap();
    let created = service.create(dto).await.unwrap();
    assert!(service.bridge().await_settled(WINDOW).await.unwrap());
    created
}

async fn counts(service: &ImageService) -> (u64, u64) {
    (
        service.store().count().await.unwrap(),
        service.searcher().count_images().await.unwrap(),
    )
}

async fn settle(service: &ImageService) {
    assert!(
        service.bridge().await_settled(WINDOW).await.unwrap(),
        "index did not settle within {:?}",
        WINDOW
    );
}

// =============================================================================
// Create
// =============================================================================

#[actix_web::test]
async fn create_images() {
    let service = setup();
    let app = app!(service);
    let (records_before, indexed_before) = counts(&service).await;

    let req = test::TestRequest::post()
        .uri(ENTITY_API_URL)
        .set_json(default_body())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let location = resp.headers().get(header::LOCATION).unwrap().to_str().unwrap().to_string();
    let created: ImageCapture = test::read_body_json(resp).await;
    assert_eq!(location, format!("{}/{}", ENTITY_API_URL, created.id));

    assert_eq!(service.store().count().await.unwrap(), records_before + 1);
    settle(&service).await;
    assert_eq!(service.searcher().count_images().await.unwrap(), indexed_before + 1);

    let stored = service.find_one(created.id).await.unwrap();
    assert_eq!(stored.guid, "AAAAAAAAAA");
    assert_eq!(stored.image_lp, Some(vec![0]));
    assert_eq!(stored.image_thumb_content_type.as_deref(), Some("image/jpg"));
    assert_eq!(stored.data_status, "AAAAAAAAAA");
    assert_eq!(stored.gantry, 1);
    assert_eq!(stored.vehicle, 1);
    assert_eq!(stored.status.as_deref(), Some("AAAAAAAAAA"));
    assert_eq!(service.searcher().get_image(created.id).await.unwrap(), Some(stored));
}

#[actix_web::test]
async fn create_images_with_existing_id() {
    let service = setup();
    let app = app!(service);
    let before = counts(&service).await;

    let mut body = default_body();
    body["id"] = json!(1);
    let req = test::TestRequest::post().uri(ENTITY_API_URL).set_json(body).to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(counts(&service).await, before);
    assert_eq!(service.store().pending_count().await.unwrap(), 0);
}

#[actix_web::test]
async fn required_fields_are_checked() {
    let service = setup();
    let app = app!(service);

    for field in ["guid", "dataStatus", "gantry", "lane", "vehicle"] {
        let mut body = default_body();
        body[field] = Value::Null;
        let req = test::TestRequest::post().uri(ENTITY_API_URL).set_json(body).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "field {}", field);
        let error: Value = test::read_body_json(resp).await;
        assert_eq!(error["field"], field);
    }

    assert_eq!(counts(&service).await, (0, 0));
}

#[actix_web::test]
async fn malformed_body_is_a_bad_request() {
    let service = setup();
    let app = app!(service);

    let req = test::TestRequest::post()
        .uri(ENTITY_API_URL)
        .insert_header((header::CONTENT_TYPE, "application/json"))
        .set_payload("{\"guid\": ")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// =============================================================================
// Read
// =============================================================================

#[actix_web::test]
async fn get_all_images() {
    let service = setup();
    let app = app!(service);
    let first = seed(&service).await;
    let second = seed(&service).await;

    let req = test::TestRequest::get()
        .uri(&format!("{}?sort=id,desc", ENTITY_API_URL))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("X-Total-Count").unwrap(), "2");

    let list: Vec<Value> = test::read_body_json(resp).await;
    assert_eq!(list.len(), 2);
    assert_eq!(list[0]["id"], second.id);
    assert_eq!(list[1]["id"], first.id);
    for item in &list {
        assert_eq!(item["guid"], "AAAAAAAAAA");
        assert_eq!(item["imageLp"], "AA==");
        assert_eq!(item["imageLpContentType"], "image/jpg");
        assert_eq!(item["imageThumb"], "AA==");
        assert_eq!(item["gantry"], 1);
        assert_eq!(item["issue"], "AAAAAAAAAA");
    }
}

#[actix_web::test]
async fn unknown_sort_field_is_rejected() {
    let service = setup();
    let app = app!(service);

    let req = test::TestRequest::get()
        .uri(&format!("{}?sort=imageLp,asc", ENTITY_API_URL))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn page_past_the_largest_offset_is_rejected() {
    let service = setup();
    let app = app!(service);
    seed(&service).await;

    let req = test::TestRequest::get()
        .uri(&format!("{}?page=5000000000000000000&size=2", ENTITY_API_URL))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn get_images() {
    let service = setup();
    let app = app!(service);
    let image = seed(&service).await;

    let req = test::TestRequest::get()
        .uri(&format!("{}/{}", ENTITY_API_URL, image.id))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["guid"], "AAAAAAAAAA");
    assert_eq!(body["imageThumbContentType"], "image/jpg");
    assert_eq!(body["dataStatus"], "AAAAAAAAAA");
    assert_eq!(body["lane"], 1);
}

#[actix_web::test]
async fn get_non_existing_images() {
    let service = setup();
    let app = app!(service);

    let req = test::TestRequest::get()
        .uri(&format!("{}/{}", ENTITY_API_URL, i64::MAX))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// Full update (PUT)
// =============================================================================

#[actix_web::test]
async fn put_existing_images() {
    let service = setup();
    let app = app!(service);
    let image = seed(&service).await;
    let before = counts(&service).await;

    let req = test::TestRequest::put()
        .uri(&format!("{}/{}", ENTITY_API_URL, image.id))
        .set_json(updated_body(image.id))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let stored = service.find_one(image.id).await.unwrap();
    assert_eq!(stored.guid, "BBBBBBBBBB");
    assert_eq!(stored.image_lp, Some(vec![1]));
    assert_eq!(stored.image_lp_content_type.as_deref(), Some("image/png"));
    assert_eq!(stored.gantry, 2);
    assert_eq!(stored.vehicle, 2);
    assert_eq!(stored.status.as_deref(), Some("BBBBBBBBBB"));
    assert_eq!(service.store().count().await.unwrap(), before.0);

    settle(&service).await;
    assert_eq!(service.searcher().count_images().await.unwrap(), before.1);
    assert_eq!(service.searcher().get_image(image.id).await.unwrap(), Some(stored));
}

#[actix_web::test]
async fn put_non_existing_images() {
    let service = setup();
    let app = app!(service);
    let before = counts(&service).await;

    let req = test::TestRequest::put()
        .uri(&format!("{}/{}", ENTITY_API_URL, 4_000))
        .set_json(updated_body(4_000))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(counts(&service).await, before);
}

#[actix_web::test]
async fn put_with_id_mismatch_images() {
    let service = setup();
    let app = app!(service);
    let image = seed(&service).await;
    let before = counts(&service).await;

    let req = test::TestRequest::put()
        .uri(&format!("{}/{}", ENTITY_API_URL, image.id))
        .set_json(updated_body(image.id + 1))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(counts(&service).await, before);
    assert_eq!(service.find_one(image.id).await.unwrap(), image);
}

#[actix_web::test]
async fn put_with_missing_id_path_param_images() {
    let service = setup();
    let app = app!(service);
    let before = counts(&service).await;

    let req = test::TestRequest::put()
        .uri(ENTITY_API_URL)
        .set_json(updated_body(12))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(counts(&service).await, before);
}

// =============================================================================
// Partial update (PATCH)
// =============================================================================

#[actix_web::test]
async fn partial_update_images_with_patch() {
    let service = setup();
    let app = app!(service);
    let image = seed(&service).await;

    let patch = json!({
        "id": image.id,
        "plate": "BBBBBBBBBB",
        "imageLp": "AQ==",
        "imageLpContentType": "image/png",
        "imageThumb": "AQ==",
        "imageThumbContentType": "image/png",
        "gantry": 2,
        "kph": 2,
        "ambush": 2,
        "direction": 2
    });
    let req = test::TestRequest::patch()
        .uri(&format!("{}/{}", ENTITY_API_URL, image.id))
        .insert_header((header::CONTENT_TYPE, MERGE_PATCH))
        .set_payload(patch.to_string())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let stored = service.find_one(image.id).await.unwrap();
    assert_eq!(stored.guid, "AAAAAAAAAA");
    assert_eq!(stored.plate.as_deref(), Some("BBBBBBBBBB"));
    assert_eq!(stored.image_lp, Some(vec![1]));
    assert_eq!(stored.image_thumb_content_type.as_deref(), Some("image/png"));
    assert_eq!(stored.anpr.as_deref(), Some("AAAAAAAAAA"));
    assert_eq!(stored.rfid.as_deref(), Some("AAAAAAAAAA"));
    assert_eq!(stored.data_status, "AAAAAAAAAA");
    assert_eq!(stored.gantry, 2);
    assert_eq!(stored.lane, 1);
    assert_eq!(stored.kph, Some(2));
    assert_eq!(stored.ambush, Some(2));
    assert_eq!(stored.direction, Some(2));
    assert_eq!(stored.vehicle, 1);
    assert_eq!(stored.issue.as_deref(), Some("AAAAAAAAAA"));
    assert_eq!(stored.status.as_deref(), Some("AAAAAAAAAA"));

    settle(&service).await;
    assert_eq!(service.searcher().get_image(image.id).await.unwrap(), Some(stored));
}

#[actix_web::test]
async fn full_update_images_with_patch() {
    let service = setup();
    let app = app!(service);
    let image = seed(&service).await;

    let req = test::TestRequest::patch()
        .uri(&format!("{}/{}", ENTITY_API_URL, image.id))
        .insert_header((header::CONTENT_TYPE, MERGE_PATCH))
        .set_payload(updated_body(image.id).to_string())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = test::read_body_json(resp).await;
    let mut expected = updated_body(image.id);
    expected["id"] = json!(image.id);
    assert_eq!(body, expected);
}

#[actix_web::test]
async fn patch_non_existing_images() {
    let service = setup();
    let app = app!(service);
    let before = counts(&service).await;

    let req = test::TestRequest::patch()
        .uri(&format!("{}/{}", ENTITY_API_URL, 31))
        .insert_header((header::CONTENT_TYPE, MERGE_PATCH))
        .set_payload(updated_body(31).to_string())
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(counts(&service).await, before);
}

#[actix_web::test]
async fn patch_with_id_mismatch_images() {
    let service = setup();
    let app = app!(service);
    let image = seed(&service).await;

    let req = test::TestRequest::patch()
        .uri(&format!("{}/{}", ENTITY_API_URL, image.id))
        .insert_header((header::CONTENT_TYPE, MERGE_PATCH))
        .set_payload(updated_body(image.id + 5).to_string())
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(service.find_one(image.id).await.unwrap(), image);
}

#[actix_web::test]
async fn patch_with_missing_id_path_param_images() {
    let service = setup();
    let app = app!(service);
    let before = counts(&service).await;

    let req = test::TestRequest::patch()
        .uri(ENTITY_API_URL)
        .insert_header((header::CONTENT_TYPE, MERGE_PATCH))
        .set_payload(updated_body(8).to_string())
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(counts(&service).await, before);
}

// =============================================================================
// Delete
// =============================================================================

#[actix_web::test]
async fn delete_images() {
    let service = setup();
    let app = app!(service);
    seed(&service).await;
    let image = seed(&service).await;
    let (records_before, indexed_before) = counts(&service).await;
    assert_eq!(records_before, indexed_before);

    let req = test::TestRequest::delete()
        .uri(&format!("{}/{}", ENTITY_API_URL, image.id))
        .insert_header((header::ACCEPT, "application/json"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    assert_eq!(service.store().count().await.unwrap(), records_before - 1);
    settle(&service).await;
    assert_eq!(service.searcher().count_images().await.unwrap(), indexed_before - 1);
    assert_eq!(service.searcher().get_image(image.id).await.unwrap(), None);

    let again = test::TestRequest::delete()
        .uri(&format!("{}/{}", ENTITY_API_URL, image.id))
        .to_request();
    assert_eq!(test::call_service(&app, again).await.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// Search
// =============================================================================

#[actix_web::test]
async fn search_images() {
    let service = setup();
    let app = app!(service);
    seed(&service).await;
    let image = seed(&service).await;

    let req = test::TestRequest::get()
        .uri(&format!("{}?query=id:{}", ENTITY_SEARCH_API_URL, image.id))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let found: Vec<ImageCapture> = test::read_body_json(resp).await;
    assert_eq!(found, vec![service.find_one(image.id).await.unwrap()]);
}

#[actix_web::test]
async fn invalid_search_query_is_rejected() {
    let service = setup();
    let app = app!(service);

    let req = test::TestRequest::get()
        .uri(&format!("{}?query=id:abc", ENTITY_SEARCH_API_URL))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// =============================================================================
// Management
// =============================================================================

#[actix_web::test]
async fn management_reports_health_and_sync() {
    let service = setup();
    let app = app!(service);
    seed(&service).await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/management/health").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let health: Value = test::read_body_json(resp).await;
    assert_eq!(health["status"], "UP");
    assert_eq!(health["records"], 1);
    assert_eq!(health["indexed"], 1);
    assert_eq!(health["pendingSync"], 0);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/management/sync").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let status: Value = test::read_body_json(resp).await;
    assert_eq!(status["pending"], 0);
    assert_eq!(status["applied"], 1);

    let req = test::TestRequest::post()
        .uri("/management/sync/reconcile?dryRun=true")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let report: Value = test::read_body_json(resp).await;
    assert_eq!(report, json!({ "checked": 1, "missing": 0, "stale": 0, "orphaned": 0, "repaired": 0, "pending": 0 }));
}
