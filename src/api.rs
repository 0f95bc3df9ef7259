//! REST API for the warehouse classification service.
//!
//! Provides HTTP endpoints for the station frontends: bulk grouping of the
//! live order set, box-fit testing with feedback recording, and progress
//! over the combination space. Uses Axum as the web framework and supports
//! CORS.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Json, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{
    Router,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
#[allow(unused_imports)]
use serde_json::json;
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use utoipa::{OpenApi, ToSchema};

use crate::catalog::{
    BatchReceipt, CatalogClient, CatalogError, CreateBatchRequest, NewFeedback,
};
use crate::classifier::{
    ClassifierConfig, ConfirmationProgress, FeedbackIndex, confirmation_progress, resolve_lines,
    run_sweep_with_progress, suggest_next, test_fit,
};
use crate::combinations::{ComboEntry, Combination, generate_combinations};
use crate::config::{ApiConfig, CatalogConfig, ClassifierSettings, GroupingSettings};
use crate::grouping::{BulkOrderGroup, GroupingConfig, group_orders};
use crate::model::{
    BoxType, ClassifiableItem, Confidence, FeedbackRule, OrderEnvelope, Product, TestResult,
};

#[derive(Clone)]
struct ApiState {
    classifier_config: ClassifierConfig,
    grouping_config: GroupingConfig,
    catalog: CatalogClient,
    combo_cache: Arc<Mutex<Option<ComboCache>>>,
}

static OPENAPI_DOC: OnceLock<utoipa::openapi::OpenApi> = OnceLock::new();

// SRI hashes verified against https://unpkg.com/swagger-ui-dist@5.17.14/ on 2025-10-29.
const SWAGGER_UI_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
    <head>
        <meta charset="utf-8" />
        <title>boxfit API Docs</title>
        <link
            rel="stylesheet"
            href="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui.css"
            integrity="sha384-wxLW6kwyHktdDGr6Pv1zgm/VGJh99lfUbzSn6HNHBENZlCN7W602k9VkGdxuFvPn"
            crossorigin="anonymous"
        />
    </head>
    <body>
        <div id="swagger-ui"></div>
        <script
            src="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui-bundle.js"
            integrity="sha384-wmyclcVGX/WhUkdkATwhaK1X1JtiNrr2EoYJ+diV3vj4v6OC5yCeSu+yW13SYJep"
            crossorigin="anonymous"
        ></script>
        <script
            src="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui-standalone-preset.js"
            integrity="sha384-2YH8WDRaj7V2OqU/trsmzSagmk/E2SutiCsGkdgoQwC9pNUJV1u/141DHB6jgs8t"
            crossorigin="anonymous"
        ></script>
        <script>
            window.onload = function () {
                const ui = SwaggerUIBundle({
                    url: "/docs/openapi.json",
                    dom_id: "#swagger-ui",
                    presets: [SwaggerUIBundle.presets.apis, SwaggerUIStandalonePreset],
                    layout: "StandaloneLayout",
                });
                window.ui = ui;
            };
        </script>
    </body>
    </html>"##;

fn openapi_doc() -> &'static utoipa::openapi::OpenApi {
    OPENAPI_DOC.get_or_init(ApiDoc::openapi)
}

/// Memoized combination space for one catalog + limit constellation.
///
/// Generation is combinatorially expensive; the cache avoids re-running it
/// for every progress or sweep request against an unchanged catalog.
#[derive(Clone)]
struct ComboCache {
    key: ComboCacheKey,
    combinations: Arc<Vec<Combination>>,
}

#[derive(Clone, PartialEq, Eq)]
struct ComboCacheKey {
    products: Vec<(String, u64)>,
    max_qty_per_product: u32,
    max_total_qty: u32,
}

fn combo_cache_key(products: &[Product], config: &ClassifierConfig) -> ComboCacheKey {
    let mut entries: Vec<(String, u64)> = products
        .iter()
        .map(|product| (product.id.clone(), product.volume.to_bits()))
        .collect();
    entries.sort();
    ComboCacheKey {
        products: entries,
        max_qty_per_product: config.max_qty_per_product,
        max_total_qty: config.max_total_qty,
    }
}

fn cached_combinations(
    cache: &Mutex<Option<ComboCache>>,
    products: &[Product],
    config: &ClassifierConfig,
) -> Arc<Vec<Combination>> {
    let key = combo_cache_key(products, config);
    {
        let guard = cache.lock().expect("combination cache lock poisoned");
        if let Some(entry) = guard.as_ref() {
            if entry.key == key {
                return Arc::clone(&entry.combinations);
            }
        }
    }

    let combinations = Arc::new(generate_combinations(
        products,
        config.max_qty_per_product,
        config.max_total_qty,
    ));
    let mut guard = cache.lock().expect("combination cache lock poisoned");
    *guard = Some(ComboCache {
        key,
        combinations: Arc::clone(&combinations),
    });
    combinations
}

/// Request structure for the bulk grouping endpoint.
#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(
    example = json!({
        "orders": [
            {
                "orderNumber": "100234",
                "payload": { "items": [{ "sku": "MUG-11OZ", "name": "Mug", "quantity": 2 }] }
            }
        ],
        "minGroupSize": 4
    })
)]
pub struct BulkGroupRequest {
    pub orders: Vec<OrderEnvelope>,
    #[serde(default)]
    #[schema(nullable = true)]
    pub min_group_size: Option<u32>,
}

/// Response structure with the computed bulk groups.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BulkGroupResponse {
    pub groups: Vec<BulkOrderGroup>,
    pub group_count: usize,
    pub ineligible_orders: usize,
    pub dropped_groups: usize,
}

/// Request structure for the fit-test endpoint.
#[derive(Deserialize, ToSchema)]
#[schema(
    example = json!({
        "items": [
            { "productId": "MUG-11OZ", "quantity": 2 },
            { "productId": "POSTER-A2", "quantity": 1 }
        ]
    })
)]
pub struct FitRequest {
    pub items: Vec<ComboEntry>,
}

/// Response structure for the confirmation-progress endpoint.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProgressResponse {
    pub progress: ConfirmationProgress,
    /// The next untested combination, absent once everything is confirmed.
    pub suggested_next: Option<Combination>,
}

#[derive(Serialize, ToSchema)]
struct ErrorResponse {
    error: String,
    details: String,
}

impl ErrorResponse {
    fn new(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: details.into(),
        }
    }
}

fn error_response(
    status: StatusCode,
    error: impl Into<String>,
    details: impl Into<String>,
) -> Response {
    (status, Json(ErrorResponse::new(error, details))).into_response()
}

fn json_deserialize_error(err: JsonRejection) -> Response {
    error_response(
        StatusCode::UNPROCESSABLE_ENTITY,
        "Invalid JSON data",
        err.to_string(),
    )
}

fn validation_error(details: impl Into<String>) -> Response {
    error_response(
        StatusCode::UNPROCESSABLE_ENTITY,
        "Invalid input data",
        details,
    )
}

fn upstream_error(err: CatalogError) -> Response {
    eprintln!("⚠️ Collaborator call failed: {err}");
    error_response(
        StatusCode::BAD_GATEWAY,
        "Catalog service unavailable",
        err.to_string(),
    )
}

fn parse_json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, Response> {
    match payload {
        Ok(Json(body)) => Ok(body),
        Err(err) => Err(json_deserialize_error(err)),
    }
}

fn effective_grouping_config(
    base: GroupingConfig,
    override_min: Option<u32>,
) -> Result<GroupingConfig, Response> {
    match override_min {
        None => Ok(base),
        Some(0) => Err(validation_error("minGroupSize must be at least 1")),
        Some(min_group_size) => Ok(GroupingConfig { min_group_size }),
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handle_bulk_groups,
        handle_create_batch,
        handle_fit,
        handle_feedback,
        handle_progress,
        handle_sweep
    ),
    components(
        schemas(
            BulkGroupRequest,
            BulkGroupResponse,
            BulkOrderGroup,
            OrderEnvelope,
            ClassifiableItem,
            FitRequest,
            ComboEntry,
            Combination,
            TestResult,
            BoxType,
            Product,
            Confidence,
            NewFeedback,
            FeedbackRule,
            CreateBatchRequest,
            BatchReceipt,
            ProgressResponse,
            ConfirmationProgress,
            ErrorResponse
        )
    ),
    tags(
        (name = "bulk", description = "Bulk grouping of the live order set"),
        (name = "boxtest", description = "Box-fit testing and feedback")
    )
)]
struct ApiDoc;

/// Starts the API server.
///
/// Configures CORS for cross-origin requests from the station frontends.
/// Blocks until the server is terminated.
pub async fn start_api_server(
    config: ApiConfig,
    catalog_config: CatalogConfig,
    classifier_settings: ClassifierSettings,
    grouping_settings: GroupingSettings,
) {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let catalog = match CatalogClient::new(&catalog_config) {
        Ok(client) => client,
        Err(err) => {
            panic!("❌ Could not initialize the catalog client: {}", err);
        }
    };

    let state = ApiState {
        classifier_config: classifier_settings.classifier_config(),
        grouping_config: grouping_settings.grouping_config(),
        catalog,
        combo_cache: Arc::new(Mutex::new(None)),
    };

    let app = Router::new()
        // API endpoints
        .route("/bulk/groups", post(handle_bulk_groups))
        .route("/bulk/batches", post(handle_create_batch))
        .route("/boxtest/fit", post(handle_fit))
        .route("/boxtest/feedback", post(handle_feedback))
        .route("/boxtest/progress", get(handle_progress))
        .route("/boxtest/sweep", post(handle_sweep))
        // API documentation
        .route("/docs/openapi.json", get(serve_openapi_json))
        .route("/docs", get(serve_openapi_ui))
        .layer(cors)
        .with_state(state);

    let addr = config.socket_addr();
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            panic!("❌ Could not bind API server to {}: {}", addr, err);
        }
    };

    let display_host = config.display_host().to_string();
    println!(
        "🚀 Server running on http://{}:{}",
        display_host,
        config.port()
    );
    if config.binds_to_all_interfaces() {
        println!("💡 Local access: http://localhost:{}", config.port());
    }
    println!("📦 API Endpoints:");
    println!("   - POST /bulk/groups");
    println!("   - POST /bulk/batches");
    println!("   - POST /boxtest/fit");
    println!("   - POST /boxtest/feedback");
    println!("   - GET  /boxtest/progress");
    println!("   - POST /boxtest/sweep");
    println!("📑 Documentation:");
    println!("   - GET /docs");
    println!("   - GET /docs/openapi.json");

    if let Err(err) = axum::serve(listener, app).await {
        eprintln!("❌ API server terminated with an error: {err}");
    }
}

/// Handler for POST /bulk/groups.
///
/// Groups the submitted live order set by item signature and computes the
/// bin splits for each qualifying group.
#[utoipa::path(
    post,
    path = "/bulk/groups",
    request_body = BulkGroupRequest,
    responses(
        (status = 200, description = "Computed bulk groups", body = BulkGroupResponse),
        (
            status = UNPROCESSABLE_ENTITY,
            description = "Invalid request",
            body = ErrorResponse
        )
    ),
    tag = "bulk"
)]
async fn handle_bulk_groups(
    State(state): State<ApiState>,
    payload: Result<Json<BulkGroupRequest>, JsonRejection>,
) -> impl IntoResponse {
    let request = match parse_json_body(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let config = match effective_grouping_config(state.grouping_config, request.min_group_size) {
        Ok(config) => config,
        Err(response) => return response,
    };

    println!(
        "📥 New bulk grouping request: {} orders (min group size {})",
        request.orders.len(),
        config.min_group_size
    );
    let summary = group_orders(&request.orders, &config);
    println!(
        "🧺 Result: {} groups, {} orders ineligible, {} groups below minimum",
        summary.group_count(),
        summary.ineligible_orders,
        summary.dropped_groups
    );

    let response = BulkGroupResponse {
        group_count: summary.group_count(),
        ineligible_orders: summary.ineligible_orders,
        dropped_groups: summary.dropped_groups,
        groups: summary.groups,
    };
    (StatusCode::OK, Json(response)).into_response()
}

/// Handler for POST /bulk/batches.
///
/// Forwards a create-batch request for a grouped order set to the batch
/// service. Persistence is entirely the collaborator's concern.
#[utoipa::path(
    post,
    path = "/bulk/batches",
    request_body = CreateBatchRequest,
    responses(
        (status = 200, description = "Batch created by the collaborator", body = BatchReceipt),
        (
            status = UNPROCESSABLE_ENTITY,
            description = "Invalid request",
            body = ErrorResponse
        ),
        (
            status = BAD_GATEWAY,
            description = "Batch service unavailable",
            body = ErrorResponse
        )
    ),
    tag = "bulk"
)]
async fn handle_create_batch(
    State(state): State<ApiState>,
    payload: Result<Json<CreateBatchRequest>, JsonRejection>,
) -> impl IntoResponse {
    let request = match parse_json_body(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    if request.order_numbers.is_empty() {
        return validation_error("orderNumbers must not be empty");
    }

    match state.catalog.create_batch(&request).await {
        Ok(receipt) => {
            println!(
                "🧾 Batch {} created for {} orders",
                receipt.id,
                request.order_numbers.len()
            );
            (StatusCode::OK, Json(receipt)).into_response()
        }
        Err(err) => upstream_error(err),
    }
}

/// Handler for POST /boxtest/fit.
///
/// Tests a product-quantity combination against the box catalog, honoring
/// confirmed feedback for the exact combination signature.
#[utoipa::path(
    post,
    path = "/boxtest/fit",
    request_body = FitRequest,
    responses(
        (status = 200, description = "Fit test result", body = TestResult),
        (
            status = UNPROCESSABLE_ENTITY,
            description = "Invalid request",
            body = ErrorResponse
        ),
        (
            status = BAD_GATEWAY,
            description = "Catalog service unavailable",
            body = ErrorResponse
        )
    ),
    tag = "boxtest"
)]
async fn handle_fit(
    State(state): State<ApiState>,
    payload: Result<Json<FitRequest>, JsonRejection>,
) -> impl IntoResponse {
    let request = match parse_json_body(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    if request.items.is_empty() {
        return validation_error("items must not be empty");
    }

    let snapshot = match state.catalog.fetch_snapshot().await {
        Ok(snapshot) => snapshot,
        Err(err) => return upstream_error(err),
    };

    let lines = match resolve_lines(&request.items, &snapshot.products) {
        Ok(lines) => lines,
        Err(err) => return validation_error(err.to_string()),
    };

    let feedback = FeedbackIndex::from_rules(&snapshot.feedback);
    let result = test_fit(&lines, &snapshot.boxes, &feedback, &state.classifier_config);
    println!(
        "📐 Fit test {}: {:?}",
        result.combo_signature, result.confidence
    );
    (StatusCode::OK, Json(result)).into_response()
}

/// Handler for POST /boxtest/feedback.
///
/// Records an operator confirm/override decision via the box-config store.
#[utoipa::path(
    post,
    path = "/boxtest/feedback",
    request_body = NewFeedback,
    responses(
        (status = 200, description = "Stored feedback rule", body = FeedbackRule),
        (
            status = UNPROCESSABLE_ENTITY,
            description = "Invalid request",
            body = ErrorResponse
        ),
        (
            status = BAD_GATEWAY,
            description = "Catalog service unavailable",
            body = ErrorResponse
        )
    ),
    tag = "boxtest"
)]
async fn handle_feedback(
    State(state): State<ApiState>,
    payload: Result<Json<NewFeedback>, JsonRejection>,
) -> impl IntoResponse {
    let request = match parse_json_body(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    if request.combo_signature.trim().is_empty() {
        return validation_error("comboSignature must not be empty");
    }
    if request.box_id.trim().is_empty() {
        return validation_error("boxId must not be empty");
    }

    match state.catalog.submit_feedback(&request).await {
        Ok(rule) => {
            println!(
                "📝 Feedback recorded for {} (fits: {})",
                rule.combo_signature, rule.fits
            );
            (StatusCode::OK, Json(rule)).into_response()
        }
        Err(err) => upstream_error(err),
    }
}

/// Handler for GET /boxtest/progress.
///
/// Reports how much of the combination space is confirmed and suggests the
/// next untested combination.
#[utoipa::path(
    get,
    path = "/boxtest/progress",
    responses(
        (status = 200, description = "Confirmation progress", body = ProgressResponse),
        (
            status = BAD_GATEWAY,
            description = "Catalog service unavailable",
            body = ErrorResponse
        )
    ),
    tag = "boxtest"
)]
async fn handle_progress(State(state): State<ApiState>) -> impl IntoResponse {
    let snapshot = match state.catalog.fetch_snapshot().await {
        Ok(snapshot) => snapshot,
        Err(err) => return upstream_error(err),
    };

    let combinations = cached_combinations(
        &state.combo_cache,
        &snapshot.products,
        &state.classifier_config,
    );
    let feedback = FeedbackIndex::from_rules(&snapshot.feedback);
    let progress = confirmation_progress(&combinations, &feedback);
    let suggested_next = suggest_next(&combinations, &feedback).cloned();

    let response = ProgressResponse {
        progress,
        suggested_next,
    };
    (StatusCode::OK, Json(response)).into_response()
}

/// Handler for POST /boxtest/sweep (SSE).
///
/// Streams classify events in real-time as Server-Sent Events while every
/// combination is tested against the box catalog. The frontend can render
/// progress live without waiting for the complete result.
#[utoipa::path(
    post,
    path = "/boxtest/sweep",
    responses(
        (
            status = 200,
            description = "Streams classify events in real-time",
            content_type = "text/event-stream",
            body = String
        ),
        (
            status = BAD_GATEWAY,
            description = "Catalog service unavailable",
            body = ErrorResponse
        )
    ),
    tag = "boxtest"
)]
async fn handle_sweep(State(state): State<ApiState>) -> impl IntoResponse {
    let snapshot = match state.catalog.fetch_snapshot().await {
        Ok(snapshot) => snapshot,
        Err(err) => return upstream_error(err),
    };

    let (tx, rx) = mpsc::channel::<String>(32);
    let config = state.classifier_config;

    tokio::task::spawn_blocking(move || {
        let feedback = FeedbackIndex::from_rules(&snapshot.feedback);
        let _ = run_sweep_with_progress(
            &snapshot.products,
            &snapshot.boxes,
            &feedback,
            &config,
            |event| {
                if let Ok(json) = serde_json::to_string(event) {
                    if tx.blocking_send(json).is_err() {
                        // Receiver has closed the stream; remaining events are discarded.
                        return;
                    }
                }
            },
        );
    });

    let stream = ReceiverStream::new(rx)
        .map(|msg| Ok::<_, std::convert::Infallible>(Event::default().data(msg)));
    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(std::time::Duration::from_secs(10))
                .text("keep-alive"),
        )
        .into_response()
}

async fn serve_openapi_json(State(_state): State<ApiState>) -> impl IntoResponse {
    Json(openapi_doc())
}

async fn serve_openapi_ui(State(_state): State<ApiState>) -> impl IntoResponse {
    Html(SWAGGER_UI_HTML)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_doc_lists_expected_paths() {
        let doc = openapi_doc();
        let paths = &doc.paths.paths;
        for path in [
            "/bulk/groups",
            "/bulk/batches",
            "/boxtest/fit",
            "/boxtest/feedback",
            "/boxtest/progress",
            "/boxtest/sweep",
        ] {
            assert!(
                paths.contains_key(path),
                "OpenAPI documentation is missing the {} path",
                path
            );
        }
    }

    #[test]
    fn openapi_doc_contains_key_schemas() {
        let doc = openapi_doc();
        let components = doc
            .components
            .as_ref()
            .expect("OpenAPI documentation contains no components");
        let schemas = &components.schemas;
        for name in ["BulkGroupRequest", "FitRequest", "TestResult", "ErrorResponse"] {
            assert!(
                schemas.contains_key(name),
                "Expected schema '{}' is missing from OpenAPI spec",
                name
            );
        }
    }

    #[test]
    fn bulk_group_request_parses_min_group_size_variants() {
        let with_value: BulkGroupRequest = serde_json::from_value(json!({
            "orders": [],
            "minGroupSize": 3
        }))
        .expect("Should parse valid JSON");
        assert_eq!(with_value.min_group_size, Some(3));

        let absent: BulkGroupRequest =
            serde_json::from_value(json!({ "orders": [] })).expect("Should parse valid JSON");
        assert_eq!(absent.min_group_size, None);

        let null: BulkGroupRequest = serde_json::from_value(json!({
            "orders": [],
            "minGroupSize": null
        }))
        .expect("Should parse valid JSON");
        assert_eq!(null.min_group_size, None);
    }

    #[test]
    fn fit_request_parses_camel_case_items() {
        let request: FitRequest = serde_json::from_value(json!({
            "items": [{ "productId": "P1", "quantity": 2 }]
        }))
        .expect("Should parse valid JSON");
        assert_eq!(request.items.len(), 1);
        assert_eq!(request.items[0].product_id, "P1");
        assert_eq!(request.items[0].quantity, 2);
    }

    #[test]
    fn grouping_override_replaces_the_configured_minimum() {
        let base = GroupingConfig { min_group_size: 4 };

        let unchanged = effective_grouping_config(base, None).unwrap();
        assert_eq!(unchanged.min_group_size, 4);

        let overridden = effective_grouping_config(base, Some(2)).unwrap();
        assert_eq!(overridden.min_group_size, 2);

        assert!(effective_grouping_config(base, Some(0)).is_err());
    }

    #[test]
    fn combination_cache_is_reused_until_the_catalog_changes() {
        let cache = Mutex::new(None);
        let config = ClassifierConfig::builder()
            .max_qty_per_product(2)
            .max_total_qty(2)
            .build();
        let products = vec![Product {
            id: "P1".to_string(),
            name: "Widget".to_string(),
            volume: 10.0,
            category: None,
        }];

        let first = cached_combinations(&cache, &products, &config);
        let second = cached_combinations(&cache, &products, &config);
        assert!(Arc::ptr_eq(&first, &second), "cache entry should be reused");

        let mut changed = products.clone();
        changed[0].volume = 12.0;
        let third = cached_combinations(&cache, &changed, &config);
        assert!(!Arc::ptr_eq(&first, &third), "changed catalog must regenerate");
        assert_eq!(first.len(), third.len());
    }
}
