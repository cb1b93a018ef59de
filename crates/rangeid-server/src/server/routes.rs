use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
};
use rangeid::{
    AppId, MemoryStore, ObjectIdService, ObjectType, PoolId, Range, RecordView,
    engine::{
        Allocation, AllocationRequest, JoinPoolRequest, PoolJoined, PoolLeft, RangesDeclared,
        SyncMode, SyncOutcome, SyncRequest,
    },
    store::Page,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::server::{
    error::{ApiError, Result},
    extract::{ApiJson, ApiQuery},
};

pub type Service = ObjectIdService<MemoryStore>;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    service: Arc<Service>,
    max_quantity: i64,
}

impl AppState {
    pub fn new(service: Service, max_quantity: i64) -> Self {
        Self {
            service: Arc::new(service),
            max_quantity,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AllocateBody {
    #[serde(rename = "type", alias = "objectType")]
    object_type: ObjectType,
    #[serde(default)]
    quantity: Option<i64>,
    #[serde(default)]
    from_range: Option<Range>,
    #[serde(default)]
    user: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RangesBody {
    ranges: Vec<Range>,
    #[serde(default)]
    user: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConsumptionBody {
    ids: BTreeMap<ObjectType, BTreeSet<u64>>,
    #[serde(default)]
    user: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeaveBody {
    app_id: AppId,
    #[serde(default)]
    user: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListParams {
    token: Option<String>,
    limit: Option<usize>,
}

/// Builds the HTTP router over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/apps/{app_id}", get(read_record).delete(delete_app))
        .route("/v1/apps/{app_id}/allocate", post(allocate))
        .route("/v1/apps/{app_id}/ranges", put(declare_ranges))
        .route(
            "/v1/apps/{app_id}/consumption",
            post(replace_consumption).patch(merge_consumption),
        )
        .route("/v1/pools/join", post(join_pool))
        .route("/v1/pools/leave", post(leave_pool))
        .route("/v1/pools/{pool_id}", delete(delete_pool))
        .route("/v1/admin/documents", get(list_documents))
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn allocate(
    State(state): State<AppState>,
    Path(app_id): Path<String>,
    ApiJson(body): ApiJson<AllocateBody>,
) -> Result<Json<Allocation>> {
    if let Some(quantity) = body.quantity.filter(|&q| q > state.max_quantity) {
        return Err(ApiError::QuantityLimit {
            quantity,
            limit: state.max_quantity,
        });
    }

    let request = AllocationRequest {
        app_id: AppId::new(app_id)?,
        object_type: body.object_type,
        quantity: body.quantity,
        from_range: body.from_range,
        user: body.user,
    };
    Ok(Json(state.service.allocate(&request).await?))
}

async fn declare_ranges(
    State(state): State<AppState>,
    Path(app_id): Path<String>,
    ApiJson(body): ApiJson<RangesBody>,
) -> Result<Json<RangesDeclared>> {
    let app_id = AppId::new(app_id)?;
    let declared = state
        .service
        .declare_ranges(&app_id, &body.ranges, body.user.as_deref())
        .await?;
    Ok(Json(declared))
}

async fn merge_consumption(
    state: State<AppState>,
    app_id: Path<String>,
    body: ApiJson<ConsumptionBody>,
) -> Result<Json<SyncOutcome>> {
    sync(state, app_id, body, SyncMode::Merge).await
}

async fn replace_consumption(
    state: State<AppState>,
    app_id: Path<String>,
    body: ApiJson<ConsumptionBody>,
) -> Result<Json<SyncOutcome>> {
    sync(state, app_id, body, SyncMode::Replace).await
}

async fn sync(
    State(state): State<AppState>,
    Path(app_id): Path<String>,
    ApiJson(body): ApiJson<ConsumptionBody>,
    mode: SyncMode,
) -> Result<Json<SyncOutcome>> {
    let request = SyncRequest {
        app_id: AppId::new(app_id)?,
        ids: body.ids,
        mode,
        user: body.user,
    };
    Ok(Json(state.service.sync(&request).await?))
}

async fn read_record(
    State(state): State<AppState>,
    Path(app_id): Path<String>,
) -> Result<Json<RecordView>> {
    let app_id = AppId::new(app_id)?;
    Ok(Json(state.service.record(&app_id).await?))
}

async fn delete_app(State(state): State<AppState>, Path(app_id): Path<String>) -> Result<StatusCode> {
    state.service.delete_app(&AppId::new(app_id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn join_pool(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<JoinPoolRequest>,
) -> Result<Json<PoolJoined>> {
    Ok(Json(state.service.join_pool(&request).await?))
}

async fn leave_pool(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<LeaveBody>,
) -> Result<Json<PoolLeft>> {
    let left = state
        .service
        .leave_pool(&body.app_id, body.user.as_deref())
        .await?;
    Ok(Json(left))
}

async fn delete_pool(
    State(state): State<AppState>,
    Path(pool_id): Path<String>,
) -> Result<StatusCode> {
    state.service.delete_pool(&PoolId::new(pool_id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_documents(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<ListParams>,
) -> Result<Json<Page>> {
    let page = state
        .service
        .list(params.token.as_deref(), params.limit.unwrap_or(usize::MAX))
        .await?;
    Ok(Json(page))
}
