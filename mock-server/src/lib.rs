//! In-memory block storage service used by the client's integration tests.
//!
//! Serves volumes, hosts, snapshots, certificates and S3 credentials under
//! `/v1`. Collections paginate with `limit`/`start`; the `start` cursor is
//! the id of the first item of the requested page. `MockOptions` injects
//! latency and transient failures in front of every route.

pub mod model;

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{
    body::Bytes,
    extract::{Path, Query, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use model::{
    Certificate, CreateHost, CreateSnapshot, CreateVolume, Credential, ErrorBody, ErrorDetail,
    Host, Link, Reference, Rename, Snapshot, UpdateVolume, Volume, VolumeMapping,
};

pub const API_PREFIX: &str = "/v1";
pub const DEFAULT_LIMIT: usize = 50;
pub const MAX_LIMIT: usize = 100;

const PEM_HEADER: &[u8] = b"-----BEGIN CERTIFICATE-----";

#[derive(Default)]
pub struct Store {
    volumes: Vec<Volume>,
    hosts: Vec<Host>,
    snapshots: Vec<Snapshot>,
    certificates: BTreeMap<String, Certificate>,
    credentials: BTreeMap<String, Credential>,
}

pub type Db = Arc<RwLock<Store>>;

/// Fault injection applied before routing.
#[derive(Clone, Debug)]
pub struct MockOptions {
    /// Delay added to every request.
    pub latency: Duration,
    /// Number of initial requests answered with `failure_status`.
    pub fail_first: usize,
    pub failure_status: StatusCode,
    /// `Retry-After` seconds sent with injected failures.
    pub retry_after: Option<u64>,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            latency: Duration::ZERO,
            fail_first: 0,
            failure_status: StatusCode::SERVICE_UNAVAILABLE,
            retry_after: None,
        }
    }
}

struct Faults {
    options: MockOptions,
    seen: AtomicUsize,
}

pub fn app() -> Router {
    app_with(MockOptions::default())
}

pub fn app_with(options: MockOptions) -> Router {
    let db: Db = Arc::new(RwLock::new(Store::default()));
    let api = Router::new()
        .route("/volumes", get(list_volumes).post(create_volume))
        .route(
            "/volumes/{id}",
            get(get_volume).patch(update_volume).delete(delete_volume),
        )
        .route("/hosts", get(list_hosts).post(create_host))
        .route(
            "/hosts/{id}",
            get(get_host).patch(update_host).delete(delete_host),
        )
        .route("/snapshots", get(list_snapshots).post(create_snapshot))
        .route(
            "/snapshots/{id}",
            get(get_snapshot).patch(update_snapshot).delete(delete_snapshot),
        )
        .route("/certificates", get(list_certificates))
        .route(
            "/certificates/{name}",
            get(get_certificate)
                .post(create_certificate)
                .put(replace_certificate)
                .delete(delete_certificate),
        )
        .route("/s3_credentials", get(list_credentials))
        .route(
            "/s3_credentials/{access_key}",
            put(create_credential).delete(delete_credential),
        )
        .with_state(db);

    let faults = Arc::new(Faults {
        options,
        seen: AtomicUsize::new(0),
    });
    Router::new()
        .nest(API_PREFIX, api)
        .layer(middleware::from_fn_with_state(faults, inject_faults))
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    run_with(listener, MockOptions::default()).await
}

pub async fn run_with(listener: TcpListener, options: MockOptions) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with(options)).await
}

async fn inject_faults(State(faults): State<Arc<Faults>>, request: Request, next: Next) -> Response {
    if !faults.options.latency.is_zero() {
        tokio::time::sleep(faults.options.latency).await;
    }
    let seen = faults.seen.fetch_add(1, Ordering::SeqCst);
    if seen < faults.options.fail_first {
        warn!(request = seen + 1, path = %request.uri().path(), "injecting failure");
        let mut response = ApiFailure::new(
            faults.options.failure_status,
            "service_unavailable",
            "injected failure",
        )
        .into_response();
        if let Some(secs) = faults.options.retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        return response;
    }
    next.run(request).await
}

// ---------------------------------------------------------------------------
// Errors and pagination
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ApiFailure {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiFailure {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn not_found(kind: &str, id: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", format!("{kind} {id} not found"))
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "conflict", message)
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let trace = Uuid::new_v4().to_string();
        let body = ErrorBody {
            errors: vec![ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            }],
            trace: trace.clone(),
        };
        (self.status, [("x-request-id", trace)], Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiFailure>;

fn page_limit(params: &HashMap<String, String>) -> ApiResult<usize> {
    match params.get("limit") {
        None => Ok(DEFAULT_LIMIT),
        Some(raw) => match raw.parse::<usize>() {
            Ok(0) | Err(_) => Err(ApiFailure::bad_request(format!("invalid limit '{raw}'"))),
            Ok(limit) => Ok(limit.min(MAX_LIMIT)),
        },
    }
}

/// One page of `items`, starting at the item whose id equals `start`.
fn paginate<T: Serialize>(
    resource: &str,
    items: &[T],
    id_of: impl Fn(&T) -> &str,
    params: &HashMap<String, String>,
) -> ApiResult<Json<Value>> {
    let limit = page_limit(params)?;
    let offset = match params.get("start").filter(|s| !s.is_empty()) {
        None => 0,
        Some(start) => items
            .iter()
            .position(|item| id_of(item) == start.as_str())
            .ok_or_else(|| ApiFailure::bad_request(format!("invalid start '{start}'")))?,
    };
    let end = (offset + limit).min(items.len());

    let mut body = Map::new();
    let first = Link {
        href: format!("{API_PREFIX}/{resource}?limit={limit}"),
    };
    body.insert("first".to_string(), json(&first)?);
    if end < items.len() {
        let next = Link {
            href: format!(
                "{API_PREFIX}/{resource}?limit={limit}&start={}",
                id_of(&items[end])
            ),
        };
        body.insert("next".to_string(), json(&next)?);
    }
    body.insert("limit".to_string(), Value::from(limit));
    body.insert("total_count".to_string(), Value::from(items.len()));
    body.insert(resource.to_string(), json(&items[offset..end])?);
    Ok(Json(Value::Object(body)))
}

fn json<T: Serialize + ?Sized>(value: &T) -> ApiResult<Value> {
    serde_json::to_value(value)
        .map_err(|e| ApiFailure::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", e.to_string()))
}

fn filter_name<'a>(params: &'a HashMap<String, String>) -> Option<&'a str> {
    params.get("name").map(String::as_str)
}

fn require_name(name: &str) -> ApiResult<()> {
    if name.trim().is_empty() {
        return Err(ApiFailure::bad_request("name must not be empty"));
    }
    Ok(())
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

// ---------------------------------------------------------------------------
// Volumes
// ---------------------------------------------------------------------------

async fn list_volumes(
    State(db): State<Db>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let store = db.read().await;
    let volumes: Vec<&Volume> = store
        .volumes
        .iter()
        .filter(|v| filter_name(&params).map_or(true, |name| v.name == name))
        .collect();
    paginate("volumes", &volumes, |v| v.id.as_str(), &params)
}

async fn create_volume(
    State(db): State<Db>,
    Json(input): Json<CreateVolume>,
) -> ApiResult<(StatusCode, Json<Volume>)> {
    require_name(&input.name)?;
    if input.capacity <= 0 {
        return Err(ApiFailure::bad_request("capacity must be positive"));
    }
    let mut store = db.write().await;
    if let Some(source) = &input.source_snapshot {
        if !store.snapshots.iter().any(|s| s.id == source.id) {
            return Err(ApiFailure::bad_request(format!(
                "source snapshot {} does not exist",
                source.id
            )));
        }
    }
    let id = new_id();
    let volume = Volume {
        href: format!("{API_PREFIX}/volumes/{id}"),
        id,
        name: input.name,
        capacity: input.capacity,
        status: "available".to_string(),
        source_snapshot: input.source_snapshot,
    };
    debug!(id = %volume.id, name = %volume.name, "created volume");
    store.volumes.push(volume.clone());
    Ok((StatusCode::CREATED, Json(volume)))
}

async fn get_volume(State(db): State<Db>, Path(id): Path<String>) -> ApiResult<Json<Volume>> {
    let store = db.read().await;
    store
        .volumes
        .iter()
        .find(|v| v.id == id)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiFailure::not_found("volume", &id))
}

async fn update_volume(
    State(db): State<Db>,
    Path(id): Path<String>,
    Json(input): Json<UpdateVolume>,
) -> ApiResult<Json<Volume>> {
    let mut store = db.write().await;
    let volume = store
        .volumes
        .iter_mut()
        .find(|v| v.id == id)
        .ok_or_else(|| ApiFailure::not_found("volume", &id))?;
    if let Some(capacity) = input.capacity {
        if capacity < volume.capacity {
            return Err(ApiFailure::bad_request("capacity cannot shrink"));
        }
        volume.capacity = capacity;
    }
    if let Some(name) = input.name {
        require_name(&name)?;
        volume.name = name;
    }
    Ok(Json(volume.clone()))
}

async fn delete_volume(State(db): State<Db>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    let mut store = db.write().await;
    let index = store
        .volumes
        .iter()
        .position(|v| v.id == id)
        .ok_or_else(|| ApiFailure::not_found("volume", &id))?;
    let mapped = store
        .hosts
        .iter()
        .any(|h| h.volume_mappings.iter().any(|m| m.volume.id == id));
    if mapped {
        return Err(ApiFailure::conflict(format!("volume {id} is mapped to a host")));
    }
    store.volumes.remove(index);
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Hosts
// ---------------------------------------------------------------------------

async fn list_hosts(
    State(db): State<Db>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let store = db.read().await;
    let hosts: Vec<&Host> = store
        .hosts
        .iter()
        .filter(|h| filter_name(&params).map_or(true, |name| h.name == name))
        .collect();
    paginate("hosts", &hosts, |h| h.id.as_str(), &params)
}

async fn create_host(
    State(db): State<Db>,
    Json(input): Json<CreateHost>,
) -> ApiResult<(StatusCode, Json<Host>)> {
    require_name(&input.name)?;
    if input.nqn.trim().is_empty() {
        return Err(ApiFailure::bad_request("nqn must not be empty"));
    }
    let mut store = db.write().await;
    let mut mappings = Vec::with_capacity(input.volume_mappings.len());
    for proto in input.volume_mappings {
        let volume = store
            .volumes
            .iter()
            .find(|v| v.id == proto.volume.id)
            .ok_or_else(|| ApiFailure::bad_request(format!("volume {} does not exist", proto.volume.id)))?;
        mappings.push(VolumeMapping {
            id: new_id(),
            status: "attached".to_string(),
            volume: Reference {
                id: volume.id.clone(),
                name: Some(volume.name.clone()),
            },
        });
    }
    let id = new_id();
    let host = Host {
        href: format!("{API_PREFIX}/hosts/{id}"),
        id,
        name: input.name,
        nqn: input.nqn,
        volume_mappings: mappings,
    };
    debug!(id = %host.id, mappings = host.volume_mappings.len(), "created host");
    store.hosts.push(host.clone());
    Ok((StatusCode::CREATED, Json(host)))
}

async fn get_host(State(db): State<Db>, Path(id): Path<String>) -> ApiResult<Json<Host>> {
    let store = db.read().await;
    store
        .hosts
        .iter()
        .find(|h| h.id == id)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiFailure::not_found("host", &id))
}

async fn update_host(
    State(db): State<Db>,
    Path(id): Path<String>,
    Json(input): Json<Rename>,
) -> ApiResult<Json<Host>> {
    let mut store = db.write().await;
    let host = store
        .hosts
        .iter_mut()
        .find(|h| h.id == id)
        .ok_or_else(|| ApiFailure::not_found("host", &id))?;
    if let Some(name) = input.name {
        require_name(&name)?;
        host.name = name;
    }
    Ok(Json(host.clone()))
}

async fn delete_host(State(db): State<Db>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    let mut store = db.write().await;
    let before = store.hosts.len();
    store.hosts.retain(|h| h.id != id);
    if store.hosts.len() == before {
        return Err(ApiFailure::not_found("host", &id));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

async fn list_snapshots(
    State(db): State<Db>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let store = db.read().await;
    let source = params.get("source_volume.id");
    let snapshots: Vec<&Snapshot> = store
        .snapshots
        .iter()
        .filter(|s| filter_name(&params).map_or(true, |name| s.name == name))
        .filter(|s| source.map_or(true, |id| &s.source_volume.id == id))
        .collect();
    paginate("snapshots", &snapshots, |s| s.id.as_str(), &params)
}

async fn create_snapshot(
    State(db): State<Db>,
    Json(input): Json<CreateSnapshot>,
) -> ApiResult<(StatusCode, Json<Snapshot>)> {
    let mut store = db.write().await;
    let volume = store
        .volumes
        .iter()
        .find(|v| v.id == input.source_volume.id)
        .ok_or_else(|| {
            ApiFailure::bad_request(format!("volume {} does not exist", input.source_volume.id))
        })?;
    let id = new_id();
    let snapshot = Snapshot {
        href: format!("{API_PREFIX}/snapshots/{id}"),
        name: input.name.unwrap_or_else(|| format!("{}-snap", volume.name)),
        id,
        size: volume.capacity,
        lifecycle_state: "stable".to_string(),
        source_volume: Reference {
            id: volume.id.clone(),
            name: Some(volume.name.clone()),
        },
    };
    store.snapshots.push(snapshot.clone());
    Ok((StatusCode::CREATED, Json(snapshot)))
}

async fn get_snapshot(State(db): State<Db>, Path(id): Path<String>) -> ApiResult<Json<Snapshot>> {
    let store = db.read().await;
    store
        .snapshots
        .iter()
        .find(|s| s.id == id)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiFailure::not_found("snapshot", &id))
}

async fn update_snapshot(
    State(db): State<Db>,
    Path(id): Path<String>,
    Json(input): Json<Rename>,
) -> ApiResult<Json<Snapshot>> {
    let mut store = db.write().await;
    let snapshot = store
        .snapshots
        .iter_mut()
        .find(|s| s.id == id)
        .ok_or_else(|| ApiFailure::not_found("snapshot", &id))?;
    if let Some(name) = input.name {
        require_name(&name)?;
        snapshot.name = name;
    }
    Ok(Json(snapshot.clone()))
}

async fn delete_snapshot(State(db): State<Db>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    let mut store = db.write().await;
    let before = store.snapshots.len();
    store.snapshots.retain(|s| s.id != id);
    if store.snapshots.len() == before {
        return Err(ApiFailure::not_found("snapshot", &id));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Certificates
// ---------------------------------------------------------------------------

fn certificate(name: String, body: &[u8]) -> Certificate {
    Certificate {
        name,
        expired: false,
        valid: body.starts_with(PEM_HEADER),
    }
}

async fn list_certificates(State(db): State<Db>) -> Json<Value> {
    let store = db.read().await;
    let certificates: Vec<&Certificate> = store.certificates.values().collect();
    Json(serde_json::json!({ "certificates": certificates }))
}

async fn get_certificate(
    State(db): State<Db>,
    Path(name): Path<String>,
) -> ApiResult<Json<Certificate>> {
    let store = db.read().await;
    store
        .certificates
        .get(&name)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiFailure::not_found("certificate", &name))
}

async fn create_certificate(
    State(db): State<Db>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Certificate>)> {
    if body.is_empty() {
        return Err(ApiFailure::bad_request("certificate body is empty"));
    }
    let mut store = db.write().await;
    if store.certificates.contains_key(&name) {
        return Err(ApiFailure::conflict(format!("certificate {name} already exists")));
    }
    debug!(
        name = %name,
        content_type = ?headers.get(header::CONTENT_TYPE),
        bytes = body.len(),
        "uploaded certificate"
    );
    let cert = certificate(name.clone(), &body);
    store.certificates.insert(name, cert.clone());
    Ok((StatusCode::CREATED, Json(cert)))
}

async fn replace_certificate(
    State(db): State<Db>,
    Path(name): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Certificate>> {
    let mut store = db.write().await;
    let slot = store
        .certificates
        .get_mut(&name)
        .ok_or_else(|| ApiFailure::not_found("certificate", &name))?;
    *slot = certificate(name, &body);
    Ok(Json(slot.clone()))
}

async fn delete_certificate(
    State(db): State<Db>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    let mut store = db.write().await;
    store
        .certificates
        .remove(&name)
        .map(|_| StatusCode::NO_CONTENT)
        .ok_or_else(|| ApiFailure::not_found("certificate", &name))
}

// ---------------------------------------------------------------------------
// S3 credentials
// ---------------------------------------------------------------------------

async fn list_credentials(State(db): State<Db>) -> Json<Value> {
    let store = db.read().await;
    let keys: Vec<&String> = store.credentials.keys().collect();
    Json(serde_json::json!({ "s3_credentials": keys }))
}

async fn create_credential(
    State(db): State<Db>,
    Path(access_key): Path<String>,
) -> ApiResult<(StatusCode, Json<Credential>)> {
    let mut store = db.write().await;
    if store.credentials.contains_key(&access_key) {
        return Err(ApiFailure::conflict(format!(
            "credential {access_key} already exists"
        )));
    }
    let credential = Credential {
        access_key: access_key.clone(),
        secret_key: Uuid::new_v4().simple().to_string(),
    };
    store.credentials.insert(access_key, credential.clone());
    Ok((StatusCode::CREATED, Json(credential)))
}

async fn delete_credential(
    State(db): State<Db>,
    Path(access_key): Path<String>,
) -> ApiResult<StatusCode> {
    let mut store = db.write().await;
    store
        .credentials
        .remove(&access_key)
        .map(|_| StatusCode::NO_CONTENT)
        .ok_or_else(|| ApiFailure::not_found("credential", &access_key))
}
