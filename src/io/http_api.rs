//! Kiosk HTTP API
//!
//! JSON endpoints consumed by the kiosk front end: Breeze pass-through
//! lookups, single and batch check-in, checkout, ad-hoc label printing, and
//! the code utilities.
//! Uses hyper for the HTTP server; every response allows any origin.

use crate::domain::code;
use crate::domain::types::{FamilyMember, InstanceId, Label, LabelText, PersonId};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::breeze::BreezeClient;
use crate::io::printer::Printer;
use crate::io::prometheus::format_prometheus_metrics;
use crate::services::checkin::{
    BatchCheckin, BatchError, BatchRequest, LabelPrinter, ServiceError,
};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

type Reply = (StatusCode, Value);
type Query = HashMap<String, String>;

/// Shared collaborators behind every request
pub struct ApiState {
    breeze: Arc<BreezeClient>,
    printer: Arc<Printer>,
    checkin: BatchCheckin<BreezeClient, Printer>,
    metrics: Arc<Metrics>,
    kiosk_id: String,
}

impl ApiState {
    pub fn new(
        config: &Config,
        breeze: Arc<BreezeClient>,
        printer: Arc<Printer>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let checkin =
            BatchCheckin::new(Arc::clone(&breeze), Arc::clone(&printer), Arc::clone(&metrics), config);
        Self { breeze, printer, checkin, metrics, kiosk_id: config.kiosk_id().to_string() }
    }
}

/// Resolved request target
#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    Health,
    Metrics,
    PrinterStatus,
    PrinterList,
    PrinterPrint,
    Events,
    Eligible(InstanceId),
    Attendance(InstanceId),
    Checkin,
    CheckinBatch,
    Checkout,
    Person(PersonId),
    Family(PersonId),
    PersonWithFamily(PersonId),
    CodeGenerate,
    CodeDecode(String),
    CodeValidate,
    Preflight,
    NotFound,
}

impl Route {
    fn parse(method: &Method, path: &str) -> Self {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

        match (method, segments.as_slice()) {
            (&Method::OPTIONS, _) => Route::Preflight,
            (&Method::GET, ["health"]) => Route::Health,
            (&Method::GET, ["metrics"]) => Route::Metrics,
            (&Method::GET, ["printer", "status"]) => Route::PrinterStatus,
            (&Method::GET, ["printer", "list"]) => Route::PrinterList,
            (&Method::POST, ["printer", "print"]) => Route::PrinterPrint,
            (&Method::GET, ["events"]) => Route::Events,
            (&Method::GET, ["events", id, "eligible"]) => {
                id.parse().map(Route::Eligible).unwrap_or(Route::NotFound)
            }
            (&Method::GET, ["events", id, "attendance"]) => {
                id.parse().map(Route::Attendance).unwrap_or(Route::NotFound)
            }
            (&Method::POST, ["checkin"]) => Route::Checkin,
            (&Method::POST, ["checkin", "batch"]) => Route::CheckinBatch,
            (&Method::POST, ["checkout"]) => Route::Checkout,
            (&Method::GET, ["people", id]) => id.parse().map(Route::Person).unwrap_or(Route::NotFound),
            (&Method::GET, ["people", id, "family"]) => {
                id.parse().map(Route::Family).unwrap_or(Route::NotFound)
            }
            (&Method::GET, ["people", id, "with-family"]) => {
                id.parse().map(Route::PersonWithFamily).unwrap_or(Route::NotFound)
            }
            (&Method::GET, ["codes", "generate"]) => Route::CodeGenerate,
            (&Method::GET, ["codes", "decode", code]) => Route::CodeDecode(code.to_string()),
            (&Method::POST, ["codes", "validate"]) => Route::CodeValidate,
            _ => Route::NotFound,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CheckinBody {
    instance_id: InstanceId,
    person_id: PersonId,
}

#[derive(Debug, Deserialize)]
struct BatchBody {
    instance_id: InstanceId,
    people: Vec<FamilyMember>,
    #[serde(default = "default_print_labels")]
    print_labels: bool,
    #[serde(default)]
    extra_labels: Vec<LabelText>,
}

#[derive(Debug, Deserialize)]
struct PrintBody {
    labels: Vec<LabelText>,
}

fn default_print_labels() -> bool {
    true
}

/// Decoded query string of a request URI
fn query_params(uri: &Uri) -> Query {
    let Some(query) = uri.query() else {
        return Query::new();
    };
    reqwest::Url::parse(&format!("http://kiosk/?{query}"))
        .map(|url| url.query_pairs().into_owned().collect())
        .unwrap_or_default()
}

fn detail(status: StatusCode, message: impl std::fmt::Display) -> Reply {
    (status, json!({ "detail": message.to_string() }))
}

/// Required id parameter from the query string
fn query_id<T: FromStr>(query: &Query, name: &str) -> Result<T, Reply> {
    query
        .get(name)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| detail(StatusCode::UNPROCESSABLE_ENTITY, format!("missing or invalid {name}")))
}

/// Optional id parameter; present but malformed is an error
fn optional_query_id<T: FromStr>(query: &Query, name: &str) -> Result<Option<T>, Reply> {
    match query.get(name).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(_) => query_id(query, name).map(Some),
    }
}

async fn read_body(req: Request<hyper::body::Incoming>) -> Result<Bytes, Reply> {
    req.into_body()
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|e| detail(StatusCode::BAD_REQUEST, e))
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, Reply> {
    serde_json::from_slice(body)
        .map_err(|e| detail(StatusCode::UNPROCESSABLE_ENTITY, format!("invalid request body: {e}")))
}

fn service_failure(context: &str, e: ServiceError) -> Reply {
    warn!(context = %context, error = %e, "breeze_request_failed");
    detail(StatusCode::INTERNAL_SERVER_ERROR, e)
}

/// Wrap a pass-through lookup as `{key: value}`
fn pass_through(key: &str, result: Result<Value, ServiceError>) -> Reply {
    match result {
        Ok(value) => (StatusCode::OK, json!({ key: value })),
        Err(e) => service_failure(key, e),
    }
}

fn generate_code(query: &Query) -> Reply {
    let person_id: PersonId = match query_id(query, "person_id") {
        Ok(id) => id,
        Err(reply) => return reply,
    };
    let instance_id: InstanceId = match query_id(query, "instance_id") {
        Ok(id) => id,
        Err(reply) => return reply,
    };

    let code = code::generate_for(person_id, instance_id);
    (
        StatusCode::OK,
        json!({
            "code": code,
            "person_id": person_id.to_string(),
            "instance_id": instance_id.to_string(),
        }),
    )
}

fn decode_code(raw: &str, metrics: &Metrics) -> Reply {
    let decoded = code::decode(raw);
    metrics.record_code_lookup(decoded.is_some());

    match decoded {
        Some(decoded) => (StatusCode::OK, json!(decoded)),
        None => detail(StatusCode::BAD_REQUEST, "Invalid code"),
    }
}

fn validate_code(query: &Query, metrics: &Metrics) -> Reply {
    let Some(raw) = query.get("code") else {
        return detail(StatusCode::UNPROCESSABLE_ENTITY, "missing or invalid code");
    };
    let instance_id = match optional_query_id::<InstanceId>(query, "instance_id") {
        Ok(id) => id,
        Err(reply) => return reply,
    };
    let person_id = match optional_query_id::<PersonId>(query, "person_id") {
        Ok(id) => id,
        Err(reply) => return reply,
    };

    let decoded = code::validate(raw, instance_id, person_id);
    metrics.record_code_lookup(decoded.is_some());

    match decoded {
        Some(decoded) => (
            StatusCode::OK,
            json!({
                "valid": true,
                "person_id": decoded.person_id.to_string(),
                "instance_id": decoded.instance_id.to_string(),
            }),
        ),
        None => (StatusCode::OK, json!({ "valid": false })),
    }
}

/// Status and body for a failed batch
fn batch_error_reply(e: &BatchError) -> Reply {
    match e {
        BatchError::EmptySelection | BatchError::TooLarge { .. } => detail(StatusCode::BAD_REQUEST, e),
        BatchError::Transport(_) => detail(StatusCode::BAD_GATEWAY, e),
        BatchError::Print { checked_in, results, .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({
                "detail": e.to_string(),
                "checked_in": checked_in,
                "results": results,
                "labels_printed": 0,
            }),
        ),
    }
}

async fn events(state: &ApiState, query: &Query) -> Reply {
    let start = query
        .get("start")
        .cloned()
        .unwrap_or_else(|| chrono::Local::now().date_naive().to_string());
    let end = query.get("end").map(String::as_str);

    pass_through("events", state.breeze.events(Some(&start), end).await)
}

async fn checkin_one(state: &ApiState, body: &[u8]) -> Reply {
    let request: CheckinBody = match parse_body(body) {
        Ok(request) => request,
        Err(reply) => return reply,
    };

    match state.breeze.add_attendance(request.instance_id, request.person_id).await {
        Ok(true) => {
            info!(instance_id = %request.instance_id, person_id = %request.person_id, "single_checkin");
            (StatusCode::OK, json!({ "success": true, "person_id": request.person_id.to_string() }))
        }
        Ok(false) => detail(StatusCode::BAD_REQUEST, "Check-in failed"),
        Err(e) => {
            warn!(person_id = %request.person_id, error = %e, "single_checkin_failed");
            detail(StatusCode::INTERNAL_SERVER_ERROR, format!("Breeze API error: {e}"))
        }
    }
}

async fn checkin_batch(state: &ApiState, body: &[u8]) -> Reply {
    let body: BatchBody = match parse_body(body) {
        Ok(body) => body,
        Err(reply) => return reply,
    };

    let mut request = BatchRequest::new(body.instance_id, body.people);
    request.print_labels = body.print_labels;
    request.extra_labels = body.extra_labels;

    match state.checkin.run(request).await {
        Ok(outcome) => (
            StatusCode::OK,
            json!({
                "batch_id": outcome.batch_id,
                "code": outcome.code,
                "summary": outcome.summary(),
                "results": outcome.results,
                "checked_in": outcome.checked_in,
                "labels_printed": outcome.labels_printed,
            }),
        ),
        Err(e) => batch_error_reply(&e),
    }
}

/// Print caller-supplied labels as one job, outside any check-in
async fn print_labels(state: &ApiState, body: &[u8]) -> Reply {
    let body: PrintBody = match parse_body(body) {
        Ok(body) => body,
        Err(reply) => return reply,
    };
    let labels: Vec<Label> = body.labels.into_iter().map(LabelText::into_label).collect();

    match state.printer.print_batch(&labels).await {
        Ok(printed) => {
            state.metrics.record_labels_printed(printed as u64);
            (StatusCode::OK, json!({ "success": true, "count": printed }))
        }
        Err(e) => {
            state.metrics.record_print_failure();
            warn!(labels = labels.len(), error = %e, "adhoc_print_failed");
            detail(StatusCode::INTERNAL_SERVER_ERROR, "Print failed")
        }
    }
}

async fn checkout(state: &ApiState, query: &Query) -> Reply {
    let instance_id: InstanceId = match query_id(query, "instance_id") {
        Ok(id) => id,
        Err(reply) => return reply,
    };
    let person_id: PersonId = match query_id(query, "person_id") {
        Ok(id) => id,
        Err(reply) => return reply,
    };

    match state.breeze.delete_attendance(instance_id, person_id).await {
        Ok(success) => {
            info!(instance_id = %instance_id, person_id = %person_id, success = success, "checkout");
            (StatusCode::OK, json!({ "success": success }))
        }
        Err(e) => service_failure("checkout", e),
    }
}

async fn family(state: &ApiState, person_id: PersonId) -> Reply {
    match state.checkin.lookup_family(person_id).await {
        Ok(family) => (StatusCode::OK, json!({ "family": family })),
        Err(e) => service_failure("family", e),
    }
}

fn with_cors(mut response: Response<Full<Bytes>>, content_type: &'static str) -> Response<Full<Bytes>> {
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

fn json_response((status, body): Reply) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    with_cors(response, "application/json")
}

fn preflight_response() -> Response<Full<Bytes>> {
    let mut response = with_cors(Response::new(Full::new(Bytes::new())), "text/plain");
    *response.status_mut() = StatusCode::NO_CONTENT;
    let headers = response.headers_mut();
    headers.insert("Access-Control-Allow-Methods", HeaderValue::from_static("GET, POST, OPTIONS"));
    headers.insert("Access-Control-Allow-Headers", HeaderValue::from_static("Content-Type"));
    response
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<ApiState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let route = Route::parse(req.method(), req.uri().path());
    let query = query_params(req.uri());
    debug!(method = %req.method(), path = %req.uri().path(), "api_request");

    let reply = match route {
        Route::Preflight => return Ok(preflight_response()),
        Route::Metrics => {
            let body = format_prometheus_metrics(&state.metrics, &state.kiosk_id);
            return Ok(with_cors(
                Response::new(Full::new(Bytes::from(body))),
                "text/plain; version=0.0.4; charset=utf-8",
            ));
        }
        Route::Health => (StatusCode::OK, json!({ "status": "ok" })),
        Route::PrinterStatus => (
            StatusCode::OK,
            json!({
                "connected": state.printer.is_connected().await,
                "mode": state.printer.mode().as_str(),
                "printer": state.printer.name(),
            }),
        ),
        Route::PrinterList => (StatusCode::OK, json!({ "printers": state.printer.list_printers().await })),
        Route::PrinterPrint => match read_body(req).await {
            Ok(body) => print_labels(&state, &body).await,
            Err(reply) => reply,
        },
        Route::Events => events(&state, &query).await,
        Route::Eligible(id) => pass_through("people", state.breeze.eligible_people(id).await),
        Route::Attendance(id) => pass_through("attendance", state.breeze.list_attendance(id).await),
        Route::Checkin => match read_body(req).await {
            Ok(body) => checkin_one(&state, &body).await,
            Err(reply) => reply,
        },
        Route::CheckinBatch => match read_body(req).await {
            Ok(body) => checkin_batch(&state, &body).await,
            Err(reply) => reply,
        },
        Route::Checkout => checkout(&state, &query).await,
        Route::Person(id) => pass_through("person", state.breeze.person(id).await),
        Route::Family(id) => family(&state, id).await,
        Route::PersonWithFamily(id) => pass_through("person", state.breeze.person_with_family(id).await),
        Route::CodeGenerate => generate_code(&query),
        Route::CodeDecode(raw) => decode_code(&raw, &state.metrics),
        Route::CodeValidate => validate_code(&query, &state.metrics),
        Route::NotFound => detail(StatusCode::NOT_FOUND, "Not Found"),
    };

    Ok(json_response(reply))
}

/// Serve the API on an already bound listener until shutdown is signalled
pub async fn serve(
    listener: TcpListener,
    state: Arc<ApiState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_request(req, state).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "api_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "api_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("api_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

/// Start the kiosk API server
pub async fn start_api_server(
    addr: SocketAddr,
    state: Arc<ApiState>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, kiosk = %state.kiosk_id, "api_server_started");
    serve(listener, state, shutdown).await
}
