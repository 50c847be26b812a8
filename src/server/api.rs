//! HTTP handlers for the query service
//!
//! The primary endpoint decodes a client request into a selector query,
//! consults the currently published snapshot, and renders the result either
//! as the line-oriented `IP-Gen/1.1` text format or as JSON. `/stats` is an
//! alias of `/` that forces the statistics log into the response.

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::net::IpAddr;

use super::AppState;
use crate::models::{CountrySet, ServerVersion};
use crate::selector::{select_valid_ips, Selection, SelectorQuery};

const CONTENT_TYPE_TEXT: &str = "text/plain; charset=utf-8";
const CONTENT_TYPE_JSON: &str = "application/json";

/// Build the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(ip_valid))
        .route("/stats", get(ip_valid_stats))
        .route("/hosts", get(hosts))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct StatusBody {
    status: &'static str,
    count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tags: Option<Vec<&'static str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    minimum_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    proxies: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    countries: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    minimum: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    collected: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApiBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<Vec<String>>,
    status: StatusBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    ips: Option<Vec<String>>,
}

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
}

// ============================================================================
// Request Decoding
// ============================================================================

struct ApiRequest {
    query: SelectorQuery,
    show_stats: bool,
    emit_json: bool,
    content_type: &'static str,
}

fn decode_request(
    params: &HashMap<String, String>,
    force_stats: bool,
) -> Result<ApiRequest, Response> {
    let show_stats = force_stats || params.contains_key("stats");
    let emit_json = params.contains_key("json");
    // `textplain` serves the JSON body with a text content type.
    let content_type = if emit_json && !params.contains_key("textplain") {
        CONTENT_TYPE_JSON
    } else {
        CONTENT_TYPE_TEXT
    };

    let mut query = SelectorQuery {
        limit_to_proxies: params.contains_key("proxies"),
        limit_to_countries: params.get("countries").map(|csv| CountrySet::parse(csv)),
        ..Default::default()
    };

    if let Some(raw) = params.get("minimum_version") {
        if !raw.is_empty() {
            match raw.parse::<ServerVersion>() {
                Ok(version) => query.minimum_version = Some(version),
                Err(_) => {
                    return Err((StatusCode::BAD_REQUEST, "invalid minimum_version\n")
                        .into_response())
                }
            }
        }
    }

    // Unparseable or non-positive overrides are silently ignored.
    query.threshold_override = params
        .get("threshold")
        .and_then(|raw| raw.parse::<u64>().ok())
        .filter(|t| *t > 0);

    Ok(ApiRequest {
        query,
        show_stats,
        emit_json,
        content_type,
    })
}

// ============================================================================
// Handlers
// ============================================================================

async fn ip_valid(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    respond(&state, &params, false)
}

async fn ip_valid_stats(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    respond(&state, &params, true)
}

fn respond(state: &AppState, params: &HashMap<String, String>, force_stats: bool) -> Response {
    let endpoint = if force_stats { "/stats" } else { "/" };
    let request = match decode_request(params, force_stats) {
        Ok(request) => request,
        Err(response) => {
            crate::metrics::API_REQUESTS
                .with_label_values(&[endpoint, "BAD_REQUEST"])
                .inc();
            return response;
        }
    };

    let Some(snapshot) = state.slot.current() else {
        crate::metrics::API_REQUESTS
            .with_label_values(&[endpoint, "INVALID"])
            .inc();
        return render_invalid(&request, &[], "first_scan");
    };

    let outcome = select_valid_ips(&snapshot, &request.query, &state.selector);
    match outcome.selection {
        Selection::Invalid { reason } => {
            crate::metrics::API_REQUESTS
                .with_label_values(&[endpoint, "INVALID"])
                .inc();
            render_invalid(&request, &outcome.stats, &reason)
        }
        Selection::Valid {
            ips,
            threshold,
            tags,
            collected,
        } => {
            crate::metrics::API_REQUESTS
                .with_label_values(&[endpoint, "COMPLETE"])
                .inc();
            render_valid(&request, &outcome.stats, &ips, threshold, tags, collected)
        }
    }
}

async fn hosts(State(state): State<AppState>) -> Response {
    let Some(snapshot) = state.slot.current() else {
        return text_response("no scan data yet\n".to_string());
    };

    let mut out = String::new();
    for name in &snapshot.sorted {
        let Some(node) = snapshot.host_map.get(name) else {
            continue;
        };
        let version = node
            .version
            .map(|v| v.to_string())
            .unwrap_or_else(|| String::from("-"));
        let ips = join(node.ip_list.iter());
        let aliases = snapshot
            .alias_map
            .get(name)
            .map(|aliases| aliases.join(","))
            .unwrap_or_default();
        out.push_str(&format!(
            "{name} keys={} version={version} ips={ips} aliases={aliases}\n",
            node.keycount
        ));
    }
    out.push_str(&format!("total: {} hosts\n", snapshot.host_count()));
    text_response(out)
}

async fn health(State(state): State<AppState>) -> Response {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started.elapsed().as_secs(),
    })
    .into_response()
}

async fn metrics() -> Response {
    text_response(crate::metrics::encode())
}

// ============================================================================
// Rendering
// ============================================================================

fn timestamp(collected: DateTime<Utc>) -> String {
    collected.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn join<I: Iterator<Item = T>, T: ToString>(items: I) -> String {
    items
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn render_invalid(request: &ApiRequest, stats: &[String], reason: &str) -> Response {
    if request.emit_json {
        let body = ApiBody {
            stats: request.show_stats.then(|| stats.to_vec()),
            status: StatusBody {
                status: "INVALID",
                count: 0,
                reason: Some(reason.to_string()),
                tags: None,
                minimum_version: None,
                proxies: None,
                countries: None,
                minimum: None,
                collected: None,
            },
            ips: None,
        };
        return json_response(request.content_type, &body);
    }

    let mut out = String::new();
    if request.show_stats {
        for line in stats {
            out.push_str(&format!("STATS: {line}\n"));
        }
    }
    out.push_str(&format!(
        "IP-Gen/1.1: status=INVALID count=0 reason={reason}\n.\n"
    ));
    typed_response(request.content_type, out)
}

fn render_valid(
    request: &ApiRequest,
    stats: &[String],
    ips: &[IpAddr],
    threshold: i64,
    tags: Vec<&'static str>,
    collected: DateTime<Utc>,
) -> Response {
    let query = &request.query;
    if request.emit_json {
        let body = ApiBody {
            stats: request.show_stats.then(|| stats.to_vec()),
            status: StatusBody {
                status: "COMPLETE",
                count: ips.len(),
                reason: None,
                tags: Some(tags),
                minimum_version: query.minimum_version.map(|v| v.to_string()),
                proxies: query.limit_to_proxies.then_some("1"),
                countries: query.limit_to_countries.as_ref().map(|c| c.to_string()),
                minimum: Some(threshold),
                collected: Some(timestamp(collected)),
            },
            ips: Some(ips.iter().map(ToString::to_string).collect()),
        };
        return json_response(request.content_type, &body);
    }

    let mut out = String::new();
    if request.show_stats {
        for line in stats {
            out.push_str(&format!("STATS: {line}\n"));
        }
    }
    out.push_str(&format!(
        "IP-Gen/1.1: status=COMPLETE count={} tags={} minimum={threshold} collected={}",
        ips.len(),
        tags.join(","),
        timestamp(collected)
    ));
    if let Some(minimum_version) = &query.minimum_version {
        out.push_str(&format!(" minimum_version={minimum_version}"));
    }
    if query.limit_to_proxies {
        out.push_str(" proxies=1");
    }
    if let Some(countries) = &query.limit_to_countries {
        out.push_str(&format!(" countries={countries}"));
    }
    out.push('\n');
    for ip in ips {
        out.push_str(&format!("{ip}\n"));
    }
    out.push_str(".\n");
    typed_response(request.content_type, out)
}

fn json_response<T: Serialize>(content_type: &'static str, body: &T) -> Response {
    match serde_json::to_string(body) {
        Ok(serialized) => typed_response(content_type, serialized),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("serialization failed: {err}\n"),
        )
            .into_response(),
    }
}

fn typed_response(content_type: &'static str, body: String) -> Response {
    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}

fn text_response(body: String) -> Response {
    typed_response(CONTENT_TYPE_TEXT, body)
}
