use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use anyhow::{Context, Result};
use hyper::header::CONTENT_TYPE;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use log::{debug, error, info};
use serde_json::{json, Value};

use crate::config::ServerConfig;
use crate::database::{AggregationLevel, RunHistory};
use crate::report::{bytes_to_mb, round_to, share_pct};
use crate::stats::aggregator::SortMetric;

const DASHBOARD_PAGE: &str = include_str!("dashboard.html");

/// Serve the read-only dashboard and JSON API until Ctrl+C.
pub async fn serve(history: RunHistory, config: &ServerConfig) -> Result<()> {
    let addr = tokio::net::lookup_host((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("Unable to resolve {}:{}", config.host, config.port))?
        .next()
        .with_context(|| format!("No address for {}:{}", config.host, config.port))?;

    let history = Arc::new(history);
    let make_svc = make_service_fn(move |_conn| {
        let history = history.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let history = history.clone();
                async move { Ok::<_, Infallible>(handle(&history, req).await) }
            }))
        }
    });

    let server = Server::try_bind(&addr)
        .with_context(|| format!("Unable to bind {}", addr))?
        .serve(make_svc);

    info!("🌐 Dashboard available at http://{}", addr);

    server
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down web server");
        })
        .await
        .context("Web server error")?;

    Ok(())
}

pub async fn handle(history: &RunHistory, req: Request<Body>) -> Response<Body> {
    debug!("{} {}", req.method(), req.uri());

    if req.method() != Method::GET {
        return json_response(StatusCode::METHOD_NOT_ALLOWED, json!({"error": "Method not allowed"}));
    }

    route(history, req.uri().path(), req.uri().query()).await
}

/// Dispatch a GET request by path and raw query string.
pub async fn route(history: &RunHistory, path: &str, query: Option<&str>) -> Response<Body> {
    let params = parse_query(query.unwrap_or(""));

    let result = match path {
        "/" => {
            return Response::builder()
                .header(CONTENT_TYPE, "text/html; charset=utf-8")
                .body(Body::from(DASHBOARD_PAGE))
                .unwrap_or_else(|_| internal_error());
        }
        "/health" => Ok(json!({"status": "ok"})),
        "/api/summary" => summary(history).await,
        "/api/top" => match TopParams::from_query(&params) {
            Ok(top) => top_senders(history, top).await,
            Err(message) => return json_response(StatusCode::BAD_REQUEST, json!({"error": message})),
        },
        "/api/runs" => match parse_limit(&params, 10, 100) {
            Ok(limit) => runs(history, limit).await,
            Err(message) => return json_response(StatusCode::BAD_REQUEST, json!({"error": message})),
        },
        _ => return json_response(StatusCode::NOT_FOUND, json!({"error": "Not found"})),
    };

    match result {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(e) => {
            error!("❌ Error serving {}: {:#}", path, e);
            json_response(StatusCode::INTERNAL_SERVER_ERROR, json!({"error": "Internal server error"}))
        }
    }
}

struct TopParams {
    metric: SortMetric,
    level: AggregationLevel,
    limit: i64,
}

impl TopParams {
    fn from_query(params: &HashMap<String, String>) -> Result<Self, String> {
        let metric = match params.get("metric") {
            Some(raw) => raw.parse::<SortMetric>().map_err(|e| e.to_string())?,
            None => SortMetric::Count,
        };
        let level = match params.get("level") {
            Some(raw) => raw.parse::<AggregationLevel>().map_err(|e| e.to_string())?,
            None => AggregationLevel::Domain,
        };

        Ok(TopParams {
            metric,
            level,
            limit: parse_limit(params, 50, 500)?,
        })
    }
}

fn parse_limit(params: &HashMap<String, String>, default: i64, max: i64) -> Result<i64, String> {
    let Some(raw) = params.get("limit") else {
        return Ok(default);
    };
    match raw.parse::<i64>() {
        Ok(limit) if (1..=max).contains(&limit) => Ok(limit),
        _ => Err(format!("limit must be an integer between 1 and {}", max)),
    }
}

/// Decode `application/x-www-form-urlencoded` pairs; values are trimmed.
fn parse_query(query: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(query.as_bytes())
        .map(|(key, value)| (key.into_owned(), value.trim().to_string()))
        .collect()
}

async fn summary(history: &RunHistory) -> Result<Value> {
    let Some(run) = history.latest_run().await? else {
        return Ok(json!({"error": "No runs found"}));
    };

    let domains = history.level_totals(run.run_id, AggregationLevel::Domain).await?;
    let addresses = history.level_totals(run.run_id, AggregationLevel::Address).await?;

    Ok(json!({
        "run_id": run.run_id,
        "timestamp": run.timestamp,
        "account_email": run.account_email,
        "days_analyzed": run.days_analyzed,
        "sample_size": run.sample_size,
        "sampling_method": run.sampling_method,
        "messages_examined": run.messages_examined,
        "total_mailbox_messages": run.total_mailbox_messages,
        "unique_domains": domains.senders,
        "unique_addresses": addresses.senders,
        "total_bytes": domains.total_size_bytes,
        "total_mb": round_to(bytes_to_mb(non_negative(domains.total_size_bytes)), 2),
    }))
}

async fn top_senders(history: &RunHistory, params: TopParams) -> Result<Value> {
    let Some(run) = history.latest_run().await? else {
        return Ok(json!({"error": "No runs found", "senders": []}));
    };

    let totals = history.level_totals(run.run_id, params.level).await?;
    let rows = history
        .top_senders(run.run_id, params.level, params.metric, params.limit)
        .await?;

    let senders: Vec<Value> = rows
        .into_iter()
        .map(|row| {
            json!({
                "sender": row.sender,
                "message_count": row.message_count,
                "total_size_mb": round_to(bytes_to_mb(non_negative(row.total_size_bytes)), 2),
                "messages_with_attachments": row.messages_with_attachments,
                "count_pct": round_to(share_pct(non_negative(row.message_count), non_negative(totals.message_count)), 1),
                "size_pct": round_to(share_pct(non_negative(row.total_size_bytes), non_negative(totals.total_size_bytes)), 1),
            })
        })
        .collect();

    Ok(json!({
        "run_id": run.run_id,
        "metric": params.metric.as_str(),
        "level": params.level.as_str(),
        "limit": params.limit,
        "senders": senders,
    }))
}

async fn runs(history: &RunHistory, limit: i64) -> Result<Value> {
    let runs = history.recent_runs(limit).await?;
    Ok(json!({ "runs": runs }))
}

fn non_negative(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn json_response(status: StatusCode, body: Value) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| internal_error())
}

fn internal_error() -> Response<Body> {
    let mut response = Response::new(Body::from("Internal server error"));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}
