// src/server.rs

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{convert::Infallible, sync::Arc};
use warp::{http::StatusCode, reject::Rejection, reply::Reply, Filter};

use crate::history::{RunLog, RunOutcome, RunRow};
use crate::kyc::KycStore;

#[derive(Clone)]
pub struct AppState {
    pub runs: Arc<RunLog>,
    pub store: Arc<dyn KycStore>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Pending,
    Failing,
}

#[derive(Serialize)]
struct HealthResponse {
    status: HealthStatus,
    service: &'static str,
    last_run: Option<RunRow>,
    last_success_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn health_status(last: Option<&RunRow>) -> HealthStatus {
    match last.map(|r| r.outcome) {
        None => HealthStatus::Pending,
        Some(RunOutcome::Succeeded) => HealthStatus::Ok,
        Some(RunOutcome::Failed) => HealthStatus::Failing,
    }
}

async fn health_check(state: AppState) -> Result<impl Reply, Rejection> {
    let last = state.runs.last();
    let status = health_status(last.as_ref());
    let code = if status == HealthStatus::Failing {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    let body = HealthResponse {
        status,
        service: "kycsheet",
        last_run: last,
        last_success_at: state.runs.last_success().map(|r| r.finished_at),
    };
    Ok(warp::reply::with_status(warp::reply::json(&body), code))
}

async fn list_runs(state: AppState) -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&state.runs.recent()))
}

async fn kyc_lookup(address: String, state: AppState) -> Result<impl Reply, Rejection> {
    let reply = match state.store.result_for(&address).await {
        Some(result) => warp::reply::with_status(warp::reply::json(&result), StatusCode::OK),
        None => warp::reply::with_status(
            warp::reply::json(&ErrorResponse {
                error: format!("no KYC entry for {}", address),
            }),
            StatusCode::NOT_FOUND,
        ),
    };
    Ok(reply)
}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// `GET /health`, `GET /runs`, `GET /kyc/{address}`.
pub fn routes(
    state: AppState,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(health_check);

    let runs = warp::path("runs")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(list_runs);

    let kyc = warp::path!("kyc" / String)
        .and(warp::get())
        .and(with_state(state))
        .and_then(kyc_lookup);

    health.or(runs).or(kyc)
}
