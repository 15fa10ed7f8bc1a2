//! Endpoint handlers. Every handler answers through the envelope types.

use axum::extract::{Path, Query, State};
use axum::response::Response;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use super::envelope::{ApiErrorResponse, ApiResponse};
use crate::jobs::MonitorState;
use crate::notify::DashboardHub;
use crate::scheduler::Scheduler;
use crate::types::GatewayStatus;

/// Upper bound on `GET /events?limit=`.
const MAX_EVENTS: usize = 500;
const DEFAULT_EVENTS: usize = 50;

#[derive(Clone)]
pub struct ApiState {
    pub scheduler: Arc<Scheduler>,
    pub monitor: Arc<MonitorState>,
    pub hub: Arc<DashboardHub>,
    pub started_at: Instant,
}

impl ApiState {
    pub fn new(scheduler: Arc<Scheduler>, monitor: Arc<MonitorState>, hub: Arc<DashboardHub>) -> Self {
        Self {
            scheduler,
            monitor,
            hub,
            started_at: Instant::now(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub jobs: usize,
    pub paused_jobs: usize,
    pub gateway: GatewayStatus,
}

pub async fn health(State(state): State<ApiState>) -> Response {
    let jobs = state.scheduler.jobs();
    ApiResponse::ok(Health {
        status: "ok",
        uptime_secs: state.started_at.elapsed().as_secs(),
        jobs: jobs.len(),
        paused_jobs: jobs.iter().filter(|j| j.paused).count(),
        gateway: state.monitor.live.load().status,
    })
}

pub async fn list_jobs(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(state.scheduler.jobs())
}

pub async fn pause_job(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    state.scheduler.pause(&id).map_or_else(Response::from, ApiResponse::ok)
}

pub async fn resume_job(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    state.scheduler.resume(&id).map_or_else(Response::from, ApiResponse::ok)
}

pub async fn status(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(state.monitor.snapshot(Utc::now()))
}

pub async fn anomaly(State(state): State<ApiState>) -> Response {
    match state.monitor.report.load_full() {
        Some(report) => ApiResponse::ok(report.as_ref()),
        None => ApiErrorResponse::not_ready("no anomaly pass has completed yet"),
    }
}

pub async fn prediction(State(state): State<ApiState>) -> Response {
    match state.monitor.prediction.load_full() {
        Some(prediction) => ApiResponse::ok(prediction.as_ref()),
        None => ApiErrorResponse::not_ready("no prediction yet"),
    }
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

pub async fn events(State(state): State<ApiState>, Query(q): Query<EventsQuery>) -> Response {
    let limit = q.limit.unwrap_or(DEFAULT_EVENTS).min(MAX_EVENTS);
    ApiResponse::ok(state.hub.recent(limit))
}
