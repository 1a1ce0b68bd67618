//! Thin `axum` HTTP surface around [`crate::pipeline`] (spec §6): out-of-
//! process transport is not part of the core contract, but the teacher
//! repo ships its CP model behind a `/v1/schedule/solve` route, so this
//! is kept as a separable layer around the same core.

use axum::{http::StatusCode, routing::post, Json, Router};
use log::{error, info};

use crate::config::SolveOptions;
use crate::data_prep::RawDataset;
use crate::error::ScheduleError;
use crate::pipeline::{self, SolveOutput};

fn error_response(e: ScheduleError) -> (StatusCode, Json<serde_json::Value>) {
    error!("{e}");
    let status = match e.exit_code() {
        2 | 3 => StatusCode::UNPROCESSABLE_ENTITY,
        4 => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": e.to_string() })))
}

async fn solve_handler(Json(input): Json<RawDataset>) -> Result<Json<SolveOutput>, (StatusCode, Json<serde_json::Value>)> {
    let options = SolveOptions::resolve(None, None, None, false);
    pipeline::solve_dataset(input, &options).map(Json).map_err(error_response)
}

async fn analyze_handler(Json(input): Json<RawDataset>) -> Result<Json<crate::analyzer::AnalysisReport>, (StatusCode, Json<serde_json::Value>)> {
    pipeline::analyze_dataset(input).map(Json).map_err(error_response)
}

pub async fn run_server(bind: &str) {
    let app = Router::new()
        .route("/v1/schedule/solve", post(solve_handler))
        .route("/v1/schedule/analyze", post(analyze_handler));

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .unwrap_or_else(|e| panic!("could not bind {bind}: {e}"));

    info!("server listening on http://{}", listener.local_addr().unwrap());

    axum::serve(listener, app).await.unwrap();
}
