//! Operator surface: start/stop voting, progress, results and vote records.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use server_api::{keypads, ledger};
use shared::{
    domain::{
        AgendaItemId, ElectionPollId, Keypad, MotionPollId, Overlay, PollRef, VoteRecord,
        VotingTarget,
    },
    error::{ApiError, ErrorCode, VotingError},
    protocol::{
        format_elapsed, AnonymizeResponse, DeviceStatusResponse, ResultResponse, ServerEvent,
        SessionResponse, StartResponse, StatusResponse, StopResponse,
    },
};
use tracing::info;

use crate::app_state::AppState;

pub(crate) type HttpError = (StatusCode, Json<ApiError>);
type HttpResult<T> = Result<Json<T>, HttpError>;

pub(crate) fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Device => StatusCode::BAD_GATEWAY,
        ErrorCode::TargetMismatch | ErrorCode::NoActiveSession => StatusCode::CONFLICT,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn http_error(err: VotingError) -> HttpError {
    let error = ApiError::from(err);
    (status_for(error.code), Json(error))
}

pub(crate) async fn device_status(
    State(state): State<Arc<AppState>>,
) -> HttpResult<DeviceStatusResponse> {
    let (device, connected) = state
        .api
        .sessions
        .device_status()
        .await
        .map_err(http_error)?;
    Ok(Json(DeviceStatusResponse { device, connected }))
}

async fn start(state: &AppState, target: VotingTarget) -> HttpResult<StartResponse> {
    let outcome = state.api.sessions.start_session(target).await;
    state.publish_session().await;
    let count = outcome.map_err(http_error)?;
    Ok(Json(StartResponse { count }))
}

pub(crate) async fn start_motion(
    State(state): State<Arc<AppState>>,
    Path(poll_id): Path<i64>,
) -> HttpResult<StartResponse> {
    start(&state, VotingTarget::MotionVote(MotionPollId(poll_id))).await
}

pub(crate) async fn start_election(
    State(state): State<Arc<AppState>>,
    Path(poll_id): Path<i64>,
) -> HttpResult<StartResponse> {
    start(&state, VotingTarget::ElectionVote(ElectionPollId(poll_id))).await
}

pub(crate) async fn start_speaker_list(
    State(state): State<Arc<AppState>>,
    Path(item_id): Path<i64>,
) -> HttpResult<StartResponse> {
    start(&state, VotingTarget::SpeakerList(AgendaItemId(item_id))).await
}

pub(crate) async fn start_ping(State(state): State<Arc<AppState>>) -> HttpResult<StartResponse> {
    start(&state, VotingTarget::ConnectivityTest).await
}

pub(crate) async fn stop(State(state): State<Arc<AppState>>) -> HttpResult<StopResponse> {
    let outcome = state.api.sessions.stop_session().await;
    state.publish_session().await;
    let votes = outcome.map_err(http_error)?;
    Ok(Json(StopResponse { votes }))
}

pub(crate) async fn status(State(state): State<Arc<AppState>>) -> HttpResult<StatusResponse> {
    let progress = state.api.sessions.status().await.map_err(http_error)?;
    Ok(Json(StatusResponse {
        elapsed: format_elapsed(progress.elapsed_seconds),
        elapsed_seconds: progress.elapsed_seconds,
        votes_received: progress.votes_received,
    }))
}

async fn result(state: &AppState, target: VotingTarget) -> HttpResult<ResultResponse> {
    let votes = state.api.sessions.result(target).await.map_err(http_error)?;
    Ok(Json(ResultResponse { votes }))
}

pub(crate) async fn motion_result(
    State(state): State<Arc<AppState>>,
    Path(poll_id): Path<i64>,
) -> HttpResult<ResultResponse> {
    result(&state, VotingTarget::MotionVote(MotionPollId(poll_id))).await
}

pub(crate) async fn election_result(
    State(state): State<Arc<AppState>>,
    Path(poll_id): Path<i64>,
) -> HttpResult<ResultResponse> {
    result(&state, VotingTarget::ElectionVote(ElectionPollId(poll_id))).await
}

async fn anonymize(state: &AppState, poll: PollRef) -> HttpResult<AnonymizeResponse> {
    let count = ledger::anonymize(&state.api.storage, poll)
        .await
        .map_err(http_error)?;
    info!(%poll, count, "votes anonymized");
    state.publish(ServerEvent::VotesAnonymized { poll });
    Ok(Json(AnonymizeResponse {
        detail: "All votes are successfully anonymized.".into(),
        count: i64::try_from(count).unwrap_or(i64::MAX),
    }))
}

pub(crate) async fn anonymize_motion(
    State(state): State<Arc<AppState>>,
    Path(poll_id): Path<i64>,
) -> HttpResult<AnonymizeResponse> {
    anonymize(&state, PollRef::Motion(MotionPollId(poll_id))).await
}

pub(crate) async fn anonymize_election(
    State(state): State<Arc<AppState>>,
    Path(poll_id): Path<i64>,
) -> HttpResult<AnonymizeResponse> {
    anonymize(&state, PollRef::Election(ElectionPollId(poll_id))).await
}

pub(crate) async fn motion_votes(
    State(state): State<Arc<AppState>>,
    Path(poll_id): Path<i64>,
) -> HttpResult<Vec<VoteRecord>> {
    let records = ledger::votes(&state.api.storage, PollRef::Motion(MotionPollId(poll_id)))
        .await
        .map_err(http_error)?;
    Ok(Json(records))
}

pub(crate) async fn election_votes(
    State(state): State<Arc<AppState>>,
    Path(poll_id): Path<i64>,
) -> HttpResult<Vec<VoteRecord>> {
    let records = ledger::votes(
        &state.api.storage,
        PollRef::Election(ElectionPollId(poll_id)),
    )
    .await
    .map_err(http_error)?;
    Ok(Json(records))
}

pub(crate) async fn session(State(state): State<Arc<AppState>>) -> Json<SessionResponse> {
    let session = state.api.sessions.session().await;
    Json(SessionResponse::from(&session))
}

pub(crate) async fn overlay(State(state): State<Arc<AppState>>) -> Json<Option<Overlay>> {
    Json(state.api.sessions.overlay().await)
}

pub(crate) async fn list_keypads(State(state): State<Arc<AppState>>) -> HttpResult<Vec<Keypad>> {
    let keypads = keypads::list(&state.api.storage).await.map_err(http_error)?;
    Ok(Json(keypads))
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
