use serde::Deserialize;
use axum::{Json, extract::{State, Query}, http::StatusCode};
use chrono::Utc;
use utoipa::{OpenApi, ToSchema};
use ctf_arena::labs::{LabError, LabHandle};
use ctf_arena::models::ChallengeId;
use crate::errors::{ApiError, ErrorBody, internal, reject};
use crate::jwt::JWTUser;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
	paths(start, current, stop),
	components(schemas(StartLab, LabHandle, ErrorBody))
)]
pub struct LabsApi;

fn lab_error(e: LabError) -> ApiError {
	let status = match &e {
		LabError::NoImage => StatusCode::UNPROCESSABLE_ENTITY,
		LabError::AlreadyRunningElsewhere => StatusCode::CONFLICT,
		LabError::NoPort | LabError::RuntimeFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
		LabError::UnknownChallenge => StatusCode::NOT_FOUND,
		LabError::Backend(_) => return internal(e)
	};

	log::debug!("lab request refused: {e}");
	reject(status, e.code())
}

#[derive(Deserialize, ToSchema)]
pub struct StartLab {
	challenge_id: ChallengeId
}

#[utoipa::path(
	post,
	path = "start",
	operation_id = "lab_start",
	request_body = StartLab,
	responses(
		(status = OK, body = LabHandle, description = "the lab is running, connect to the returned host port (starting the same lab twice returns the same port)"),
		(status = UNPROCESSABLE_ENTITY, body = ErrorBody, description = "`NO_IMAGE`: the challenge has no lab"),
		(status = CONFLICT, body = ErrorBody, description = "`ALREADY_RUNNING_ELSEWHERE`: stop your other lab first"),
		(status = SERVICE_UNAVAILABLE, body = ErrorBody, description = "`NO_PORT` or `RUNTIME_FAILURE`"),
		(status = NOT_FOUND, body = ErrorBody, description = "challenge doesn't exist or isn't active")
	),
	security(
		("user_api_key" = [])
	),
	tag = "labs"
)]
pub async fn start(State(state): State<AppState>, user: JWTUser, Json(body): Json<StartLab>) -> Result<Json<LabHandle>, ApiError> {
	state.service().provision_lab(user.user_id, body.challenge_id, Utc::now()).await
		.map(Json)
		.map_err(lab_error)
}

#[derive(Deserialize)]
pub struct LabQuery {
	challenge_id: ChallengeId
}

#[utoipa::path(
	get,
	path = "current",
	operation_id = "lab_current",
	params(
		("challenge_id" = i32, Query, description = "the challenge whose lab to look up")
	),
	responses(
		(status = OK, body = Option<LabHandle>, description = "the running lab for this challenge, or `null`")
	),
	security(
		("user_api_key" = [])
	),
	tag = "labs"
)]
pub async fn current(State(state): State<AppState>, user: JWTUser, Query(query): Query<LabQuery>) -> Result<Json<Option<LabHandle>>, ApiError> {
	state.service().lab_status(user.user_id, query.challenge_id).await
		.map(Json)
		.map_err(lab_error)
}

#[utoipa::path(
	delete,
	path = "stop",
	operation_id = "lab_stop",
	params(
		("challenge_id" = i32, Query, description = "the challenge whose lab to stop")
	),
	responses(
		(status = NO_CONTENT, description = "the lab is gone (stopping a lab that isn't running is fine too)")
	),
	security(
		("user_api_key" = [])
	),
	tag = "labs"
)]
pub async fn stop(State(state): State<AppState>, user: JWTUser, Query(query): Query<LabQuery>) -> Result<StatusCode, ApiError> {
	state.service().terminate_lab(user.user_id, query.challenge_id).await.map_err(lab_error)?;
	Ok(StatusCode::NO_CONTENT)
}
