use serde::Deserialize;
use axum::{Json, extract::{State, Query}, http::StatusCode};
use chrono::Utc;
use utoipa::{OpenApi, ToSchema};
use ctf_arena::gate::Entry;
use ctf_arena::models::{Category, ChallengeId};
use ctf_arena::service::{RejectReason, SubmitOutcome};
use ctf_arena::views::{ChallengeFilter, ChallengeList};
use crate::errors::{ApiError, ErrorBody, internal};
use crate::jwt::JWTUser;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
	paths(submit, list),
	components(schemas(SubmitFlag, SubmitOutcome, ChallengeList, ErrorBody))
)]
pub struct ChallengesApi;

#[derive(Deserialize, ToSchema)]
pub struct SubmitFlag {
	challenge_id: ChallengeId,
	#[schema(example = "FLAG{view_source_master}")]
	flag: String,
	/// submitted from the tournament's own page rather than the practice list
	#[serde(default)]
	from_tournament: bool
}

#[utoipa::path(
	post,
	path = "submit",
	operation_id = "challenge_submit",
	request_body = SubmitFlag,
	responses(
		(status = OK, body = SubmitOutcome, description = "the flag was accepted, or rejected with a reason code and somewhere to go next"),
		(status = NOT_FOUND, body = SubmitOutcome, description = "challenge doesn't exist or isn't active"),
		(status = UNAUTHORIZED, description = "missing or invalid user token"),
		(status = INTERNAL_SERVER_ERROR, body = SubmitOutcome, description = "the submission couldn't be processed, nothing was credited")
	),
	security(
		("user_api_key" = [])
	),
	tag = "challenges"
)]
pub async fn submit(State(state): State<AppState>, user: JWTUser, Json(body): Json<SubmitFlag>) -> Result<(StatusCode, Json<SubmitOutcome>), ApiError> {
	// players get a profile the first time they do anything that scores
	state.service().ensure_profile(user.user_id).await.map_err(internal)?;

	let entry = match body.from_tournament {
		true => Entry::Tournament,
		false => Entry::Archive
	};

	let outcome = state.service().submit_flag(user.user_id, body.challenge_id, &body.flag, entry, Utc::now()).await;
	let status = match outcome.reason() {
		Some(RejectReason::NotFound) => StatusCode::NOT_FOUND,
		Some(RejectReason::Internal) => StatusCode::INTERNAL_SERVER_ERROR,
		_ => StatusCode::OK
	};

	Ok((status, Json(outcome)))
}

#[derive(Deserialize)]
pub struct ListQuery {
	q: Option<String>,
	category: Option<String>,
	page: Option<i64>
}

#[utoipa::path(
	get,
	path = "list",
	operation_id = "challenge_list",
	params(
		("q" = Option<String>, Query, description = "case-insensitive search over title, description and category"),
		("category" = Option<String>, Query, description = "category code to filter by, unknown codes are ignored", example = "OSINT"),
		("page" = Option<i64>, Query, description = "1-based page number, out of range values are clamped")
	),
	responses(
		(status = OK, body = ChallengeList, description = "one page of publicly listed challenges"),
		(status = UNAUTHORIZED, description = "missing or invalid user token")
	),
	security(
		("user_api_key" = [])
	),
	tag = "challenges"
)]
pub async fn list(State(state): State<AppState>, user: JWTUser, Query(query): Query<ListQuery>) -> Result<Json<ChallengeList>, ApiError> {
	let filter = ChallengeFilter {
		query: query.q,
		category: query.category.as_deref().and_then(Category::parse)
	};

	state.service().list_challenges(user.user_id, &filter, query.page, Utc::now()).await
		.map(Json)
		.map_err(internal)
}
