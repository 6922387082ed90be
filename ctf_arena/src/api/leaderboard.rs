use serde::Deserialize;
use axum::{Json, extract::{State, Query}, http::StatusCode};
use utoipa::OpenApi;
use ctf_arena::models::UserId;
use ctf_arena::views::{LEADERBOARD_SIZE, LeaderboardEntry, ProfileSummary};
use crate::errors::{ApiError, internal, reject};
use crate::jwt::JWTUser;
use crate::state::AppState;

const MAX_LIMIT: usize = 100;

#[derive(OpenApi)]
#[openapi(
	paths(top, profile),
	components(schemas(LeaderboardEntry, ProfileSummary))
)]
pub struct LeaderboardApi;

#[derive(Deserialize)]
pub struct TopQuery {
	limit: Option<usize>
}

#[utoipa::path(
	get,
	path = "top",
	operation_id = "leaderboard_top",
	params(
		("limit" = Option<usize>, Query, description = "how many players to return, defaults to 20 and is capped at 100")
	),
	responses(
		(status = OK, body = [LeaderboardEntry], description = "players by total points, ties go to whoever got there first")
	),
	tag = "leaderboard"
)]
pub async fn top(State(state): State<AppState>, Query(query): Query<TopQuery>) -> Result<Json<Vec<LeaderboardEntry>>, ApiError> {
	let limit = query.limit.unwrap_or(LEADERBOARD_SIZE).min(MAX_LIMIT);

	state.service().leaderboard(limit).await.map(Json).map_err(internal)
}

#[derive(Deserialize)]
pub struct ProfileQuery {
	user_id: Option<UserId>
}

#[utoipa::path(
	get,
	path = "profile",
	operation_id = "leaderboard_profile",
	params(
		("user_id" = Option<i32>, Query, description = "whose profile to show, defaults to your own")
	),
	responses(
		(status = OK, body = ProfileSummary, description = "points, rank and solved challenges, newest first"),
		(status = NOT_FOUND, description = "user has no profile yet")
	),
	security(
		("user_api_key" = [])
	),
	tag = "leaderboard"
)]
pub async fn profile(State(state): State<AppState>, user: JWTUser, Query(query): Query<ProfileQuery>) -> Result<Json<ProfileSummary>, ApiError> {
	let user_id = query.user_id.unwrap_or(user.user_id);

	match state.service().profile_summary(user_id).await {
		Ok(Some(summary)) => Ok(Json(summary)),
		Ok(None) => Err(reject(StatusCode::NOT_FOUND, "NOT_FOUND")),
		Err(e) => Err(internal(e))
	}
}
