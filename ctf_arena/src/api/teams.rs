use serde::{Serialize, Deserialize};
use axum::{Json, extract::{State, Query}, http::StatusCode};
use utoipa::{OpenApi, ToSchema};
use ctf_arena::models::{Team, TeamId, UserId};
use ctf_arena::service::TeamError;
use crate::errors::{ApiError, ErrorBody, internal, reject};
use crate::jwt::JWTUser;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
	paths(create, join, remove_member),
	components(schemas(CreateTeam, JoinTeam, TeamInfo, ErrorBody))
)]
pub struct TeamsApi;

#[derive(Serialize, ToSchema)]
pub struct TeamInfo {
	id: TeamId,
	#[schema(example = "Kiber Qalqon")]
	name: String,
	captain_id: UserId,
	/// share this with whoever should join
	invite_token: String
}

impl From<Team> for TeamInfo {
	fn from(team: Team) -> Self {
		Self {
			id: team.id,
			name: team.name,
			captain_id: team.captain_id,
			invite_token: team.invite_token
		}
	}
}

fn team_error(e: TeamError) -> ApiError {
	let status = match &e {
		TeamError::InvalidName | TeamError::CannotRemoveCaptain => StatusCode::BAD_REQUEST,
		TeamError::NameTaken | TeamError::AlreadyInTeam => StatusCode::CONFLICT,
		TeamError::InvalidToken | TeamError::NotAMember => StatusCode::NOT_FOUND,
		TeamError::NotCaptain => StatusCode::FORBIDDEN,
		TeamError::Randomness(_) | TeamError::Backend(_) => return internal(e)
	};

	reject(status, e.code())
}

#[derive(Deserialize, ToSchema)]
pub struct CreateTeam {
	#[schema(example = "Kiber Qalqon")]
	name: String
}

#[utoipa::path(
	post,
	path = "create",
	operation_id = "team_create",
	request_body = CreateTeam,
	responses(
		(status = CREATED, body = TeamInfo, description = "team created with you as its captain"),
		(status = BAD_REQUEST, body = ErrorBody, description = "`INVALID_NAME`"),
		(status = CONFLICT, body = ErrorBody, description = "`NAME_TAKEN` or `ALREADY_IN_TEAM`")
	),
	security(
		("user_api_key" = [])
	),
	tag = "teams"
)]
pub async fn create(State(state): State<AppState>, user: JWTUser, Json(body): Json<CreateTeam>) -> Result<(StatusCode, Json<TeamInfo>), ApiError> {
	let team = state.service().create_team(user.user_id, &body.name).await.map_err(team_error)?;
	Ok((StatusCode::CREATED, Json(team.into())))
}

#[derive(Deserialize, ToSchema)]
pub struct JoinTeam {
	invite_token: String
}

#[utoipa::path(
	post,
	path = "join",
	operation_id = "team_join",
	request_body = JoinTeam,
	responses(
		(status = OK, body = TeamInfo, description = "you are now a member of this team"),
		(status = NOT_FOUND, body = ErrorBody, description = "`INVALID_TOKEN`"),
		(status = CONFLICT, body = ErrorBody, description = "`ALREADY_IN_TEAM`")
	),
	security(
		("user_api_key" = [])
	),
	tag = "teams"
)]
pub async fn join(State(state): State<AppState>, user: JWTUser, Json(body): Json<JoinTeam>) -> Result<Json<TeamInfo>, ApiError> {
	state.service().join_team(user.user_id, &body.invite_token).await
		.map(|team| Json(team.into()))
		.map_err(team_error)
}

#[derive(Deserialize)]
pub struct RemoveMemberQuery {
	member_id: UserId
}

#[utoipa::path(
	delete,
	path = "remove_member",
	operation_id = "team_remove_member",
	params(
		("member_id" = i32, Query, description = "the member to remove from your team")
	),
	responses(
		(status = NO_CONTENT, description = "member removed"),
		(status = FORBIDDEN, body = ErrorBody, description = "`NOT_CAPTAIN`"),
		(status = BAD_REQUEST, body = ErrorBody, description = "`CANNOT_REMOVE_CAPTAIN`"),
		(status = NOT_FOUND, body = ErrorBody, description = "`NOT_A_MEMBER`")
	),
	security(
		("user_api_key" = [])
	),
	tag = "teams"
)]
pub async fn remove_member(State(state): State<AppState>, user: JWTUser, Query(query): Query<RemoveMemberQuery>) -> Result<StatusCode, ApiError> {
	state.service().remove_member(user.user_id, query.member_id).await.map_err(team_error)?;
	Ok(StatusCode::NO_CONTENT)
}
