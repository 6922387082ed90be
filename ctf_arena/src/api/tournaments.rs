use serde::{Serialize, Deserialize};
use axum::{Json, extract::State, http::StatusCode};
use chrono::Utc;
use utoipa::{OpenApi, ToSchema};
use ctf_arena::models::{Entrant, TournamentId};
use ctf_arena::service::RegistrationError;
use crate::errors::{ApiError, ErrorBody, internal, reject};
use crate::jwt::JWTUser;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
	paths(register),
	components(schemas(Register, Registered, ErrorBody))
)]
pub struct TournamentsApi;

#[derive(Deserialize, ToSchema)]
pub struct Register {
	tournament_id: TournamentId
}

#[derive(Serialize, ToSchema)]
#[serde(tag = "entrant", content = "id", rename_all = "snake_case")]
pub enum Registered {
	User(i32),
	Team(i32)
}

impl From<Entrant> for Registered {
	fn from(entrant: Entrant) -> Self {
		match entrant {
			Entrant::User(id) => Self::User(id),
			Entrant::Team(id) => Self::Team(id)
		}
	}
}

#[utoipa::path(
	post,
	path = "register",
	operation_id = "tournament_register",
	request_body = Register,
	responses(
		(status = OK, body = Registered, description = "registered (registering twice is fine), solo tournaments register you and team tournaments your team"),
		(status = NOT_FOUND, body = ErrorBody, description = "tournament doesn't exist"),
		(status = CONFLICT, body = ErrorBody, description = "`TOURNAMENT_ENDED`, or `NO_TEAM` for a team tournament"),
		(status = FORBIDDEN, body = ErrorBody, description = "`NOT_CAPTAIN`: only the captain registers a team")
	),
	security(
		("user_api_key" = [])
	),
	tag = "tournaments"
)]
pub async fn register(State(state): State<AppState>, user: JWTUser, Json(body): Json<Register>) -> Result<Json<Registered>, ApiError> {
	match state.service().register_for_tournament(user.user_id, body.tournament_id, Utc::now()).await {
		Ok(entrant) => Ok(Json(entrant.into())),
		Err(e @ RegistrationError::Backend(_)) => Err(internal(e)),
		Err(e) => Err(reject(match &e {
			RegistrationError::NotFound => StatusCode::NOT_FOUND,
			RegistrationError::NotCaptain => StatusCode::FORBIDDEN,
			_ => StatusCode::CONFLICT
		}, e.code()))
	}
}
