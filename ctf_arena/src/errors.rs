use axum::Json;
use axum::http::StatusCode;
use core::fmt::Display;
use serde::Serialize;
use utoipa::ToSchema;

/// body of every non-2xx response
#[derive(Serialize, ToSchema)]
pub struct ErrorBody {
	#[schema(example = "ALREADY_RUNNING_ELSEWHERE")]
	pub code: &'static str
}

pub type ApiError = (StatusCode, Json<ErrorBody>);

pub fn reject(status: StatusCode, code: &'static str) -> ApiError {
	(status, Json(ErrorBody { code }))
}

pub fn internal<E: Display>(e: E) -> ApiError {
	log::error!("{e}");
	reject(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL")
}
