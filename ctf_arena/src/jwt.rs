use jwt_simple::prelude::*;
use axum::extract::FromRequestParts;
use axum::http::{request::Parts, StatusCode, header::HeaderValue};
use ctf_arena::models::UserId;
use crate::state::AppState;

pub const USER_HEADER: &str = "user_jwt";

/// issued by the login service, we only ever verify it
#[derive(Debug, Serialize, Deserialize)]
pub struct JWTUser {
	pub user_id: UserId
}

impl JWTUser {
	fn verify(key: &HS256Key, header: Option<&HeaderValue>) -> Result<Self, StatusCode> {
		let Some(Ok(token)) = header.map(HeaderValue::to_str) else {
			return Err(StatusCode::UNAUTHORIZED);
		};

		match key.verify_token::<Self>(token, None) {
			Ok(claims) => Ok(claims.custom),
			Err(e) => {
				log::debug!("rejected user token: {e}");
				Err(StatusCode::UNAUTHORIZED)
			}
		}
	}
}

impl FromRequestParts<AppState> for JWTUser {
	type Rejection = StatusCode;

	async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
		Self::verify(state.jwt_key(), parts.headers.get(USER_HEADER))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn token(key: &HS256Key, user_id: UserId) -> HeaderValue {
		let claims = Claims::with_custom_claims(JWTUser { user_id }, Duration::from_hours(1));
		HeaderValue::from_str(&key.authenticate(claims).unwrap()).unwrap()
	}

	#[test]
	fn accepts_tokens_signed_with_our_key() {
		let key = HS256Key::generate();
		assert_eq!(JWTUser::verify(&key, Some(&token(&key, 42))).unwrap().user_id, 42);
	}

	#[test]
	fn rejects_foreign_and_missing_tokens() {
		let key = HS256Key::generate();
		let foreign = token(&HS256Key::generate(), 42);

		assert_eq!(JWTUser::verify(&key, Some(&foreign)).unwrap_err(), StatusCode::UNAUTHORIZED);
		assert_eq!(JWTUser::verify(&key, None).unwrap_err(), StatusCode::UNAUTHORIZED);
		assert_eq!(JWTUser::verify(&key, Some(&HeaderValue::from_static("garbage"))).unwrap_err(), StatusCode::UNAUTHORIZED);
	}
}
