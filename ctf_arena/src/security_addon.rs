use utoipa::Modify;
use utoipa::openapi::OpenApi;
use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};

pub struct SecurityAddon;

impl Modify for SecurityAddon {
	fn modify(&self, openapi: &mut OpenApi) {
		let components = openapi.components.get_or_insert_with(Default::default);

		components.add_security_scheme(
			"user_api_key",
			SecurityScheme::ApiKey(ApiKey::Header(
				ApiKeyValue::with_description(crate::jwt::USER_HEADER, "a JWT carrying the player's user id, issued at login")
			))
		);
	}
}
