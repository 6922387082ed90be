use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use thiserror::Error;
use ctf_arena::config::{Config, ConfigError};
use ctf_arena::db::{self, MigrationError};
use ctf_arena::store::StoreError;

// authentication stuff
mod security_addon;
mod jwt;

// api routes
mod api;
mod errors;

mod state;

use api::{challenges, labs, leaderboard, tournaments, teams};
use security_addon::SecurityAddon;

#[derive(OpenApi)]
#[openapi(
	info(
		title = "CTF Arena API",
		description = "Flag submission, scoring, tournaments and on-demand lab containers."
	),
	servers(
		(url = "http://127.0.0.1:8080", description = "development")
	),
	modifiers(&SecurityAddon),
	nest(
		(path = "/api/challenges/", api = challenges::ChallengesApi),
		(path = "/api/labs/", api = labs::LabsApi),
		(path = "/api/leaderboard/", api = leaderboard::LeaderboardApi),
		(path = "/api/tournaments/", api = tournaments::TournamentsApi),
		(path = "/api/teams/", api = teams::TeamsApi)
	),
	tags(
		(name = "challenges", description = "submit flags and browse the practice list"),
		(name = "labs", description = "per-player challenge containers"),
		(name = "leaderboard", description = "global scores and profiles"),
		(name = "tournaments", description = "tournament registration"),
		(name = "teams", description = "team management")
	)
)]
struct ApiDoc;

#[derive(Debug, Error)]
enum StartupError {
	#[error("configuration error: {0}")]
	Config(#[from] ConfigError),
	#[error("{0}")]
	Migration(#[from] MigrationError),
	#[error("couldn't set up the store: {0}")]
	Store(#[from] StoreError),
	#[error("io error: {0}")]
	Io(#[from] std::io::Error)
}

#[tokio::main]
async fn main() {
	pretty_env_logger::init();

	if let Err(e) = run().await {
		log::error!("{e}");
		std::process::exit(1);
	}
}

async fn run() -> Result<(), StartupError> {
	let config = Config::load()?;

	db::run_migrations(&config.database_url).await?;

	let state = state::InternalState::new(&config).await?;

	// auth is a header, not a cookie, so any origin is fine
	let cors = tower_http::cors::CorsLayer::new()
		.allow_origin(tower_http::cors::Any)
		.allow_methods(tower_http::cors::Any)
		.allow_headers(tower_http::cors::Any);

	let app = axum::Router::new()
		.route("/api/challenges/submit", axum::routing::post(challenges::submit))
		.route("/api/challenges/list", axum::routing::get(challenges::list))
		.route("/api/labs/start", axum::routing::post(labs::start))
		.route("/api/labs/current", axum::routing::get(labs::current))
		.route("/api/labs/stop", axum::routing::delete(labs::stop))
		.route("/api/leaderboard/top", axum::routing::get(leaderboard::top))
		.route("/api/leaderboard/profile", axum::routing::get(leaderboard::profile))
		.route("/api/tournaments/register", axum::routing::post(tournaments::register))
		.route("/api/teams/create", axum::routing::post(teams::create))
		.route("/api/teams/join", axum::routing::post(teams::join))
		.route("/api/teams/remove_member", axum::routing::delete(teams::remove_member))
		.with_state(state)
		.layer(cors)
		.merge(
			SwaggerUi::new("/swagger").url("/api/openapi.json", ApiDoc::openapi())
		);

	let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
	log::info!("listening on {}", config.bind_address);
	axum::serve(listener, app).await?;

	Ok(())
}
