use diesel::Connection;
use diesel_async::AsyncPgConnection;
use diesel_async::async_connection_wrapper::AsyncConnectionWrapper;
use diesel_migrations::{MigrationHarness, EmbeddedMigrations, embed_migrations};
use thiserror::Error;

pub type Pool = diesel_async::pooled_connection::bb8::Pool<AsyncPgConnection>;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[derive(Debug, Error)]
pub enum MigrationError {
	#[error("couldn't connect to the database: {0}")]
	Connection(#[from] diesel::ConnectionError),
	#[error("migration failed: {0}")]
	Migration(String),
	#[error("migration task panicked: {0}")]
	Join(#[from] tokio::task::JoinError)
}

/// migrations are synchronous, so they run on a blocking thread over a wrapped async connection
pub async fn run_migrations(url: &str) -> Result<(), MigrationError> {
	let url = url.to_owned();

	tokio::task::spawn_blocking(move || {
		let mut conn = AsyncConnectionWrapper::<AsyncPgConnection>::establish(&url)?;
		let applied = conn.run_pending_migrations(MIGRATIONS).map_err(|e| MigrationError::Migration(e.to_string()))?;

		for migration in applied {
			log::info!("applied migration {migration}");
		}

		Ok(())
	}).await?
}
