use std::sync::Arc;
use jwt_simple::prelude::HS256Key;
use ctf_arena::challd::ChalldClient;
use ctf_arena::config::Config;
use ctf_arena::labs::LabManager;
use ctf_arena::ports::PortAllocator;
use ctf_arena::service::ArenaService;
use ctf_arena::store::{PgStore, StoreError};

pub type Arena = ArenaService<PgStore, ChalldClient>;

pub struct InternalState {
	service: Arena,
	jwt_key: HS256Key
}

pub type AppState = Arc<InternalState>;

impl InternalState {
	pub async fn new(config: &Config) -> Result<AppState, StoreError> {
		let store = PgStore::connect(&config.database_url).await?;
		let labs = LabManager::connect(ChalldClient::new(config.challd_socket.clone()), PortAllocator::default()).await;

		Ok(Arc::new(InternalState {
			service: ArenaService::new(store, labs),
			jwt_key: HS256Key::from_bytes(&config.jwt_secret)
		}))
	}

	pub fn service(&self) -> &Arena {
		&self.service
	}

	pub fn jwt_key(&self) -> &HS256Key {
		&self.jwt_key
	}
}
