mod container;
use container::{Container, CreateError};

mod lifetime;
use lifetime::End;

mod ports;

mod protocol;
use protocol::Request;

mod slots;
use slots::Slots;

use bollard::Docker;
use tokio::net::{UnixListener, UnixStream};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::signal::unix::SignalKind;
use tokio_util::task::TaskTracker;
use tokio_util::sync::CancellationToken;
use thiserror::Error;
use std::collections::HashSet;
use std::os::unix::fs::PermissionsExt;
use std::sync::{Arc, Mutex, PoisonError};
use std::str::FromStr;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use core::time::Duration;

const DEFAULT_SOCKET_PATH: &str = "/etc/challd/challd.sock";
const DEFAULT_MAX_INSTANCES: usize = 6;
const DEFAULT_LIFETIME_SECS: u64 = 4 * 60 * 60;

/// grace period for containers stopped by the daemon itself
const STOP_TIMEOUT_SECS: u16 = 2;

#[derive(Debug, Error)]
enum StartupError {
	#[error("invalid value for {key}: {value:?}")]
	InvalidEnv {
		key: &'static str,
		value: String
	},
	#[error("couldn't reach docker: {0}")]
	Docker(#[from] bollard::errors::Error),
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
	#[cfg(feature = "challd_group")]
	#[error("couldn't hand the socket to the challd group")]
	Chown
}

fn env_or<T: FromStr>(key: &'static str, default: T) -> Result<T, StartupError> {
	match std::env::var(key) {
		Ok(value) => value.parse().map_err(|_| StartupError::InvalidEnv { key, value }),
		Err(_) => Ok(default)
	}
}

struct Daemon {
	docker: Docker,
	slots: Slots,
	running: Mutex<HashSet<String>>,
	lifetime: Duration,
	tracker: TaskTracker,
	token: CancellationToken
}

impl Daemon {
	fn is_tracked(&self, id: &str) -> bool {
		self.running.lock().unwrap_or_else(PoisonError::into_inner).contains(id)
	}

	fn track(&self, id: String) {
		self.running.lock().unwrap_or_else(PoisonError::into_inner).insert(id);
	}

	fn untrack(&self, id: &str) {
		self.running.lock().unwrap_or_else(PoisonError::into_inner).remove(id);
	}

	async fn serve(self: &Arc<Self>, request: Request) -> Vec<u8> {
		match request {
			Request::Ping => match self.docker.ping().await {
				Ok(_) => vec![protocol::RESULT_OK],
				Err(e) => {
					log::error!("docker ping failed: {e}");
					vec![protocol::RESULT_RUNTIME_ERROR]
				}
			},
			Request::Run { image, ports, limits } => self.run(image, ports, limits).await,
			// only containers we started or adopted are ours to stop or inspect
			Request::Stop { id, timeout_secs } => {
				if !self.is_tracked(&id) {
					log::debug!("asked to stop untracked container {id:?}");
					return vec![protocol::RESULT_OK];
				}

				match container::stop(&self.docker, &id, timeout_secs).await {
					Ok(()) => {
						log::info!("stopped container {id:?}");
						vec![protocol::RESULT_OK]
					},
					Err(e) => {
						log::error!("failed to stop container {id:?}: {e}");
						vec![protocol::RESULT_RUNTIME_ERROR]
					}
				}
			},
			Request::Status { id } => {
				if !self.is_tracked(&id) {
					return protocol::status(container::Status::NotFound);
				}

				match container::status(&self.docker, &id).await {
					Ok(status) => protocol::status(status),
					Err(e) => {
						log::error!("failed to inspect container {id:?}: {e}");
						vec![protocol::RESULT_RUNTIME_ERROR]
					}
				}
			}
		}
	}

	/// tracks the container until it ends, then gives its slot back
	fn supervise(self: &Arc<Self>, lab: Container, slot: usize, lifetime: Duration) {
		let id = lab.id().to_owned();
		self.track(id.clone());

		let cleanup = {
			let daemon = self.clone();

			move |end| async move {
				if end != End::Exited {
					if let Err(e) = container::stop(&daemon.docker, &id, STOP_TIMEOUT_SECS).await {
						log::error!("failed to stop container {id:?}: {e}");
					}
				}

				daemon.untrack(&id);
				daemon.slots.release(slot);
				log::info!("container {id:?} is done ({end:?}), {} slots in use", daemon.slots.in_use());
			}
		};

		lifetime::watch(&self.tracker, cleanup, lifetime, self.token.child_token(), lab.shutdown_signal());
	}

	/// picks up lab containers left running by a previous run of the daemon
	async fn adopt_running(self: &Arc<Self>) -> Result<(), bollard::errors::Error> {
		let now = SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs() as i64);

		for (id, created) in container::running_labs(&self.docker).await? {
			let Some(slot) = self.slots.take() else {
				log::warn!("no slot left for leftover container {id:?}, stopping it");
				if let Err(e) = container::stop(&self.docker, &id, STOP_TIMEOUT_SECS).await {
					log::error!("failed to stop container {id:?}: {e}");
				}
				continue;
			};

			let lifetime = lifetime::remaining(self.lifetime, created, now);
			log::info!("adopted container {id:?} in slot {slot}, {}s left", lifetime.as_secs());
			self.supervise(Container::adopt(&self.docker, id), slot, lifetime);
		}

		Ok(())
	}

	async fn run(self: &Arc<Self>, image: String, ports: ports::PortMappings, limits: container::Limits) -> Vec<u8> {
		let Some(slot) = self.slots.take() else {
			log::warn!("refusing to start {image:?}, all slots are in use");
			return vec![protocol::RESULT_BUSY];
		};

		log::info!("starting {image:?} with ports {ports:?} and limits {limits:?}");

		let lab = match Container::create(&self.docker, image, ports, limits).await {
			Ok(lab) => lab,
			Err(e) => {
				self.slots.release(slot);
				log::warn!("failed to start container: {e}");

				return vec![match e {
					CreateError::ImageNotFound => protocol::RESULT_IMAGE_NOT_FOUND,
					CreateError::PortInUse => protocol::RESULT_PORT_IN_USE,
					CreateError::Docker(_) => protocol::RESULT_RUNTIME_ERROR
				}];
			}
		};

		let id = lab.id().to_owned();
		log::info!("started container {id:?} in slot {slot}");
		self.supervise(lab, slot, self.lifetime);

		protocol::container_id(&id)
	}
}

async fn handle(daemon: Arc<Daemon>, stream: UnixStream) {
	let mut stream = BufReader::new(stream);

	let response = match protocol::read_request(&mut stream).await {
		Ok(request) => daemon.serve(request).await,
		Err(code) => {
			log::debug!("rejected request with code {code}");
			vec![code]
		}
	};

	// as the daemon, we don't really care if the client reads this
	let _ = stream.write_all(&response).await;
	let _ = stream.shutdown().await;
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
	let socket_path = std::env::var_os("SOCKET_PATH").map(PathBuf::from).unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH));
	let max_instances = env_or("MAX_INSTANCES", DEFAULT_MAX_INSTANCES)?;
	let lifetime = Duration::from_secs(env_or("LAB_LIFETIME_SECS", DEFAULT_LIFETIME_SECS)?);

	let docker = Docker::connect_with_unix_defaults()?;
	docker.ping().await?;

	let daemon = Arc::new(Daemon {
		docker,
		slots: Slots::new(max_instances),
		running: Mutex::new(HashSet::new()),
		lifetime,
		tracker: TaskTracker::new(),
		token: CancellationToken::new()
	});

	daemon.adopt_running().await?;

	let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;

	if socket_path.exists() {
		log::warn!("removing stale socket at {}", socket_path.display());
		std::fs::remove_file(&socket_path)?;
	}

	// the socket is briefly world-connectable between bind and chmod, but only
	// the handful of requests above ever reach docker
	let listener = UnixListener::bind(&socket_path)?;

	#[cfg(feature = "challd_group")]
	if !tokio::process::Command::new("chown")
		.args([std::ffi::OsStr::new("root:challd"), socket_path.as_os_str()])
		.status().await?.success() {
		return Err(StartupError::Chown);
	}

	std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o720))?;

	log::info!("listening on {} with {max_instances} slots", socket_path.display());

	loop {
		tokio::select! {
			accepted = listener.accept() => match accepted {
				Ok((stream, _addr)) => {
					tokio::spawn(handle(daemon.clone(), stream));
				},
				Err(e) => log::warn!("failed to accept connection: {e}")
			},
			Ok(()) = tokio::signal::ctrl_c() => {
				break
			},
			Some(()) = sigterm.recv() => {
				break
			}
		};
	}

	log::info!("shutting down, stopping {} containers", daemon.slots.in_use());

	daemon.token.cancel();
	daemon.tracker.close();
	daemon.tracker.wait().await;
	drop(listener);
	std::fs::remove_file(&socket_path)?;

	Ok(())
}
