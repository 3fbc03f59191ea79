//! Slot-game LUT analyzer, simulator, and session-server library.
//!
//! `Library` is the facade: it owns one of each store/engine the way
//! `AppState` in a binary main owns one of each live engine, so a caller
//! only has to construct one value to get the whole data plane running.

pub mod compliance;
pub mod config;
pub mod error;
pub mod events;
pub mod hub;
pub mod index;
pub mod loader;
pub mod lut;
pub mod sampler;
pub mod session;
pub mod simulate;
pub mod watcher;

use std::sync::Arc;

pub use config::LibraryConfig;
pub use error::{LutError, Result};

use events::EventsStore;
use hub::Hub;
use loader::BackgroundLoader;
use lut::LutStore;
use session::SessionManager;
use watcher::Watcher;

/// Owns one instance of every store/engine, wired together the way a
/// transport layer would: construct once at startup, hand clones of the
/// cheap handles (`Hub`, `Arc<LutStore>`, ...) to whatever serves requests.
pub struct Library {
    pub config: LibraryConfig,
    pub hub: Hub,
    pub lut: Arc<LutStore>,
    pub events: Arc<EventsStore>,
    pub loader: Arc<BackgroundLoader>,
    pub sessions: SessionManager,
    pub watcher: Option<Watcher>,
}

impl Library {
    /// Opens the LUT store, builds the events store, starts the background
    /// loader, and starts the directory watcher. Fatal only if the index
    /// fails to parse or the hub can't be built (§7).
    pub fn open(config: LibraryConfig) -> Result<Self> {
        let hub = Hub::new(config.hub_inbound_queue, config.hub_subscriber_queue);
        let lut = Arc::new(LutStore::open(&config.data_dir)?);
        let events = Arc::new(EventsStore::new(&config));
        let loader = BackgroundLoader::new(config.clone(), lut.clone(), events.clone(), hub.clone());
        let sessions = SessionManager::new(config.clone(), lut.clone(), events.clone(), hub.clone());

        for mode in lut.list_modes() {
            loader.load_mode(mode);
        }

        let watcher = Watcher::start(
            &config.data_dir,
            config.watcher_debounce_ms,
            loader.clone(),
            lut.clone(),
            hub.clone(),
        )
        .ok();

        Ok(Self {
            config,
            hub,
            lut,
            events,
            loader,
            sessions,
            watcher,
        })
    }

    pub fn compliance(&self) -> compliance::ComplianceChecker<'_> {
        compliance::ComplianceChecker::new(&self.lut)
    }

    pub fn single_mode_simulator(&self) -> simulate::SingleModeSimulator {
        simulate::SingleModeSimulator::new(self.lut.clone())
    }

    pub fn crowd_simulator(&self) -> simulate::CrowdSimulator {
        simulate::CrowdSimulator::new(self.lut.clone(), self.hub.clone())
    }
}
