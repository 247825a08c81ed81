use std::sync::Arc;

use config::Config;
use store::Store;
use tokio_util::sync::CancellationToken;

use crate::active::ActiveSlots;
use crate::events::EventBus;

/// Shared daemon state, passed by clone into every loop, worker, and
/// API handler. Cheap to clone: everything inside is an `Arc` or a
/// `&'static` reference.
#[derive(Clone)]
pub struct AppState {
  pub config: &'static Config,
  pub store: Store,
  pub active: Arc<ActiveSlots>,
  pub events: Arc<EventBus>,
  pub shutdown: CancellationToken,
}

impl AppState {
  pub fn new(config: &'static Config, store: Store) -> Self {
    Self {
      config,
      store,
      active: Arc::new(ActiveSlots::default()),
      events: Arc::new(EventBus::new(config.event_history_capacity)),
      shutdown: CancellationToken::new(),
    }
  }
}
