//! Shared handler state.

use std::sync::Arc;

use alert_engine::collaborators::memory::StaticTechnicianDirectory;
use alert_engine::Engine;

pub struct AppState {
  pub engine: Engine,
  /// Roster behind the engine's technician directory.
  pub directory: Arc<StaticTechnicianDirectory>,
}
