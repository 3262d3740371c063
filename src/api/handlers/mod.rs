pub mod health;
pub mod history;
pub mod plugs;

use crate::monitor::SharedMonitor;

#[derive(Clone)]
pub struct AppState {
    pub monitor: SharedMonitor,
}
