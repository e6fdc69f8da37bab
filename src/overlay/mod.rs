pub mod controller;
pub mod state;

pub use controller::{OverlayController, PageHost};
pub use state::{should_show, OverlayState};
