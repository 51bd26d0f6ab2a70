pub mod bootstrapper;
pub mod state;
