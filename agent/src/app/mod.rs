//! Application wiring

pub mod options;
pub mod run;
pub mod state;

pub use options::AppOptions;
pub use run::run;
pub use state::AppState;
