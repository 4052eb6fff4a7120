pub mod cancellation;
pub mod config;
pub mod event_bus;
pub mod state_machine;
pub mod storage;
pub mod stripe_lock;
pub mod transaction;

pub use cancellation::*;
pub use config::*;
pub use event_bus::*;
pub use state_machine::*;
pub use storage::*;
pub use stripe_lock::*;
pub use transaction::*;
