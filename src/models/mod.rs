// Re-export all model types from submodules
mod assignments;
mod payments;
mod sessions;
mod tasks;
mod users;
mod withdrawals;

pub use assignments::*;
pub use payments::*;
pub use sessions::*;
pub use tasks::*;
pub use users::*;
pub use withdrawals::*;
