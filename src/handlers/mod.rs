pub mod assignments;
pub mod payments;
pub mod sessions;
pub mod tasks;
pub mod users;
pub mod withdrawals;
