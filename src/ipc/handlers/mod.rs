pub mod backup_exchange;
pub mod classes;
pub mod core;
pub mod courses;
pub mod events;
pub mod fees;
pub mod gallery;
pub mod ledger_view;
pub mod lessons;
pub mod payments;
pub mod reports;
pub mod results;
pub mod sessions;
pub mod setup;
pub mod students;
