pub mod absences;
pub mod backup_exchange;
pub mod core;
pub mod reports;
pub mod roster;
pub mod settings;
pub mod supervision;
