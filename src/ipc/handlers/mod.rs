pub mod classes;
pub mod core;
pub mod reports;
pub mod roster;
pub mod rules;
pub mod setup;
