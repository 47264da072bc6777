pub mod catalogue;
pub mod core;
pub mod correction;
pub mod fees;
pub mod restricted;
pub mod selection;
pub mod setup;
pub mod students;
