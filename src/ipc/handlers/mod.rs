pub mod core;
pub mod dashboard;
pub mod lists;
pub mod records;
