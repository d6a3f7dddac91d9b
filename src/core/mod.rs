pub mod db;
pub mod landscape;
pub mod timebase;
