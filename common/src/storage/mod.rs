pub mod db;
pub mod indexes;
pub mod types;
