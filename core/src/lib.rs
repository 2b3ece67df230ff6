pub mod category;
pub mod db;
pub mod matcher;
pub mod models;
pub mod planner;
pub mod quantity;
pub mod recompute;
pub mod service;
pub mod shopping;
