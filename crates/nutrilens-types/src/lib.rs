pub mod ai;
pub mod api;
