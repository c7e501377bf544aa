pub mod app;
pub mod update;
