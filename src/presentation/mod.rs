// Presentation layer - HTTP routes over the analysis service
pub mod app_state;
pub mod handlers;
