// Application layer - analysis session components and use cases
pub mod analysis_repository;
pub mod analysis_service;
pub mod crop_workflow;
pub mod export_controller;
#[cfg(test)]
pub mod fake_backend;
pub mod frame;
pub mod layout_builder;
pub mod notices;
pub mod segment_manager;
pub mod selection;
pub mod series_cache;
pub mod session;
pub mod trace_builder;
