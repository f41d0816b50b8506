// Application state for HTTP handlers
use crate::application::analysis_service::AnalysisService;

#[derive(Clone)]
pub struct AppState {
    pub analysis_service: AnalysisService,
}
