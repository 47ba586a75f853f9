pub mod insights;
pub mod jobs;
pub mod orchestrator;
pub mod rankings;
pub mod sources;
pub mod visibility;
