pub mod answer;
pub mod brand;
pub mod prompt;
pub mod run;
pub mod snapshot;

pub use answer::{Answer, AnswerBundle, Citation, Mention, RunRecord};
pub use brand::{Brand, Competitor, Entity, EntitySpec, NewBrand, NewCompetitor};
pub use prompt::{NewPrompt, Prompt, RunFilter};
pub use run::{
    JoinPolicy, ProviderId, ProviderRun, RunCompletion, RunStatus, UnknownProvider,
    UnknownRunStatus,
};
pub use snapshot::{BrandRankingSnapshot, SourceAgg, VisibilitySnapshot, OVERALL_TOPIC};
