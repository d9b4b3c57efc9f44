pub mod deps;
pub mod fact_check;
pub mod health;
pub mod http;
pub mod interactions;
pub mod media;
pub mod messages;
pub mod social;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;
pub mod translation;
pub mod video;
pub mod workers;

pub use deps::{PipelineDeps, PipelineSettings};
pub use fact_check::{FactCheckOrchestrator, FactCheckOutcome, FactCheckRun};
pub use interactions::InteractionNotifier;
pub use media::MediaPipeline;
pub use social::{SocialMediaPipeline, SocialOutcome};
pub use translation::{TranslationOutcome, TranslationPipeline};
pub use video::{VideoOutcome, VideoPipeline};
