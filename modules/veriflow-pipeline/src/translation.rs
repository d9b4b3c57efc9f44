use std::collections::BTreeMap;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;
use veriflow_common::{PipelineError, ProcessingStatus, StatusField, Verification};
use veriflow_store::{ApplyOutcome, FieldSet, VerificationUpdate};

use crate::deps::PipelineDeps;

pub const TARGET_LANGUAGES: [&str; 5] = ["en", "ka", "es", "fr", "de"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslationOutcome {
    Completed { fields: usize },
    NothingToTranslate,
    NotFound,
}

/// Named source texts of a verification that get translated.
pub fn collect_texts(v: &Verification) -> BTreeMap<String, String> {
    let mut texts = BTreeMap::new();
    let mut put = |key: &str, value: Option<&str>| {
        if let Some(value) = value.map(str::trim).filter(|s| !s.is_empty()) {
            texts.insert(key.to_string(), value.to_string());
        }
    };

    put("text_content", v.text_content.as_deref());
    put("title", v.title.as_deref());
    put(
        "ai_video_summary",
        v.ai_video_summary.as_ref().and_then(|s| s.short_summary.as_deref()),
    );
    if let Some(data) = &v.fact_check_data {
        put("fact_check_reason", Some(&data.reason));
        put("fact_check_reason_summary", data.reason_summary.as_deref());
    }
    texts
}

#[derive(Clone)]
pub struct TranslationPipeline {
    deps: PipelineDeps,
}

impl TranslationPipeline {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }

    /// Translate every source text into the target languages. A translator
    /// failure is written as FAILED and returned.
    pub async fn translate(&self, id: Uuid) -> Result<TranslationOutcome, PipelineError> {
        let Some(v) = self.deps.store.get(id).await? else {
            warn!(verification_id = %id, "Verification not found for translation");
            return Ok(TranslationOutcome::NotFound);
        };

        let claim = VerificationUpdate::new().reenter(StatusField::Translation, ProcessingStatus::Pending);
        if let ApplyOutcome::NotFound = self.deps.store.apply(id, &claim).await? {
            return Ok(TranslationOutcome::NotFound);
        }

        let texts = collect_texts(&v);
        if texts.is_empty() {
            let done = VerificationUpdate::new()
                .status(StatusField::Translation, ProcessingStatus::Completed)
                .set(FieldSet::TranslationCompletedAt(Utc::now()));
            self.deps.store.apply(id, &done).await?;
            info!(verification_id = %id, "Nothing to translate");
            return Ok(TranslationOutcome::NothingToTranslate);
        }

        let translations = match self.deps.translator.translate(&texts, &TARGET_LANGUAGES).await {
            Ok(translations) => translations,
            Err(e) => {
                let failed = VerificationUpdate::new()
                    .status(StatusField::Translation, ProcessingStatus::Failed)
                    .set(FieldSet::TranslationError(Some(e.to_string())));
                self.deps.store.apply(id, &failed).await?;
                warn!(verification_id = %id, error = %e, "Translation failed");
                return Err(e.into());
            }
        };

        let fields = translations.len();
        let done = VerificationUpdate::new()
            .status(StatusField::Translation, ProcessingStatus::Completed)
            .set(FieldSet::Translations(translations))
            .set(FieldSet::TranslationCompletedAt(Utc::now()))
            .set(FieldSet::TranslationError(None));
        self.deps.store.apply(id, &done).await?;
        info!(verification_id = %id, fields, "Translation complete");
        Ok(TranslationOutcome::Completed { fields })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veriflow_common::{FactCheckData, VideoSummary};

    #[test]
    fn collects_fact_check_reason_under_prefixed_keys() {
        let mut v = Verification::new("owner", Uuid::new_v4()).with_text("claim");
        v.title = Some("  ".into());
        v.ai_video_summary = Some(VideoSummary {
            short_summary: Some("summary".into()),
            ..Default::default()
        });
        v.fact_check_data = Some(FactCheckData {
            factuality: 0.2,
            reason: "false".into(),
            reason_summary: Some("short".into()),
            score_justification: None,
            fact_status: None,
            references: Vec::new(),
            enhanced_statement: "claim".into(),
            combined_statement: None,
            extracted_image_text: None,
        });

        let texts = collect_texts(&v);
        assert_eq!(
            texts.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["ai_video_summary", "fact_check_reason", "fact_check_reason_summary", "text_content"]
        );
    }
}
