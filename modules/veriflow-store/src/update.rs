//! Typed, conditional patches applied atomically to one verification.

use chrono::{DateTime, Utc};
use veriflow_common::{
    FactCheckData, MediaPlayback, MediaState, PreviewData, ProcessingStatus, ScoreData, SocialMediaScrapeDetails,
    StatusField, Translations, Verification, VideoSummary,
};

/// Precondition on a status field's current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    Is(StatusField, ProcessingStatus),
    IsNot(StatusField, ProcessingStatus),
}

impl Guard {
    fn holds(&self, v: &Verification) -> bool {
        match *self {
            Guard::Is(field, status) => v.status(field) == Some(status),
            Guard::IsNot(field, status) => v.status(field) != Some(status),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusWrite {
    pub field: StatusField,
    pub status: ProcessingStatus,
    /// Driven by a new inbound message, so terminal states may be left.
    pub reentry: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldSet {
    Title(Option<String>),
    TextContent(Option<String>),
    PreviewData(PreviewData),
    IsPublic(bool),
    Error(Option<String>),
    TraceId(String),
    FactCheckData(FactCheckData),
    Score {
        score: f64,
        score_data: ScoreData,
        valid_until: DateTime<Utc>,
    },
    YoutubeId(String),
    AiVideoSummary(VideoSummary),
    SocialDetails(SocialMediaScrapeDetails),
    SocialError(Option<String>),
    MediaState(MediaState),
    TranscodeJob {
        name: String,
        playback: MediaPlayback,
    },
    Translations(Translations),
    TranslationCompletedAt(DateTime<Utc>),
    TranslationError(Option<String>),
}

impl FieldSet {
    fn apply(&self, v: &mut Verification) {
        match self {
            FieldSet::Title(t) => v.title = t.clone(),
            FieldSet::TextContent(t) => v.text_content = t.clone(),
            FieldSet::PreviewData(p) => v.preview_data = Some(p.clone()),
            FieldSet::IsPublic(b) => v.is_public = *b,
            FieldSet::Error(e) => v.error = e.clone(),
            FieldSet::TraceId(t) => v.trace_id = Some(t.clone()),
            FieldSet::FactCheckData(d) => v.fact_check_data = Some(d.clone()),
            FieldSet::Score {
                score,
                score_data,
                valid_until,
            } => {
                v.score = Some(*score);
                v.score_data = Some(score_data.clone());
                v.valid_until = Some(*valid_until);
            }
            FieldSet::YoutubeId(id) => v.youtube_id = Some(id.clone()),
            FieldSet::AiVideoSummary(s) => v.ai_video_summary = Some(s.clone()),
            FieldSet::SocialDetails(d) => v.social_media_scrape_details = Some(d.clone()),
            FieldSet::SocialError(e) => v.social_media_scrape_error = e.clone(),
            FieldSet::MediaState(s) => v.media_state = Some(*s),
            FieldSet::TranscodeJob { name, playback } => {
                v.transcode_job_name = Some(name.clone());
                v.playback = Some(playback.clone());
            }
            FieldSet::Translations(t) => {
                for (field, langs) in t {
                    v.translations.insert(field.clone(), langs.clone());
                }
            }
            FieldSet::TranslationCompletedAt(at) => v.translation_completed_at = Some(*at),
            FieldSet::TranslationError(e) => v.translation_error = e.clone(),
        }
    }
}

/// Result of applying an update to one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    NotFound,
    /// A guard or status transition did not hold; nothing was written.
    Rejected(String),
}

impl ApplyOutcome {
    pub fn applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerificationUpdate {
    guards: Vec<Guard>,
    statuses: Vec<StatusWrite>,
    fields: Vec<FieldSet>,
}

impl VerificationUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward progress of a status field.
    pub fn status(mut self, field: StatusField, status: ProcessingStatus) -> Self {
        self.statuses.push(StatusWrite {
            field,
            status,
            reentry: false,
        });
        self
    }

    /// Status write triggered by a new inbound message; may leave a terminal state.
    pub fn reenter(mut self, field: StatusField, status: ProcessingStatus) -> Self {
        self.statuses.push(StatusWrite {
            field,
            status,
            reentry: true,
        });
        self
    }

    pub fn only_if(mut self, guard: Guard) -> Self {
        self.guards.push(guard);
        self
    }

    pub fn set(mut self, field: FieldSet) -> Self {
        self.fields.push(field);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty() && self.fields.is_empty()
    }

    /// Check every guard and transition, then write. All or nothing.
    pub fn apply_to(&self, v: &mut Verification) -> Result<(), String> {
        for guard in &self.guards {
            if !guard.holds(v) {
                return Err(format!("guard {guard:?} failed"));
            }
        }
        for w in &self.statuses {
            let current = v.status(w.field);
            if !ProcessingStatus::can_transition(current, w.status, w.reentry) {
                let from = current.map(|s| s.to_string()).unwrap_or_else(|| "absent".into());
                return Err(format!("{} {from} -> {} not allowed", w.field, w.status));
            }
        }

        for w in &self.statuses {
            v.statuses.set(w.field, w.status);
        }
        for f in &self.fields {
            f.apply(v);
        }
        v.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use ProcessingStatus::*;

    fn verification() -> Verification {
        Verification::new("owner", Uuid::new_v4())
    }

    #[test]
    fn progress_write_cannot_leave_terminal_state() {
        let mut v = verification();
        v.statuses.set(StatusField::FactCheck, Completed);

        let update = VerificationUpdate::new()
            .status(StatusField::FactCheck, Pending)
            .set(FieldSet::IsPublic(false));
        assert!(update.apply_to(&mut v).is_err());
        assert!(v.is_public, "rejected update must not write anything");
    }

    #[test]
    fn reentry_write_may_restart_completed_field() {
        let mut v = verification();
        v.statuses.set(StatusField::FactCheck, Completed);

        VerificationUpdate::new()
            .reenter(StatusField::FactCheck, Pending)
            .apply_to(&mut v)
            .unwrap();
        assert_eq!(v.status(StatusField::FactCheck), Some(Pending));
    }

    #[test]
    fn guard_blocks_claim_of_pending_field() {
        let mut v = verification();
        v.statuses.set(StatusField::AiVideoSummary, Pending);

        let claim = VerificationUpdate::new()
            .only_if(Guard::IsNot(StatusField::AiVideoSummary, Pending))
            .reenter(StatusField::AiVideoSummary, Pending);
        assert!(claim.apply_to(&mut v).is_err());
    }

    #[test]
    fn translations_merge_per_field() {
        let mut v = verification();
        let mut first = Translations::new();
        first.insert("title".into(), [("en".to_string(), "Hi".to_string())].into());
        let mut second = Translations::new();
        second.insert("text_content".into(), [("ka".to_string(), "გამარჯობა".to_string())].into());

        VerificationUpdate::new().set(FieldSet::Translations(first)).apply_to(&mut v).unwrap();
        VerificationUpdate::new().set(FieldSet::Translations(second)).apply_to(&mut v).unwrap();
        assert_eq!(v.translations.len(), 2);
    }
}
