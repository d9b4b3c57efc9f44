use veriflow_common::Verification;

/// Which signal the statement was taken from. Logged per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementSource {
    EnglishText,
    VideoStatements,
    VideoRelevantStatements,
    VideoSummary,
    TextContent,
}

impl StatementSource {
    pub fn as_str(self) -> &'static str {
        match self {
            StatementSource::EnglishText => "english_text",
            StatementSource::VideoStatements => "video_statements",
            StatementSource::VideoRelevantStatements => "video_relevant_statements",
            StatementSource::VideoSummary => "video_summary",
            StatementSource::TextContent => "text_content",
        }
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// Best available textual signal, in priority order: English text, video
/// statements, video relevant statements, video short summary, raw text.
pub fn extract_statement(v: &Verification) -> Option<(String, StatementSource)> {
    if let Some(text) = non_blank(v.text_content_in_english.as_deref()) {
        return Some((text.to_string(), StatementSource::EnglishText));
    }

    if let Some(summary) = &v.ai_video_summary {
        let statements: Vec<&str> = summary
            .statements
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();
        if !statements.is_empty() {
            return Some((statements.join(" "), StatementSource::VideoStatements));
        }

        let relevant: Vec<&str> = summary
            .relevant_statements
            .iter()
            .map(|s| s.text.trim())
            .filter(|s| !s.is_empty())
            .collect();
        if !relevant.is_empty() {
            return Some((
                format!("Video Relevant Statements: {}", relevant.join(" ")),
                StatementSource::VideoRelevantStatements,
            ));
        }

        if let Some(short) = non_blank(summary.short_summary.as_deref()) {
            return Some((format!("Video Summary: {short}"), StatementSource::VideoSummary));
        }
    }

    non_blank(v.text_content.as_deref()).map(|t| (t.to_string(), StatementSource::TextContent))
}

/// Statement plus OCR text, when there is any.
pub fn combine_with_ocr(statement: &str, ocr_text: Option<&str>) -> String {
    match ocr_text {
        Some(ocr) if statement.is_empty() => format!("Text extracted from images:\n{ocr}"),
        Some(ocr) => format!("{statement}\n\nText extracted from images:\n{ocr}"),
        None => statement.to_string(),
    }
}
