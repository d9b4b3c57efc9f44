//! User-facing push texts. Owners read these in Georgian.

use uuid::Uuid;
use veriflow_common::{NotificationKind, PushMessage};

pub const FACT_CHECK_STARTED_TITLE: &str = "ვამოწმებთ თქვენს ფოსტს";
pub const FACT_CHECK_STARTED_BODY: &str = "რამოდენიმე წუთში დასრულდება...";
pub const FACT_CHECK_FAILED_TITLE: &str = "ფოსტი ვერ გადამოწმდა";
pub const NO_CONTENT_BODY: &str = "არ შეიცავს გადასამოწმებელ მასალას";
pub const RETRY_BODY: &str = "სცადეთ ხელახლა";
pub const FACT_CHECK_COMPLETED_TITLE: &str = "ფაქტ ჩეკი დასრულდა";
pub const LINK_NOT_PUBLIC: &str = "ლინკი არ არის საჯარო";
pub const VIDEO_COMPLETE_TITLE: &str = "ვიდეოს ანალიზი დასრულდა";
pub const VIDEO_COMPLETE_BODY: &str = "ნახეთ";
pub const VIDEO_TOO_LONG_TITLE: &str = "ვიდეო ძალიან გრძელია";
pub const VIDEO_TOO_LONG_BODY: &str = "მხოლოდ 15 წუთამდე ვიდეოები შეიძლება დაამუშავოთ";

pub fn fact_check_started(id: Uuid) -> PushMessage {
    PushMessage::new(
        NotificationKind::FactCheckStarted,
        FACT_CHECK_STARTED_TITLE,
        FACT_CHECK_STARTED_BODY,
    )
    .for_verification(id)
}

pub fn fact_check_failed(id: Uuid, body: &str) -> PushMessage {
    PushMessage::new(NotificationKind::FactCheckFailed, FACT_CHECK_FAILED_TITLE, body).for_verification(id)
}

/// Body is the short reason when the model produced one.
pub fn fact_check_completed(id: Uuid, reason_summary: Option<&str>) -> PushMessage {
    PushMessage::new(
        NotificationKind::FactCheckCompleted,
        FACT_CHECK_COMPLETED_TITLE,
        reason_summary.unwrap_or_default(),
    )
    .for_verification(id)
}

pub fn link_not_public(id: Uuid) -> PushMessage {
    fact_check_failed(id, LINK_NOT_PUBLIC)
}

pub fn video_complete(id: Uuid) -> PushMessage {
    PushMessage::new(NotificationKind::VideoAnalysisComplete, VIDEO_COMPLETE_TITLE, VIDEO_COMPLETE_BODY)
        .for_verification(id)
}

pub fn video_too_long(id: Uuid) -> PushMessage {
    PushMessage::new(NotificationKind::VideoTooLong, VIDEO_TOO_LONG_TITLE, VIDEO_TOO_LONG_BODY).for_verification(id)
}

pub fn liked(id: Uuid, username: &str) -> PushMessage {
    PushMessage::new(NotificationKind::Like, format!("{username} მოიწონა თქვენი ფოსტი"), "❤️").for_verification(id)
}

pub fn impression_milestone(id: Uuid, views: u64, username: &str) -> PushMessage {
    PushMessage::new(
        NotificationKind::Impression,
        format!("თქვენს ფოსტმა დააგროვა {views} ნახვა"),
        format!("{username} და სხვებმა ნახეს თქვენი ფოტო"),
    )
    .for_verification(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_body_falls_back_to_empty() {
        let id = Uuid::new_v4();
        assert_eq!(fact_check_completed(id, None).body, "");
        assert_eq!(fact_check_completed(id, Some("mostly false")).body, "mostly false");
    }

    #[test]
    fn interaction_texts_name_the_actor() {
        let id = Uuid::new_v4();
        assert!(liked(id, "nino").title.starts_with("nino "));
        let m = impression_milestone(id, 1000, "nino");
        assert!(m.title.contains("1000"));
        assert_eq!(m.data["verificationId"], id.to_string());
    }
}
