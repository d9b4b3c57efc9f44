use chrono::{DateTime, Duration, Utc};

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 100.0;

/// Shortest window a scored verification stays valid.
pub const MIN_VALIDITY_SECS: i64 = 5 * 60;
/// Longest window, reached at `MAX_SCORE`.
pub const MAX_VALIDITY_SECS: i64 = 14 * 60 * 60;

/// Expiry of a scored verification. Grows logarithmically with the score,
/// from five minutes at 0 to fourteen hours at 100. Out-of-range scores are clamped.
pub fn valid_until(score: f64, now: DateTime<Utc>) -> DateTime<Utc> {
    let score = if score.is_nan() { MIN_SCORE } else { score.clamp(MIN_SCORE, MAX_SCORE) };
    let factor = (score + 1.0).ln() / (MAX_SCORE + 1.0).ln();
    let span = (MAX_VALIDITY_SECS - MIN_VALIDITY_SECS) as f64;
    let millis = ((MIN_VALIDITY_SECS as f64 + factor * span) * 1000.0).round() as i64;
    now + Duration::milliseconds(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_match_score_range() {
        let now = Utc::now();
        assert_eq!(valid_until(0.0, now) - now, Duration::seconds(MIN_VALIDITY_SECS));
        assert_eq!(valid_until(100.0, now) - now, Duration::seconds(MAX_VALIDITY_SECS));
    }

    #[test]
    fn higher_score_lives_longer() {
        let now = Utc::now();
        let mut previous = valid_until(0.0, now);
        for score in 1..=100 {
            let next = valid_until(score as f64, now);
            assert!(next > previous, "score {score} did not extend validity");
            assert!(next >= now);
            previous = next;
        }
    }

    #[test]
    fn out_of_range_scores_are_clamped() {
        let now = Utc::now();
        assert_eq!(valid_until(-20.0, now), valid_until(0.0, now));
        assert_eq!(valid_until(250.0, now), valid_until(100.0, now));
        assert_eq!(valid_until(f64::NAN, now), valid_until(0.0, now));
    }
}
