//! crates/production_core/src/guard.rs
//!
//! The navigation guard that pulls a client with a fresh pending production
//! back to its tracker view.

use chrono::{DateTime, Duration, Utc};

use crate::session::PendingSession;

pub const TRACKER_ROUTE: &str = "/finalizzazione";
pub const SUBMISSION_ROUTE: &str = "/crea";

#[derive(Debug, Clone)]
pub struct MagnetGuard {
    tracker_route: String,
    exempt_prefixes: Vec<String>,
    horizon: Duration,
}

impl MagnetGuard {
    /// Exempts the tracker route itself plus `exempt_prefixes`.
    pub fn new(tracker_route: &str, exempt_prefixes: &[&str], horizon: Duration) -> Self {
        let mut exempt: Vec<String> = exempt_prefixes.iter().map(|p| p.to_string()).collect();
        if !exempt.iter().any(|p| p == tracker_route) {
            exempt.push(tracker_route.to_string());
        }
        Self {
            tracker_route: tracker_route.to_string(),
            exempt_prefixes: exempt,
            horizon,
        }
    }

    /// Guard for the default tracker and submission views.
    pub fn with_defaults(horizon: Duration) -> Self {
        Self::new(TRACKER_ROUTE, &[SUBMISSION_ROUTE], horizon)
    }

    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_prefixes.iter().any(|p| path.starts_with(p.as_str()))
    }

    /// Where to send a navigation to `path`, if anywhere.
    pub fn redirect_for(
        &self,
        path: &str,
        pending: Option<&PendingSession>,
        now: DateTime<Utc>,
    ) -> Option<String> {
        if self.is_exempt(path) {
            return None;
        }
        let session = pending?;
        if !session.is_fresh(now, self.horizon) || session.category.is_empty() {
            return None;
        }
        Some(format!(
            "{}?category={}",
            self.tracker_route,
            encode_query_value(&session.category)
        ))
    }
}

fn encode_query_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
    }

    fn pending(age_minutes: i64, category: &str) -> PendingSession {
        PendingSession {
            job_id: "job".into(),
            target_clip_url: "https://clips/a.mp4".into(),
            prompt: "p".into(),
            category: category.into(),
            created_at: now() - Duration::minutes(age_minutes),
            final_artifact_url: None,
        }
    }

    #[test]
    fn fresh_session_pulls_back_to_tracker() {
        let guard = MagnetGuard::with_defaults(Duration::hours(1));
        let s = pending(10, "action");
        assert_eq!(
            guard.redirect_for("/feed", Some(&s), now()),
            Some("/finalizzazione?category=action".to_string())
        );
    }

    #[test]
    fn tracker_and_submission_views_are_exempt() {
        let guard = MagnetGuard::with_defaults(Duration::hours(1));
        let s = pending(10, "action");
        assert_eq!(guard.redirect_for("/finalizzazione", Some(&s), now()), None);
        assert_eq!(guard.redirect_for("/crea/personaggi", Some(&s), now()), None);
    }

    #[test]
    fn stale_or_uncategorised_sessions_do_not_redirect() {
        let guard = MagnetGuard::with_defaults(Duration::hours(1));
        assert_eq!(guard.redirect_for("/feed", Some(&pending(61, "action")), now()), None);
        assert_eq!(guard.redirect_for("/feed", Some(&pending(5, "")), now()), None);
        assert_eq!(guard.redirect_for("/feed", None, now()), None);
    }

    #[test]
    fn category_is_query_encoded() {
        let guard = MagnetGuard::with_defaults(Duration::hours(1));
        let s = pending(1, "drama & co");
        assert_eq!(
            guard.redirect_for("/", Some(&s), now()).as_deref(),
            Some("/finalizzazione?category=drama%20%26%20co")
        );
    }
}
