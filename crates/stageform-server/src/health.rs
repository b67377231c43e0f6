//! `/health` endpoint body.

use std::time::Instant;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    pub live_sessions: usize,
    /// Admission ceiling.
    pub capacity: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, live_sessions: usize, capacity: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        live_sessions,
        capacity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_ok() {
        let resp = health_check(Instant::now(), 0, 2);
        assert_eq!(resp.status, "ok");
    }

    #[test]
    fn uptime_starts_at_zero() {
        let resp = health_check(Instant::now(), 0, 2);
        assert!(resp.uptime_secs < 2);
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        let resp = health_check(start, 0, 2);
        assert!(resp.uptime_secs >= 59);
    }

    #[test]
    fn counters_are_reported() {
        let resp = health_check(Instant::now(), 1, 2);
        assert_eq!(resp.live_sessions, 1);
        assert_eq!(resp.capacity, 2);
    }

    #[test]
    fn serializes_flat() {
        let json = serde_json::to_value(health_check(Instant::now(), 1, 2)).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["live_sessions"], 1);
        assert_eq!(json["capacity"], 2);
        assert!(json["uptime_secs"].is_u64());
    }
}
