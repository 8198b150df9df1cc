//! Published score records.

use crate::bias::BiasTerms;
use crate::core::scoring::Scores;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One tick's output: the four scores plus the raw signals they came from.
///
/// Built once per tick and never modified; the sink owns persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    /// Millisecond Unix timestamp, also used as the record key in the store
    pub timestamp_ms: i64,
    /// Local observation time (RFC3339) in the configured timezone
    pub observed_at: String,
    /// Identifier of the publishing device
    pub device_id: String,
    pub stress: u8,
    pub tension: u8,
    pub activity: u8,
    pub total: u8,
    /// Bias terms applied to this record
    pub bias: BiasTerms,
    /// Raw signal values keyed by sensor, `"-"` for absent sensors
    pub signals: BTreeMap<String, String>,
}

impl ScoreRecord {
    pub fn new(
        at: DateTime<Utc>,
        timezone: Tz,
        device_id: &str,
        scores: Scores,
        bias: BiasTerms,
        signals: BTreeMap<String, String>,
    ) -> Self {
        Self {
            timestamp_ms: at.timestamp_millis(),
            observed_at: at.with_timezone(&timezone).to_rfc3339(),
            device_id: device_id.to_string(),
            stress: scores.stress,
            tension: scores.tension,
            activity: scores.activity,
            total: scores.total,
            bias,
            signals,
        }
    }

    pub fn scores(&self) -> Scores {
        Scores {
            stress: self.stress,
            tension: self.tension,
            activity: self.activity,
            total: self.total,
        }
    }

    /// Record key under which the store keeps this record.
    pub fn key(&self) -> String {
        self.timestamp_ms.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_record_key_and_local_time() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let scores = Scores {
            stress: 10,
            tension: 20,
            activity: 30,
            total: 40,
        };
        let record = ScoreRecord::new(
            at,
            chrono_tz::Asia::Seoul,
            "watch-1",
            scores,
            BiasTerms::default(),
            BTreeMap::new(),
        );

        assert_eq!(record.key(), "1709251200000");
        assert_eq!(record.observed_at, "2024-03-01T09:00:00+09:00");
        assert_eq!(record.scores(), scores);
    }

    #[test]
    fn test_record_serializes_flat_scores() {
        let record = ScoreRecord::new(
            Utc::now(),
            Tz::UTC,
            "watch-1",
            Scores::default(),
            BiasTerms::default(),
            BTreeMap::from([("light".to_string(), "-".to_string())]),
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["stress"], 0);
        assert_eq!(json["signals"]["light"], "-");
        assert_eq!(json["bias"]["tension"], 0);
    }
}
