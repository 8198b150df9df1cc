//! Externally configured bias terms.
//!
//! Once per tick the pipeline asks a [`BiasSource`] for the four adjustment
//! terms. A successful fetch replaces all four at once; any failure resets all
//! four to zero. A mix of stale and fresh terms is never applied.

use crate::BoxFuture;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// The four additive adjustments, one per scoring formula.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BiasTerms {
    pub heart_rate: i32,
    pub stress: i32,
    pub activity: i32,
    pub tension: i32,
}

impl BiasTerms {
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    /// Parse the four terms out of a JSON object using the configured key names.
    ///
    /// Every key must be present and hold an integer that fits in `i32`.
    pub fn from_json(value: &serde_json::Value, keys: &BiasKeys) -> Result<Self, BiasError> {
        let object = value
            .as_object()
            .ok_or_else(|| BiasError::Malformed("bias payload is not an object".to_string()))?;

        let read = |key: &str| -> Result<i32, BiasError> {
            let raw = object
                .get(key)
                .filter(|v| !v.is_null())
                .ok_or_else(|| BiasError::MissingKey(key.to_string()))?;
            raw.as_i64()
                .and_then(|n| i32::try_from(n).ok())
                .ok_or_else(|| BiasError::Malformed(format!("'{key}' is not a 32-bit integer: {raw}")))
        };

        Ok(Self {
            heart_rate: read(&keys.heart_rate)?,
            stress: read(&keys.stress)?,
            activity: read(&keys.activity)?,
            tension: read(&keys.tension)?,
        })
    }
}

/// Key names of the four terms inside the bias object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BiasKeys {
    pub heart_rate: String,
    pub stress: String,
    pub activity: String,
    pub tension: String,
}

impl Default for BiasKeys {
    fn default() -> Self {
        Self {
            heart_rate: "heart_rate".to_string(),
            stress: "stress".to_string(),
            activity: "activity".to_string(),
            tension: "tension".to_string(),
        }
    }
}

/// Bias retrieval errors.
#[derive(Debug, Clone, PartialEq)]
pub enum BiasError {
    /// The source could not be reached or read
    Unavailable(String),
    /// A required key was absent
    MissingKey(String),
    /// The payload or one of its values had the wrong shape
    Malformed(String),
}

impl std::fmt::Display for BiasError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BiasError::Unavailable(e) => write!(f, "Bias source unavailable: {e}"),
            BiasError::MissingKey(key) => write!(f, "Bias key missing: {key}"),
            BiasError::Malformed(e) => write!(f, "Malformed bias data: {e}"),
        }
    }
}

impl std::error::Error for BiasError {}

/// Anything that can supply bias terms.
pub trait BiasSource: Send + Sync {
    fn fetch(&self) -> BoxFuture<'_, Result<BiasTerms, BiasError>>;
}

/// A source that always returns the same terms.
#[derive(Debug, Clone, Default)]
pub struct StaticBiasSource {
    terms: BiasTerms,
}

impl StaticBiasSource {
    pub fn new(terms: BiasTerms) -> Self {
        Self { terms }
    }

    /// A source that always yields zero bias.
    pub fn zero() -> Self {
        Self::default()
    }
}

impl BiasSource for StaticBiasSource {
    fn fetch(&self) -> BoxFuture<'_, Result<BiasTerms, BiasError>> {
        let terms = self.terms;
        Box::pin(async move { Ok(terms) })
    }
}

/// Reads the bias object from a JSON file on every fetch, so edits take
/// effect on the next tick.
#[derive(Debug, Clone)]
pub struct FileBiasSource {
    path: PathBuf,
    keys: BiasKeys,
}

impl FileBiasSource {
    pub fn new(path: PathBuf, keys: BiasKeys) -> Self {
        Self { path, keys }
    }
}

impl BiasSource for FileBiasSource {
    fn fetch(&self) -> BoxFuture<'_, Result<BiasTerms, BiasError>> {
        Box::pin(async move {
            let content = tokio::fs::read_to_string(&self.path)
                .await
                .map_err(|e| BiasError::Unavailable(format!("{}: {e}", self.path.display())))?;
            let value: serde_json::Value = serde_json::from_str(&content)
                .map_err(|e| BiasError::Malformed(e.to_string()))?;
            BiasTerms::from_json(&value, &self.keys)
        })
    }
}

/// Result of one refresh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiasRefresh {
    pub terms: BiasTerms,
    /// True when the fetch failed and the terms were reset to zero
    pub fell_back: bool,
}

/// Holds the current bias terms and refreshes them from a source.
pub struct BiasFetcher {
    source: Arc<dyn BiasSource>,
    current: RwLock<BiasTerms>,
}

impl BiasFetcher {
    pub fn new(source: Arc<dyn BiasSource>) -> Self {
        Self {
            source,
            current: RwLock::new(BiasTerms::default()),
        }
    }

    /// Fetch once and replace the current terms, falling back to zero on failure.
    pub async fn refresh(&self) -> BiasRefresh {
        let (terms, fell_back) = match self.source.fetch().await {
            Ok(terms) => {
                tracing::debug!(?terms, "Bias terms applied");
                (terms, false)
            }
            Err(e) => {
                tracing::warn!("Bias fetch failed, using zero bias: {e}");
                (BiasTerms::default(), true)
            }
        };

        if let Ok(mut current) = self.current.write() {
            *current = terms;
        }

        BiasRefresh { terms, fell_back }
    }

    /// The most recently applied terms.
    pub fn current(&self) -> BiasTerms {
        self.current.read().map(|terms| *terms).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Replays a scripted sequence of fetch results.
    struct ScriptedSource {
        script: Mutex<Vec<Result<BiasTerms, BiasError>>>,
    }

    impl ScriptedSource {
        fn new(mut script: Vec<Result<BiasTerms, BiasError>>) -> Self {
            script.reverse();
            Self {
                script: Mutex::new(script),
            }
        }
    }

    impl BiasSource for ScriptedSource {
        fn fetch(&self) -> BoxFuture<'_, Result<BiasTerms, BiasError>> {
            let next = self
                .script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(BiasError::Unavailable("script exhausted".to_string())));
            Box::pin(async move { next })
        }
    }

    #[test]
    fn test_from_json_complete() {
        let value = json!({"heart_rate": 5, "stress": -3, "activity": 10, "tension": 0});
        let terms = BiasTerms::from_json(&value, &BiasKeys::default()).unwrap();
        assert_eq!(
            terms,
            BiasTerms {
                heart_rate: 5,
                stress: -3,
                activity: 10,
                tension: 0
            }
        );
    }

    #[test]
    fn test_from_json_missing_key() {
        let value = json!({"heart_rate": 5, "stress": -3, "activity": 10});
        assert_eq!(
            BiasTerms::from_json(&value, &BiasKeys::default()),
            Err(BiasError::MissingKey("tension".to_string()))
        );

        let value = json!({"heart_rate": 5, "stress": null, "activity": 10, "tension": 1});
        assert_eq!(
            BiasTerms::from_json(&value, &BiasKeys::default()),
            Err(BiasError::MissingKey("stress".to_string()))
        );
    }

    #[test]
    fn test_from_json_malformed() {
        let keys = BiasKeys::default();
        for value in [
            json!({"heart_rate": "5", "stress": 0, "activity": 0, "tension": 0}),
            json!({"heart_rate": 1.5, "stress": 0, "activity": 0, "tension": 0}),
            json!({"heart_rate": 1, "stress": 0, "activity": 0, "tension": 9_999_999_999i64}),
            json!([1, 2, 3, 4]),
        ] {
            assert!(matches!(
                BiasTerms::from_json(&value, &keys),
                Err(BiasError::Malformed(_))
            ));
        }
    }

    #[test]
    fn test_custom_keys() {
        let keys = BiasKeys {
            heart_rate: "hr".to_string(),
            stress: "st".to_string(),
            activity: "act".to_string(),
            tension: "ten".to_string(),
        };
        let value = json!({"hr": 1, "st": 2, "act": 3, "ten": 4});
        let terms = BiasTerms::from_json(&value, &keys).unwrap();
        assert_eq!(terms.tension, 4);
    }

    #[tokio::test]
    async fn test_failure_resets_all_terms() {
        let fresh = BiasTerms {
            heart_rate: 7,
            stress: 8,
            activity: 9,
            tension: 10,
        };
        let fetcher = BiasFetcher::new(Arc::new(ScriptedSource::new(vec![
            Ok(fresh),
            Err(BiasError::MissingKey("tension".to_string())),
            Ok(fresh),
        ])));

        let first = fetcher.refresh().await;
        assert_eq!(first.terms, fresh);
        assert!(!first.fell_back);
        assert_eq!(fetcher.current(), fresh);

        let second = fetcher.refresh().await;
        assert!(second.fell_back);
        assert!(second.terms.is_zero());
        assert_eq!(fetcher.current(), BiasTerms::default());

        let third = fetcher.refresh().await;
        assert_eq!(third.terms, fresh);
    }

    #[tokio::test]
    async fn test_file_source() {
        let dir = std::env::temp_dir().join(format!("wear-bias-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bias.json");

        let source = FileBiasSource::new(path.clone(), BiasKeys::default());
        assert!(matches!(
            source.fetch().await,
            Err(BiasError::Unavailable(_))
        ));

        std::fs::write(
            &path,
            r#"{"heart_rate": 2, "stress": 4, "activity": 6, "tension": 8}"#,
        )
        .unwrap();
        assert_eq!(source.fetch().await.unwrap().activity, 6);

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(source.fetch().await, Err(BiasError::Malformed(_))));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
