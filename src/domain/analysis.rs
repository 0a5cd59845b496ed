//! Result artifact written by the analysis worker.
//!
//! The worker writes a JSON array of joint-pair measurements:
//! `[{"From": "hip", "To": "knee", "Angle": 12.5, "IsCorrect": true}]`

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One labeled angle measurement between two body parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Measurement {
    pub from: String,
    pub to: String,
    /// Degrees
    pub angle: f64,
    pub is_correct: bool,
}

/// Complete payload of a successful analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnalysisResult {
    pub measurements: Vec<Measurement>,
}

#[derive(Debug, Error)]
pub enum ResultParseError {
    #[error("failed to read result artifact: {0}")]
    Read(#[from] std::io::Error),
    #[error("malformed result artifact: {0}")]
    Json(#[from] serde_json::Error),
    #[error("measurement {index} ({from} -> {to}) has a non-finite angle")]
    NonFiniteAngle {
        index: usize,
        from: String,
        to: String,
    },
}

impl AnalysisResult {
    pub fn from_json(data: &[u8]) -> Result<Self, ResultParseError> {
        let result: AnalysisResult = serde_json::from_slice(data)?;

        if let Some((index, m)) = result
            .measurements
            .iter()
            .enumerate()
            .find(|(_, m)| !m.angle.is_finite())
        {
            return Err(ResultParseError::NonFiniteAngle {
                index,
                from: m.from.clone(),
                to: m.to.clone(),
            });
        }

        Ok(result)
    }
}
