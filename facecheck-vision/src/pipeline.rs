use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Detector + recognizer combination understood by the face service.
///
/// Verification (card against selfie) and identification (embedding for
/// storage and search) are tuned differently and run on different pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pipeline {
    #[serde(rename = "yunet+sface")]
    YunetSface,
    #[serde(rename = "retinaface+arcface")]
    RetinafaceArcface,
}

impl Pipeline {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pipeline::YunetSface => "yunet+sface",
            Pipeline::RetinafaceArcface => "retinaface+arcface",
        }
    }

    /// Length of the vectors produced by the recognizer.
    pub fn dimension(&self) -> usize {
        match self {
            Pipeline::YunetSface => 128,
            Pipeline::RetinafaceArcface => 512,
        }
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Pipeline {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yunet+sface" => Ok(Pipeline::YunetSface),
            "retinaface+arcface" => Ok(Pipeline::RetinafaceArcface),
            other => anyhow::bail!(
                "unknown pipeline '{}', expected 'yunet+sface' or 'retinaface+arcface'",
                other
            ),
        }
    }
}
