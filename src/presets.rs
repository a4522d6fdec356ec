use serde::{Deserialize, Serialize};

/// Named bundle of sampling defaults a request can opt into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresetName {
    Creative,
    Balanced,
    Precise,
    Deterministic,
    Code,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Preset {
    pub name: PresetName,
    pub description: &'static str,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
}

pub const DEFAULT_PRESET: PresetName = PresetName::Balanced;

pub const PRESETS: [Preset; 5] = [
    Preset {
        name: PresetName::Creative,
        description: "For creative writing, stories, and imaginative content",
        temperature: 0.9,
        top_p: 0.95,
        max_tokens: 2000,
    },
    Preset {
        name: PresetName::Balanced,
        description: "General purpose, balanced between creativity and accuracy",
        temperature: 0.7,
        top_p: 0.9,
        max_tokens: 1000,
    },
    Preset {
        name: PresetName::Precise,
        description: "For factual, analytical, and accurate responses",
        temperature: 0.3,
        top_p: 0.8,
        max_tokens: 1000,
    },
    Preset {
        name: PresetName::Deterministic,
        description: "For consistent, reproducible outputs",
        temperature: 0.1,
        top_p: 0.5,
        max_tokens: 500,
    },
    Preset {
        name: PresetName::Code,
        description: "Optimized for code generation and technical content",
        temperature: 0.2,
        top_p: 0.7,
        max_tokens: 1500,
    },
];

impl PresetName {
    pub fn preset(self) -> &'static Preset {
        // PRESETS is declared in enum order.
        &PRESETS[self as usize]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PresetName::Creative => "creative",
            PresetName::Balanced => "balanced",
            PresetName::Precise => "precise",
            PresetName::Deterministic => "deterministic",
            PresetName::Code => "code",
        }
    }
}
