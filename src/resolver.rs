//! Per-request choice between the upstream backend and canned fallbacks.

use std::sync::Arc;

use tracing::warn;

use crate::{
    types::{GenerationParams, GenerationResult, Provenance, Usage},
    upstream::UpstreamBackend,
};

pub const FALLBACK_DEFAULT: &str =
    "This is a fallback response from MiniVault API. LLM is currently unavailable.";
pub const FALLBACK_TOO_SHORT: &str =
    "Your prompt is quite short. Try asking something more detailed! (Fallback mode)";
pub const FALLBACK_THOUGHTFUL: &str = "That's a thoughtful prompt! Here's my comprehensive response to your detailed query. (Fallback mode)";

/// Lowercased prompts answered verbatim.
const FALLBACK_PHRASES: [(&str, &str); 4] = [
    ("default", FALLBACK_DEFAULT),
    (
        "hello",
        "Hello! I'm MiniVault, your friendly local AI API. (Fallback mode)",
    ),
    (
        "who are you?",
        "I am MiniVault, a small local gateway that forwards your prompts to a text-generation \
         backend running on this machine. When that backend is away I answer from a short list \
         of canned replies. How can I help you today?",
    ),
    (
        "test",
        "Test successful! MiniVault is working in fallback mode.",
    ),
];

const PERSONAL_KEYWORDS: [&str; 12] = [
    "you",
    "your",
    "yourself",
    "your background",
    "your experience",
    "your skills",
    "tell me about you",
    "who are you",
    "about you",
    "your work",
    "your education",
    "your projects",
];

const RESUME_EXCERPT_CHARS: usize = 500;
const SHORT_PROMPT_CHARS: usize = 10;
const LONG_PROMPT_CHARS: usize = 100;

pub fn is_personal_question(prompt: &str) -> bool {
    let lower = prompt.to_lowercase();
    PERSONAL_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}

pub struct ResponseResolver {
    upstream: Option<Arc<dyn UpstreamBackend>>,
    resume: Option<String>,
}

impl ResponseResolver {
    pub fn new(upstream: Option<Arc<dyn UpstreamBackend>>, resume: Option<String>) -> Self {
        Self { upstream, resume }
    }

    pub fn upstream(&self) -> Option<&Arc<dyn UpstreamBackend>> {
        self.upstream.as_ref()
    }

    /// Prefixes the biography to the system prompt for personal questions.
    pub fn enhance_system_prompt(&self, prompt: &str, system: Option<&str>) -> Option<String> {
        let resume = match &self.resume {
            Some(resume) if is_personal_question(prompt) => resume,
            _ => return system.map(str::to_string),
        };

        let context = format!(
            "You are answering questions about the person described below. \
             Here is their resume and background information:\n\n{resume}\n\n\
             Please answer questions about them based on this information. \
             Be conversational and helpful."
        );
        Some(match system {
            Some(system) => format!("{context}\n\n{system}"),
            None => context,
        })
    }

    /// Upstream first; any upstream failure, or no upstream at all, yields a
    /// fallback.
    pub async fn resolve(&self, params: &GenerationParams, stream: bool) -> GenerationResult {
        if let Some(upstream) = &self.upstream {
            match upstream.generate(params, stream).await {
                Ok(text) => {
                    return GenerationResult {
                        usage: Usage::from_texts(&params.prompt, &text),
                        text,
                        provenance: Provenance::Upstream,
                    };
                }
                Err(err) => warn!(error = %err, "upstream generation failed, using fallback"),
            }
        }

        let text = self.fallback_response(&params.prompt);
        GenerationResult {
            usage: Usage::from_texts(&params.prompt, &text),
            text,
            provenance: Provenance::Fallback,
        }
    }

    pub fn fallback_response(&self, prompt: &str) -> String {
        let lower = prompt.to_lowercase();
        if let Some((_, canned)) = FALLBACK_PHRASES.iter().find(|(phrase, _)| *phrase == lower) {
            return canned.to_string();
        }

        if let Some(resume) = &self.resume {
            if is_personal_question(prompt) {
                let excerpt: String = resume.chars().take(RESUME_EXCERPT_CHARS).collect();
                return format!(
                    "Based on my resume information:\n\n{excerpt}... (Fallback mode - LLM unavailable)"
                );
            }
        }

        let length = prompt.chars().count();
        if length < SHORT_PROMPT_CHARS {
            FALLBACK_TOO_SHORT.to_string()
        } else if length > LONG_PROMPT_CHARS {
            FALLBACK_THOUGHTFUL.to_string()
        } else {
            FALLBACK_DEFAULT.to_string()
        }
    }
}
