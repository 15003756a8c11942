//! Response validation to ensure safe outputs from LLM providers.

use anyhow::Result;
use hostctl_activities::llm::ChatOutput;
use regex::Regex;
use tracing::{debug, warn};

/// Response validator that ensures safe outputs from LLM providers.
pub struct ResponseValidator {
    harmful_patterns: Vec<HarmfulPattern>,
    max_response_length: usize,
}

#[derive(Debug, Clone)]
struct HarmfulPattern {
    pattern: Regex,
    description: String,
}

impl ResponseValidator {
    /// Build a validator with the default security patterns.
    pub fn new() -> Self {
        let harmful_patterns = vec![
            HarmfulPattern {
                pattern: Regex::new(r"(?i)(system|exec|eval|subprocess|shell|cmd|powershell|bash|sh)\s*\(").unwrap(),
                description: "Executable code in response".to_string(),
            },
            HarmfulPattern {
                pattern: Regex::new(r"(?i)(open|read|write|delete|rm|mv|cp|mkdir|rmdir)\s*\(").unwrap(),
                description: "File system operations in response".to_string(),
            },
        ];

        Self { harmful_patterns, max_response_length: 1_048_576 }
    }

    /// Validate a chat turn's output text. Tool calls themselves are
    /// not scanned here — `Execute`'s own activity registry is the
    /// authority on which tools exist and what arguments they accept.
    pub fn validate(&self, output: ChatOutput) -> Result<ChatOutput> {
        debug!("Validating chat output");

        let mut blocked = Vec::new();
        for pattern in &self.harmful_patterns {
            if pattern.pattern.is_match(&output.content) {
                blocked.push(pattern.description.clone());
            }
        }

        if !blocked.is_empty() {
            warn!("Blocking response due to harmful patterns: {:?}", blocked);
            anyhow::bail!("Response blocked due to security concerns: {}", blocked.join(", "));
        }

        if output.content.len() > self.max_response_length {
            anyhow::bail!("Response too long: {} characters", output.content.len());
        }

        Ok(output)
    }

    /// Check if content would be blocked, for testing.
    pub fn would_block(&self, content: &str) -> bool {
        self.harmful_patterns.iter().any(|p| p.pattern.is_match(content))
    }
}

impl Default for ResponseValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_executable_code() {
        let validator = ResponseValidator::new();
        let output = ChatOutput { content: "run system('rm -rf /')".to_string(), tool_calls: vec![] };
        assert!(validator.validate(output).is_err());
    }

    #[test]
    fn allows_safe_text() {
        let validator = ResponseValidator::new();
        let output = ChatOutput { content: "the lag cleared after restart".to_string(), tool_calls: vec![] };
        assert!(validator.validate(output).is_ok());
    }

    #[test]
    fn rejects_oversized_responses() {
        let validator = ResponseValidator::new();
        let output = ChatOutput { content: "a".repeat(2_000_000), tool_calls: vec![] };
        assert!(validator.validate(output).is_err());
    }
}
