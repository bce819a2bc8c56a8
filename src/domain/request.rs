//! Incoming request payloads.

/// A request as understood by the orchestrator.
///
/// Raw payloads are either opaque text or a structured literal naming a
/// component, its prompt, and optionally a cache key to invalidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Plain text; the text itself is the effective prompt
    RawText(String),

    /// A component directive
    Structured {
        component_id: String,
        prompt: String,
        invalidate_key: Option<String>,
    },
}

impl Request {
    pub fn raw(text: impl Into<String>) -> Self {
        Self::RawText(text.into())
    }

    /// The prompt the stage graph runs on
    pub fn effective_prompt(&self) -> &str {
        match self {
            Self::RawText(text) => text,
            Self::Structured { prompt, .. } => prompt,
        }
    }

    pub fn component_id(&self) -> Option<&str> {
        match self {
            Self::RawText(_) => None,
            Self::Structured { component_id, .. } => Some(component_id),
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, Self::Structured { .. })
    }
}

/// Result of parsing a raw payload.
///
/// `invalidate_key` is tracked separately from [`Request`] because a
/// mapping that only carries `invalidate_cache_key` is still pass-through
/// text, yet its invalidation must fire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    pub request: Request,
    pub invalidate_key: Option<String>,
}

impl ParsedRequest {
    pub fn effective_prompt(&self) -> &str {
        self.request.effective_prompt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_prompt() {
        assert_eq!(Request::raw("hello").effective_prompt(), "hello");

        let structured = Request::Structured {
            component_id: "c1".to_string(),
            prompt: "Generate X".to_string(),
            invalidate_key: None,
        };
        assert_eq!(structured.effective_prompt(), "Generate X");
        assert_eq!(structured.component_id(), Some("c1"));
        assert!(structured.is_structured());
    }
}
