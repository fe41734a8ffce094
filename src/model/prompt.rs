use crate::model::GenerationRequest;

/// System and user message handed to a generation session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatPrompt {
    pub system: String,
    pub user: String,
}

impl ChatPrompt {
    /// Uses the request's system prompt when it carries a non-blank one.
    pub fn from_request(request: &GenerationRequest, default_system: &str) -> Self {
        let system = request
            .system_prompt
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(default_system);

        Self {
            system: system.to_string(),
            user: request.prompt.trim().to_string(),
        }
    }

    /// Plain-text rendering for backends without a chat template.
    pub fn render(&self) -> String {
        format!(
            "System: {}\n\nUser: {}\n\nAssistant:",
            self.system.trim(),
            self.user
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_system_prompt_overrides_default() {
        let mut request = GenerationRequest::new("  write a report ");
        request.system_prompt = Some("be brief".into());
        let prompt = ChatPrompt::from_request(&request, "default");
        assert_eq!(prompt.system, "be brief");
        assert_eq!(prompt.user, "write a report");
    }

    #[test]
    fn blank_system_prompt_falls_back_to_default() {
        let mut request = GenerationRequest::new("hi");
        request.system_prompt = Some("   ".into());
        let prompt = ChatPrompt::from_request(&request, "default");
        assert_eq!(prompt.system, "default");
        assert!(prompt.render().ends_with("User: hi\n\nAssistant:"));
    }
}
