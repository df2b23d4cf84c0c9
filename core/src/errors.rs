use thiserror::Error;

/// Error taxonomy for the gateway core.
///
/// Every variant is recoverable from the session's point of view: an error is
/// reported to the caller and the session keeps running. The only fatal
/// condition is a startup configuration with no usable providers, which the
/// shell turns into a process exit.
#[derive(Error, Debug)]
pub enum OpgError {
    /// Missing or invalid provider/model selection.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Transport or HTTP-level failure from a provider adapter.
    #[error("{provider} request failed: {message}")]
    Provider { provider: String, message: String },

    /// Tool execution failure inside the sandbox.
    #[error("tool error: {0}")]
    Tool(String),

    /// A tool-requested path resolved outside the sandbox root.
    #[error("sandbox violation: {0}")]
    SandboxViolation(String),

    /// Malformed command arguments or out-of-range sampling parameters.
    #[error("invalid input: {0}")]
    Validation(String),
}

impl OpgError {
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, OpgError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_names_the_provider() {
        let err = OpgError::provider("openai", "HTTP 500");
        assert_eq!(err.to_string(), "openai request failed: HTTP 500");
    }
}
