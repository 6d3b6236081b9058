//! Sandbox runtime trait and the values it produces

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::Result;

/// Captured output of one sandboxed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
    /// Set when the run was answered with a placeholder because the
    /// sandbox artifact (module, image, daemon) is not available
    pub missing_artifact: Option<String>,
}

impl RunOutput {
    /// A run that completed inside the sandbox
    pub fn completed(stdout: String, stderr: String) -> Self {
        RunOutput {
            stdout,
            stderr,
            missing_artifact: None,
        }
    }

    /// A labelled stand-in result that echoes the submitted source
    pub fn placeholder(language: &str, source: &str, artifact: impl Into<String>) -> Self {
        let artifact = artifact.into();
        RunOutput {
            stdout: format!(
                "[{} sandbox unavailable: echoing submitted source]\n{}\n(missing artifact: {})",
                language, source, artifact
            ),
            stderr: String::new(),
            missing_artifact: Some(artifact),
        }
    }

    /// Whether this output is a placeholder
    pub fn is_placeholder(&self) -> bool {
        self.missing_artifact.is_some()
    }

    /// Get combined output
    pub fn combined_output(&self) -> String {
        combine_streams(&self.stdout, &self.stderr)
    }
}

/// Join stdout and stderr the way they are shown in the console panel
pub fn combine_streams(stdout: &str, stderr: &str) -> String {
    let mut output = String::new();
    if !stdout.is_empty() {
        output.push_str(stdout);
    }
    if !stderr.is_empty() {
        if !output.is_empty() {
            output.push_str("\n--- stderr ---\n");
        }
        output.push_str(stderr);
    }
    output
}

/// An isolated execution environment for one language.
///
/// Implementations read the program from a single input stream, capture both
/// output streams into bounded buffers, and expose no host filesystem or
/// network to the program. Dropping the future returned by [`run`] must stop
/// all work belonging to that run.
///
/// [`run`]: SandboxRuntime::run
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Runtime name, used in logs
    fn name(&self) -> &str;

    /// Run `source` to completion or until `deadline`
    async fn run(&self, source: &str, deadline: Instant) -> Result<RunOutput>;
}

/// Append `bytes` to `buf` without letting it grow past `limit`.
///
/// Returns `false` once the limit has been hit.
pub(crate) fn push_bounded(buf: &mut Vec<u8>, bytes: &[u8], limit: usize) -> bool {
    let room = limit.saturating_sub(buf.len());
    let take = room.min(bytes.len());
    buf.extend_from_slice(&bytes[..take]);
    take == bytes.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_echoes_source() {
        let out = RunOutput::placeholder("python", "print(1)", "wasm/python.wasm");
        assert!(out.is_placeholder());
        assert!(out.stdout.contains("print(1)"));
        assert!(out.stdout.contains("wasm/python.wasm"));
        assert!(out.stderr.is_empty());
    }

    #[test]
    fn test_combined_output() {
        let out = RunOutput::completed("hello".to_string(), "warn".to_string());
        assert_eq!(out.combined_output(), "hello\n--- stderr ---\nwarn");

        let only_err = RunOutput::completed(String::new(), "warn".to_string());
        assert_eq!(only_err.combined_output(), "warn");
    }

    #[test]
    fn test_push_bounded() {
        let mut buf = Vec::new();
        assert!(push_bounded(&mut buf, b"abc", 5));
        assert!(!push_bounded(&mut buf, b"defg", 5));
        assert_eq!(buf, b"abcde");
        assert!(!push_bounded(&mut buf, b"x", 5));
    }
}
