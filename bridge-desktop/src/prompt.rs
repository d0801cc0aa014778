//! Console verification prompt

use async_trait::async_trait;
use bridge_traits::{
    error::Result,
    prompt::{DeviceChallenge, VerificationPrompt},
};
use std::io::Write;

/// Prints the device-code challenge to stderr so stdout stays machine readable.
#[derive(Debug, Default, Clone)]
pub struct ConsolePrompt;

impl ConsolePrompt {
    pub fn new() -> Self {
        Self
    }

    fn render(challenge: &DeviceChallenge) -> String {
        match &challenge.message {
            Some(message) => format!("\n{}\n", message),
            None => format!(
                "\nTo sign in, open {} and enter the code {}\n(code expires at {})\n",
                challenge.verification_uri,
                challenge.user_code,
                challenge.expires_at.format("%H:%M:%S UTC")
            ),
        }
    }
}

#[async_trait]
impl VerificationPrompt for ConsolePrompt {
    async fn show_challenge(&self, challenge: &DeviceChallenge) -> Result<()> {
        let text = Self::render(challenge);
        let mut stderr = std::io::stderr().lock();
        stderr.write_all(text.as_bytes())?;
        stderr.flush()?;
        Ok(())
    }
}
