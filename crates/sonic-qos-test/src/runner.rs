//! Scripted [`CommandRunner`] that records every command it is given.

use async_trait::async_trait;
use sonic_qos_common::{CommandRunner, ExecResult, HarnessResult};
use std::sync::Mutex;

/// Replies to commands by prefix match; unmatched commands succeed silently.
pub struct ScriptedRunner {
    host: String,
    replies: Mutex<Vec<(String, ExecResult)>>,
    commands: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            replies: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
        }
    }

    /// Replies with `result` to any command starting with `prefix`.
    ///
    /// Later registrations win over earlier ones.
    pub fn on(self, prefix: impl Into<String>, result: ExecResult) -> Self {
        self.replies.lock().unwrap().push((prefix.into(), result));
        self
    }

    /// Commands run so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn ran(&self, cmd: &str) -> bool {
        self.commands.lock().unwrap().iter().any(|c| c == cmd)
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    fn host(&self) -> &str {
        &self.host
    }

    async fn run(&self, cmd: &str) -> HarnessResult<ExecResult> {
        self.commands.lock().unwrap().push(cmd.to_string());
        let replies = self.replies.lock().unwrap();
        Ok(replies
            .iter()
            .rev()
            .find(|(prefix, _)| cmd.starts_with(prefix.as_str()))
            .map(|(_, result)| result.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_prefix_reply_and_record() {
        let runner = ScriptedRunner::new("dut")
            .on("show ip", ExecResult::ok("first"))
            .on("show ip interface", ExecResult::ok("second"));

        assert_eq!(runner.run("show ip interface -d all").await.unwrap().stdout, "second");
        assert_eq!(runner.run("show ip route").await.unwrap().stdout, "first");
        assert!(runner.run("uptime").await.unwrap().success());
        assert!(runner.ran("uptime"));
        assert_eq!(runner.commands().len(), 3);
    }
}
