//! [`ConfigStore`] over `redis-cli` run through a [`CommandRunner`].
//!
//! This is how the harness reads a device it can only reach through a
//! shell: every access becomes one `redis-cli -n <db> ...` invocation,
//! wrapped in `ip netns exec` for namespaced ASICs.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::{HarnessError, HarnessResult};
use crate::shell::{shellquote, CommandRunner};
use crate::store::{ConfigStore, DbId, FieldValues};

/// Store backed by `redis-cli` on a (possibly remote) host.
pub struct CliStore {
    label: String,
    runner: Arc<dyn CommandRunner>,
    namespace: Option<String>,
}

impl CliStore {
    pub fn new(runner: Arc<dyn CommandRunner>, namespace: Option<String>) -> Self {
        let label = match &namespace {
            Some(ns) => format!("{}/{}", runner.host(), ns),
            None => runner.host().to_string(),
        };
        Self {
            label,
            runner,
            namespace,
        }
    }

    fn command(&self, db: DbId, args: &[&str]) -> String {
        let mut cmd = match &self.namespace {
            Some(ns) => format!("sudo ip netns exec {} redis-cli -n {}", ns, db.id()),
            None => format!("redis-cli -n {}", db.id()),
        };
        for arg in args {
            cmd.push(' ');
            cmd.push_str(&shellquote(arg));
        }
        cmd
    }

    async fn query(&self, db: DbId, args: &[&str]) -> HarnessResult<String> {
        let cmd = self.command(db, args);
        self.runner.run_or_fail(&cmd).await
    }
}

/// Pairs up the alternating field/value lines printed for HGETALL.
///
/// An empty value prints as a blank line, so lines are split on `\n`
/// exactly rather than with `str::lines`. A leftover final line ending
/// from the runner shows up as one trailing empty piece and is dropped.
fn parse_hgetall(output: &str) -> HarnessResult<FieldValues> {
    if output.is_empty() {
        return Ok(FieldValues::new());
    }
    let mut lines: Vec<&str> = output
        .split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .collect();
    if lines.len() % 2 != 0 && lines.last() == Some(&"") {
        lines.pop();
    }
    if lines.len() % 2 != 0 {
        return Err(HarnessError::invalid_data(
            "redis-cli",
            format!("HGETALL returned an odd number of lines ({})", lines.len()),
        ));
    }
    Ok(lines
        .chunks(2)
        .map(|pair| (pair[0].to_string(), pair[1].to_string()))
        .collect())
}

#[async_trait]
impl ConfigStore for CliStore {
    fn label(&self) -> &str {
        &self.label
    }

    async fn get(&self, db: DbId, key: &str, field: &str) -> HarnessResult<Option<String>> {
        let out = self.query(db, &["HGET", key, field]).await?;
        // redis-cli prints an empty line for a nil reply
        Ok(if out.is_empty() { None } else { Some(out) })
    }

    async fn hgetall(&self, db: DbId, key: &str) -> HarnessResult<FieldValues> {
        let out = self.query(db, &["HGETALL", key]).await?;
        parse_hgetall(&out)
    }

    async fn keys(&self, db: DbId, pattern: &str) -> HarnessResult<Vec<String>> {
        let out = self.query(db, &["KEYS", pattern]).await?;
        Ok(out
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn hset(&self, db: DbId, key: &str, field: &str, value: &str) -> HarnessResult<()> {
        self.query(db, &["HSET", key, field, value]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::ExecResult;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    struct EchoRunner {
        commands: Mutex<Vec<String>>,
        reply: ExecResult,
    }

    #[async_trait]
    impl CommandRunner for EchoRunner {
        fn host(&self) -> &str {
            "dut"
        }

        async fn run(&self, cmd: &str) -> HarnessResult<ExecResult> {
            self.commands.lock().unwrap().push(cmd.to_string());
            Ok(self.reply.clone())
        }
    }

    fn store(reply: ExecResult, namespace: Option<&str>) -> (Arc<EchoRunner>, CliStore) {
        let runner = Arc::new(EchoRunner {
            commands: Mutex::new(Vec::new()),
            reply,
        });
        let store = CliStore::new(runner.clone(), namespace.map(str::to_string));
        (runner, store)
    }

    #[tokio::test]
    async fn test_hget_quotes_key() {
        let (runner, store) = store(ExecResult::ok("5m"), None);
        let value = store
            .get(DbId::ConfigDb, "CABLE_LENGTH|AZURE", "Ethernet0")
            .await
            .unwrap();
        assert_eq!(value.as_deref(), Some("5m"));
        assert_eq!(
            runner.commands.lock().unwrap()[0],
            "redis-cli -n 4 \"HGET\" \"CABLE_LENGTH|AZURE\" \"Ethernet0\""
        );
    }

    #[tokio::test]
    async fn test_hget_nil() {
        let (_, store) = store(ExecResult::ok(""), None);
        assert_eq!(store.get(DbId::ApplDb, "X", "y").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_namespace_prefix() {
        let (runner, store) = store(ExecResult::ok(""), Some("asic1"));
        assert_eq!(store.label(), "dut/asic1");
        store.keys(DbId::ApplDb, "BUFFER_PG_TABLE:*").await.unwrap();
        assert!(runner.commands.lock().unwrap()[0]
            .starts_with("sudo ip netns exec asic1 redis-cli -n 0 \"KEYS\""));
    }

    #[tokio::test]
    async fn test_hgetall_pairs() {
        let (_, store) = store(ExecResult::ok("pool\ningress_lossless_pool\nsize\n0"), None);
        let fvs = store.hgetall(DbId::ApplDb, "BUFFER_PROFILE_TABLE:p").await.unwrap();
        assert_eq!(fvs.get("pool").map(String::as_str), Some("ingress_lossless_pool"));
        assert_eq!(fvs.get("size").map(String::as_str), Some("0"));
    }

    #[test]
    fn test_parse_hgetall_odd() {
        assert!(parse_hgetall("a\nb\nc").is_err());
        assert!(parse_hgetall("a\nb\nc\nd\ne").is_err());
        assert!(parse_hgetall("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_hgetall_empty_last_value() {
        // LocalShell output for a profile whose xoff field is empty
        let fvs = parse_hgetall("size\n1000\nxoff\n").unwrap();
        assert_eq!(fvs.len(), 2);
        assert_eq!(fvs.get("size").map(String::as_str), Some("1000"));
        assert_eq!(fvs.get("xoff").map(String::as_str), Some(""));

        // Same reply with the final line ending still attached
        let raw = parse_hgetall("size\n1000\nxoff\n\n").unwrap();
        assert_eq!(raw, fvs);

        let crlf = parse_hgetall("pool\r\negress_lossy_pool\r\n").unwrap();
        assert_eq!(crlf.get("pool").map(String::as_str), Some("egress_lossy_pool"));
    }

    #[tokio::test]
    async fn test_hgetall_keeps_empty_and_padded_values() {
        let (_, store) = store(ExecResult::ok("xon\n\nmode\n  static \nxoff\n"), None);
        let fvs = store.hgetall(DbId::ApplDb, "BUFFER_PROFILE_TABLE:p").await.unwrap();
        assert_eq!(fvs.get("xon").map(String::as_str), Some(""));
        assert_eq!(fvs.get("mode").map(String::as_str), Some("  static "));
        assert_eq!(fvs.get("xoff").map(String::as_str), Some(""));
    }

    #[tokio::test]
    async fn test_command_failure_propagates() {
        let (_, store) = store(ExecResult::failed(1, "Could not connect"), None);
        let err = store.hgetall(DbId::ConfigDb, "X").await.unwrap_err();
        assert!(matches!(err, HarnessError::CommandFailed { exit_code: 1, .. }));
    }
}
