//! In-memory node used by the test suites.
//!
//! `MockNode` answers the small command set the scanner relies on from an
//! ordered key list, so SCAN cursors are plain indexes into that list. Failures,
//! latency and missing `MEMORY USAGE` support can be scripted per node.
//!
//! Compiled for unit tests and behind the `test-util` feature.

use super::{command_args, NodeAddr, NodeClient, Reply};
use crate::error::{KeyscopeError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use redis::{Cmd, Value};
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// A command as received by a [`MockNode`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCommand {
    args: Vec<Bytes>,
}

impl SentCommand {
    fn from_cmd(command: &Cmd) -> Self {
        Self {
            args: command_args(command)
                .into_iter()
                .map(Bytes::copy_from_slice)
                .collect(),
        }
    }

    /// Upper-cased command name
    pub fn name(&self) -> String {
        self.args
            .first()
            .map(|name| String::from_utf8_lossy(name).to_uppercase())
            .unwrap_or_default()
    }

    pub fn args(&self) -> &[Bytes] {
        &self.args
    }
}

impl fmt::Display for SentCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<_> = self.args.iter().map(|a| String::from_utf8_lossy(a)).collect();
        f.write_str(&parts.join(" "))
    }
}

fn ok_status(text: &str) -> Reply {
    Ok(Value::Status(text.to_string()))
}

fn int(n: i64) -> Reply {
    Ok(Value::Int(n))
}

fn data(bytes: impl AsRef<[u8]>) -> Value {
    Value::Data(bytes.as_ref().to_vec())
}

fn error(message: impl Into<String>) -> Reply {
    Err(message.into())
}

/// One key stored in a [`MockNode`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockKey {
    pub name: Bytes,
    /// Name as reported by `TYPE`, e.g. `hash` or `ReJSON-RL`
    pub key_type: String,
    pub ttl: i64,
    pub length: u64,
    /// `None` makes `MEMORY USAGE` answer nil
    pub memory: Option<u64>,
}

impl MockKey {
    pub fn new(name: impl Into<Bytes>, key_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_type: key_type.into(),
            ttl: -1,
            length: 1,
            memory: Some(64),
        }
    }

    pub fn string(name: impl Into<Bytes>) -> Self {
        Self::new(name, "string")
    }

    pub fn with_ttl(mut self, ttl: i64) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_length(mut self, length: u64) -> Self {
        self.length = length;
        self
    }

    pub fn with_memory(mut self, memory: Option<u64>) -> Self {
        self.memory = memory;
        self
    }
}

#[derive(Debug)]
struct ScriptedFailure {
    command: String,
    /// Calls that still succeed before the failure kicks in
    skip: u32,
    /// `None` fails forever
    remaining: Option<u32>,
    message: String,
}

#[derive(Debug, Default)]
struct MockState {
    keys: Vec<MockKey>,
    cluster_nodes: Option<String>,
    memory_usage_unsupported: bool,
    disconnected: bool,
    delay: Option<Duration>,
    failures: Vec<ScriptedFailure>,
    commands: Vec<SentCommand>,
    pipelines: Vec<Vec<SentCommand>>,
}

impl MockState {
    /// Consume a scripted failure for `name`, if any
    fn take_failure(&mut self, name: &str) -> Option<String> {
        let index = self.failures.iter().position(|f| f.command == name)?;
        let failure = &mut self.failures[index];
        if failure.skip > 0 {
            failure.skip -= 1;
            return None;
        }
        let message = failure.message.clone();
        if let Some(remaining) = failure.remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                self.failures.remove(index);
            }
        }
        Some(message)
    }

    fn find(&self, name: &[u8]) -> Option<&MockKey> {
        self.keys.iter().find(|k| k.name.as_ref() == name)
    }

    fn execute(&self, command: &SentCommand) -> Reply {
        let args = command.args();
        match (command.name().as_str(), args.len()) {
            ("PING", _) => ok_status("PONG"),
            ("AUTH", _) => Ok(Value::Okay),
            ("DBSIZE", _) => int(self.keys.len() as i64),
            ("SCAN", n) if n >= 2 => self.scan(&args[1..]),
            ("TYPE", 2) => ok_status(
                self.find(&args[1])
                    .map(|k| k.key_type.as_str())
                    .unwrap_or("none"),
            ),
            ("TTL", 2) => int(self.find(&args[1]).map(|k| k.ttl).unwrap_or(-2)),
            ("STRLEN", 2) => self.length(&args[1], "string"),
            ("HLEN", 2) => self.length(&args[1], "hash"),
            ("LLEN", 2) => self.length(&args[1], "list"),
            ("SCARD", 2) => self.length(&args[1], "set"),
            ("ZCARD", 2) => self.length(&args[1], "zset"),
            ("XLEN", 2) => self.length(&args[1], "stream"),
            ("MEMORY", n) if n >= 3 && args[1].eq_ignore_ascii_case(b"USAGE") => {
                if self.memory_usage_unsupported {
                    return error("ERR unknown command 'MEMORY', with args beginning with: 'USAGE'");
                }
                match self.find(&args[2]).and_then(|k| k.memory) {
                    Some(memory) => int(memory as i64),
                    None => Ok(Value::Nil),
                }
            }
            ("CLUSTER", 2) if args[1].eq_ignore_ascii_case(b"NODES") => match &self.cluster_nodes {
                Some(text) => Ok(data(text)),
                None => error("ERR This instance has cluster support disabled"),
            },
            (name, _) => error(format!("ERR unknown command '{}'", name)),
        }
    }

    fn length(&self, name: &[u8], expected: &str) -> Reply {
        match self.find(name) {
            Some(key) if key.key_type == expected => int(key.length as i64),
            Some(_) => error("WRONGTYPE Operation against a key holding the wrong kind of value"),
            None => int(0),
        }
    }

    /// SCAN cursor [MATCH pattern] [COUNT count] [TYPE type]
    fn scan(&self, args: &[Bytes]) -> Reply {
        let cursor = match std::str::from_utf8(&args[0])
            .ok()
            .and_then(|c| c.parse::<usize>().ok())
        {
            Some(cursor) => cursor,
            None => return error("ERR invalid cursor"),
        };

        let mut pattern: &[u8] = b"*";
        let mut count = 10usize;
        let mut key_type: Option<&[u8]> = None;
        for option in args[1..].chunks(2) {
            let [name, value] = option else {
                return error("ERR syntax error");
            };
            if name.eq_ignore_ascii_case(b"MATCH") {
                pattern = &value[..];
            } else if name.eq_ignore_ascii_case(b"COUNT") {
                count = match std::str::from_utf8(value).ok().and_then(|c| c.parse().ok()) {
                    Some(count) if count > 0 => count,
                    _ => return error("ERR value is not an integer or out of range"),
                };
            } else if name.eq_ignore_ascii_case(b"TYPE") {
                key_type = Some(&value[..]);
            } else {
                return error("ERR syntax error");
            }
        }

        let start = cursor.min(self.keys.len());
        let end = (start + count).min(self.keys.len());
        let next = if end >= self.keys.len() { 0 } else { end };

        // Filters run after the slice is taken, like the server does
        let names = self.keys[start..end]
            .iter()
            .filter(|k| glob_match(pattern, &k.name))
            .filter(|k| {
                key_type.map_or(true, |t| k.key_type.as_bytes().eq_ignore_ascii_case(t))
            })
            .map(|k| data(&k.name))
            .collect();

        Ok(Value::Bulk(vec![data(next.to_string()), Value::Bulk(names)]))
    }
}

/// In-memory [`NodeClient`] with scripted behaviour
#[derive(Debug)]
pub struct MockNode {
    addr: NodeAddr,
    state: Mutex<MockState>,
}

impl MockNode {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            addr: NodeAddr::new(host, port),
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn with_keys(self, keys: impl IntoIterator<Item = MockKey>) -> Self {
        self.lock().keys.extend(keys);
        self
    }

    /// Answer `CLUSTER NODES` with `text` instead of a cluster-disabled error
    pub fn with_cluster_nodes(self, text: impl Into<String>) -> Self {
        self.lock().cluster_nodes = Some(text.into());
        self
    }

    pub fn with_memory_usage_unsupported(self) -> Self {
        self.lock().memory_usage_unsupported = true;
        self
    }

    /// Delay every reply, used to trigger node timeouts
    pub fn with_delay(self, delay: Duration) -> Self {
        self.lock().delay = Some(delay);
        self
    }

    /// Make every `command` call fail with an error reply
    pub fn fail_command(&self, command: &str, message: &str) {
        self.script_failure(command, 0, None, message);
    }

    /// Let the first `successes` calls of `command` through, then fail
    /// every later one
    pub fn fail_command_after(&self, command: &str, successes: u32, message: &str) {
        self.script_failure(command, successes, None, message);
    }

    /// Make the next `times` calls of `command` fail with an error reply
    pub fn fail_command_times(&self, command: &str, times: u32, message: &str) {
        if times > 0 {
            self.script_failure(command, 0, Some(times), message);
        }
    }

    /// Drop the connection: every later call fails with an IO error
    pub fn disconnect(&self) {
        self.lock().disconnected = true;
    }

    /// Single commands received so far, in order
    pub fn commands(&self) -> Vec<SentCommand> {
        self.lock().commands.clone()
    }

    /// Number of single commands named `name` (e.g. `SCAN`)
    pub fn command_count(&self, name: &str) -> usize {
        self.lock()
            .commands
            .iter()
            .filter(|c| c.name() == name)
            .count()
    }

    /// Pipelines received so far, in order
    pub fn pipelines(&self) -> Vec<Vec<SentCommand>> {
        self.lock().pipelines.clone()
    }

    fn script_failure(&self, command: &str, skip: u32, remaining: Option<u32>, message: &str) {
        self.lock().failures.push(ScriptedFailure {
            command: command.to_uppercase(),
            skip,
            remaining,
            message: message.to_string(),
        });
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the state from the others
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn connection_lost(&self) -> KeyscopeError {
        KeyscopeError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            format!("connection to {} lost", self.addr),
        ))
    }

    async fn pause(&self) {
        let delay = self.lock().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl NodeClient for MockNode {
    fn addr(&self) -> &NodeAddr {
        &self.addr
    }

    async fn send_command(&self, command: Cmd) -> Result<Value> {
        self.pause().await;

        let command = SentCommand::from_cmd(&command);
        let mut state = self.lock();
        state.commands.push(command.clone());
        if state.disconnected {
            return Err(self.connection_lost());
        }
        if let Some(message) = state.take_failure(&command.name()) {
            return Err(KeyscopeError::Reply(message));
        }
        state.execute(&command).map_err(KeyscopeError::Reply)
    }

    async fn send_pipeline(&self, commands: Vec<Cmd>) -> Result<Vec<Reply>> {
        self.pause().await;

        let commands: Vec<SentCommand> = commands.iter().map(SentCommand::from_cmd).collect();
        let mut state = self.lock();
        state.pipelines.push(commands.clone());
        if state.disconnected {
            return Err(self.connection_lost());
        }

        let mut replies = Vec::with_capacity(commands.len());
        for command in &commands {
            let reply = match state.take_failure(&command.name()) {
                Some(message) => Err(message),
                None => state.execute(command),
            };
            replies.push(reply);
        }
        Ok(replies)
    }
}

/// Redis-style glob matching with `*`, `?`, `[...]` classes and `\` escapes
pub fn glob_match(pattern: &[u8], key: &[u8]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((b'*', rest)) => (0..=key.len()).any(|i| glob_match(rest, &key[i..])),
        Some((b'?', rest)) => !key.is_empty() && glob_match(rest, &key[1..]),
        Some((b'[', rest)) => match key.split_first() {
            Some((&c, key_rest)) => {
                let (matched, rest) = match_class(rest, c);
                matched && glob_match(rest, key_rest)
            }
            None => false,
        },
        Some((b'\\', [escaped, rest @ ..])) => {
            key.first() == Some(escaped) && glob_match(rest, &key[1..])
        }
        Some((c, rest)) => key.first() == Some(c) && glob_match(rest, &key[1..]),
    }
}

/// Match `c` against a class body (after `[`); returns the pattern after `]`
fn match_class(class: &[u8], c: u8) -> (bool, &[u8]) {
    let (negate, mut p) = match class.split_first() {
        Some((b'^', rest)) => (true, rest),
        _ => (false, class),
    };

    let mut matched = false;
    loop {
        match p {
            [] => break,
            [b']', rest @ ..] => {
                p = rest;
                break;
            }
            [b'\\', x, rest @ ..] => {
                matched |= *x == c;
                p = rest;
            }
            [lo, b'-', hi, rest @ ..] if *hi != b']' => {
                let (lo, hi) = if lo <= hi { (*lo, *hi) } else { (*hi, *lo) };
                matched |= lo <= c && c <= hi;
                p = rest;
            }
            [x, rest @ ..] => {
                matched |= *x == c;
                p = rest;
            }
        }
    }

    (matched != negate, p)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> MockNode {
        MockNode::new("127.0.0.1", 7000).with_keys(vec![
            MockKey::string("user:1"),
            MockKey::new("user:2", "hash").with_length(3),
            MockKey::string("session:1").with_ttl(60),
        ])
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match(b"*", b"anything"));
        assert!(glob_match(b"user:*", b"user:42"));
        assert!(!glob_match(b"user:*", b"session:1"));
        assert!(glob_match(b"h?llo", b"hello"));
        assert!(glob_match(b"h[ae]llo", b"hallo"));
        assert!(!glob_match(b"h[^e]llo", b"hello"));
        assert!(glob_match(b"h[a-c]llo", b"hbllo"));
        assert!(glob_match(b"a\\*b", b"a*b"));
        assert!(!glob_match(b"a\\*b", b"axb"));
    }

    fn scan(cursor: &str, extra: &[&str]) -> Cmd {
        let mut command = redis::cmd("SCAN");
        command.arg(cursor);
        for arg in extra {
            command.arg(*arg);
        }
        command
    }

    #[tokio::test]
    async fn test_scan_walks_in_order() {
        let node = node();
        let reply = node.send_command(scan("0", &["COUNT", "2"])).await.unwrap();
        assert_eq!(
            reply,
            Value::Bulk(vec![
                data("2"),
                Value::Bulk(vec![data("user:1"), data("user:2")]),
            ])
        );

        let reply = node.send_command(scan("2", &["COUNT", "2"])).await.unwrap();
        assert_eq!(
            reply,
            Value::Bulk(vec![data("0"), Value::Bulk(vec![data("session:1")])])
        );
        assert_eq!(node.commands()[1].to_string(), "SCAN 2 COUNT 2");
    }

    #[tokio::test]
    async fn test_scan_filters_after_slicing() {
        let node = node();
        let reply = node
            .send_command(scan("0", &["MATCH", "session:*", "COUNT", "2"]))
            .await
            .unwrap();
        assert_eq!(reply, Value::Bulk(vec![data("2"), Value::Bulk(vec![])]));
    }

    #[tokio::test]
    async fn test_scripted_failures_run_out() {
        let node = node();
        node.fail_command_times("dbsize", 1, "ERR busy");

        assert!(node.send_command(redis::cmd("DBSIZE")).await.is_err());
        let reply = node.send_command(redis::cmd("DBSIZE")).await.unwrap();
        assert_eq!(reply, Value::Int(3));
        assert_eq!(node.command_count("DBSIZE"), 2);
    }

    #[tokio::test]
    async fn test_failure_after_successes() {
        let node = node();
        node.fail_command_after("DBSIZE", 2, "ERR gone");

        assert!(node.send_command(redis::cmd("DBSIZE")).await.is_ok());
        assert!(node.send_command(redis::cmd("DBSIZE")).await.is_ok());
        for _ in 0..3 {
            let err = node.send_command(redis::cmd("DBSIZE")).await.unwrap_err();
            assert!(matches!(err, KeyscopeError::Reply(ref m) if m == "ERR gone"));
        }
    }

    #[tokio::test]
    async fn test_pipeline_errors_in_place() {
        let node = node().with_memory_usage_unsupported();
        let mut hlen = redis::cmd("HLEN");
        hlen.arg("user:2");
        let mut memory = redis::cmd("MEMORY");
        memory.arg("USAGE").arg("user:2");
        let mut wrong = redis::cmd("HLEN");
        wrong.arg("user:1");

        let replies = node.send_pipeline(vec![hlen, memory, wrong]).await.unwrap();

        assert_eq!(replies[0], Ok(Value::Int(3)));
        assert!(replies[1].is_err());
        assert!(matches!(replies[2], Err(ref m) if m.starts_with("WRONGTYPE")));
        assert_eq!(node.pipelines().len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect() {
        let node = node();
        node.disconnect();
        let err = node.send_command(redis::cmd("PING")).await.unwrap_err();
        assert!(err.is_node_failure());
    }
}
