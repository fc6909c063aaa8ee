use super::{EnrichmentError, KeyInfo, KeyRef, KeySize, RedisDataType};
use crate::client::{with_timeout, NodeClient, Reply};
use crate::config::ScanConfig;
use crate::error::{KeyscopeError, Result};
use crate::observability::ScanMetrics;
use bytes::Bytes;
use redis::{Cmd, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// When and whether `MEMORY USAGE` is collected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SizeMode {
    /// Appended to the TTL/length pipeline (one round trip). The length
    /// is not known yet, so large keys are measured too and their size is
    /// then reported as too large.
    #[default]
    Inline,
    /// Sent as a second pipeline, only for keys below the large-key threshold
    Deferred,
    /// Not collected; `size` stays absent
    Skip,
}

/// Positions of one key's replies inside the main pipeline
struct ReplySlots {
    ttl: usize,
    length: Option<usize>,
    memory: Option<usize>,
}

/// Collects TTL, cardinality and memory usage for batches of keys
#[derive(Debug, Clone)]
pub struct KeyEnricher {
    large_key_threshold: u64,
    timeout: Option<Duration>,
    metrics: Option<Arc<ScanMetrics>>,
}

impl KeyEnricher {
    pub fn new(large_key_threshold: u64) -> Self {
        Self {
            large_key_threshold,
            timeout: None,
            metrics: None,
        }
    }

    pub fn from_config(config: &ScanConfig) -> Self {
        Self {
            large_key_threshold: config.large_key_threshold,
            timeout: config.node_timeout(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<ScanMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Enrich `keys` from one node.
    ///
    /// With `include_size` the memory lookup rides in the same pipeline as
    /// TTL and length; without it a second pipeline is sent.
    pub async fn enrich(
        &self,
        client: &dyn NodeClient,
        keys: &[KeyRef],
        include_size: bool,
    ) -> Result<Vec<KeyInfo>> {
        let mode = if include_size {
            SizeMode::Inline
        } else {
            SizeMode::Deferred
        };
        self.enrich_keys(client, keys, None, mode).await
    }

    /// Enrich `keys`, skipping the `TYPE` lookup when every key is known to
    /// be of `key_type`. Keys that no longer exist are left out.
    pub async fn enrich_keys(
        &self,
        client: &dyn NodeClient,
        keys: &[KeyRef],
        key_type: Option<&RedisDataType>,
        mode: SizeMode,
    ) -> Result<Vec<KeyInfo>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let names: Vec<Bytes> = keys.iter().map(|k| k.name.clone()).collect();
        let types = match key_type {
            Some(key_type) => vec![Some(key_type.clone()); names.len()],
            None => self.fetch_types(client, &names).await?,
        };

        let typed: Vec<(Bytes, RedisDataType)> = names
            .into_iter()
            .zip(types)
            .filter_map(|(name, key_type)| match key_type {
                Some(RedisDataType::None) | None => None,
                Some(key_type) => Some((name, key_type)),
            })
            .collect();
        if typed.is_empty() {
            return Ok(Vec::new());
        }

        let mut commands = Vec::with_capacity(typed.len() * 3);
        let mut slots = Vec::with_capacity(typed.len());
        for (name, key_type) in &typed {
            let ttl = commands.len();
            let mut ttl_command = redis::cmd("TTL");
            ttl_command.arg(&name[..]);
            commands.push(ttl_command);

            let length = key_type.length_command(name).map(|command| {
                commands.push(command);
                commands.len() - 1
            });

            let memory = (mode == SizeMode::Inline).then(|| {
                commands.push(memory_usage(name));
                commands.len() - 1
            });

            slots.push(ReplySlots {
                ttl,
                length,
                memory,
            });
        }

        let replies = self.pipeline(client, commands).await?;

        let mut infos = Vec::with_capacity(typed.len());
        for ((name, key_type), slots) in typed.into_iter().zip(slots) {
            let ttl = match &replies[slots.ttl] {
                Err(message) => {
                    warn!(
                        "TTL failed for key {} on {}: {}",
                        String::from_utf8_lossy(&name),
                        client.addr(),
                        message
                    );
                    continue;
                }
                Ok(reply) => match redis::from_redis_value::<i64>(reply) {
                    // -2: the key expired after it was scanned
                    Ok(-2) | Err(_) => continue,
                    Ok(ttl) => ttl,
                },
            };

            let length = slots
                .length
                .and_then(|i| replies[i].as_ref().ok())
                .and_then(|reply| redis::from_redis_value::<u64>(reply).ok());

            let size = match mode {
                SizeMode::Skip => None,
                _ if self.is_too_large(length) => Some(KeySize::TooLarge),
                SizeMode::Inline => slots.memory.map(|i| size_from_reply(&replies[i])),
                SizeMode::Deferred => None,
            };

            infos.push(KeyInfo {
                name,
                key_type: Some(key_type),
                ttl: Some(ttl),
                length,
                size,
                node: Some(client.addr().clone()),
            });
        }

        if mode == SizeMode::Deferred {
            self.measure(client, &mut infos).await?;
        }

        if let Some(metrics) = &self.metrics {
            metrics.keys_enriched.inc_by(infos.len() as u64);
        }
        Ok(infos)
    }

    fn is_too_large(&self, length: Option<u64>) -> bool {
        length.map_or(false, |length| length >= self.large_key_threshold)
    }

    async fn fetch_types(
        &self,
        client: &dyn NodeClient,
        names: &[Bytes],
    ) -> Result<Vec<Option<RedisDataType>>> {
        let commands = names
            .iter()
            .map(|name| {
                let mut command = redis::cmd("TYPE");
                command.arg(&name[..]);
                command
            })
            .collect();
        let replies = self.pipeline(client, commands).await?;

        Ok(names
            .iter()
            .zip(replies)
            .map(|(name, reply)| match reply {
                Err(message) => {
                    warn!(
                        "TYPE failed for key {} on {}: {}",
                        String::from_utf8_lossy(name),
                        client.addr(),
                        message
                    );
                    None
                }
                Ok(reply) => redis::from_redis_value::<String>(&reply)
                    .ok()
                    .map(|t| RedisDataType::from_type_name(&t)),
            })
            .collect())
    }

    /// Second pass: `MEMORY USAGE` for every key still without a size
    async fn measure(&self, client: &dyn NodeClient, infos: &mut [KeyInfo]) -> Result<()> {
        let pending: Vec<usize> = infos
            .iter()
            .enumerate()
            .filter(|(_, info)| info.size.is_none())
            .map(|(i, _)| i)
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        let commands = pending
            .iter()
            .map(|&i| memory_usage(&infos[i].name))
            .collect();
        let replies = self.pipeline(client, commands).await?;

        for (i, reply) in pending.into_iter().zip(replies) {
            infos[i].size = Some(size_from_reply(&reply));
        }
        Ok(())
    }

    async fn pipeline(&self, client: &dyn NodeClient, commands: Vec<Cmd>) -> Result<Vec<Reply>> {
        let expected = commands.len();
        if let Some(metrics) = &self.metrics {
            metrics.pipeline_calls.inc();
        }
        debug!("Sending pipeline of {} commands to {}", expected, client.addr());

        let replies = with_timeout(client.addr(), self.timeout, client.send_pipeline(commands)).await?;
        if replies.len() != expected {
            return Err(KeyscopeError::Protocol(format!(
                "expected {} pipeline replies from {}, got {}",
                expected,
                client.addr(),
                replies.len()
            )));
        }
        Ok(replies)
    }
}

fn memory_usage(name: &[u8]) -> Cmd {
    let mut command = redis::cmd("MEMORY");
    command.arg("USAGE").arg(name).arg("SAMPLES").arg(0);
    command
}

fn memory_outcome(reply: &Reply) -> std::result::Result<Option<u64>, EnrichmentError> {
    match reply {
        Err(message) if message.to_lowercase().contains("unknown command") => {
            Err(EnrichmentError::MemoryUsageUnsupported(message.clone()))
        }
        Err(message) => Err(EnrichmentError::Reply(message.clone())),
        Ok(Value::Nil) => Ok(None),
        Ok(reply) => Ok(redis::from_redis_value::<u64>(reply).ok()),
    }
}

fn size_from_reply(reply: &Reply) -> KeySize {
    match memory_outcome(reply) {
        Ok(Some(bytes)) => KeySize::Measured(bytes),
        Ok(None) => KeySize::Unavailable,
        Err(e) => {
            debug!("{}", e);
            e.into()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MockKey, MockNode, NodeAddr};

    fn refs(node: &MockNode, names: &[&'static str]) -> Vec<KeyRef> {
        names
            .iter()
            .map(|name| KeyRef::new(*name, node.addr().clone()))
            .collect()
    }

    fn node() -> MockNode {
        MockNode::new("127.0.0.1", 7000).with_keys(vec![
            MockKey::string("str").with_length(5).with_memory(Some(56)),
            MockKey::new("big", "hash").with_length(50_000).with_memory(Some(9_000_000)),
            MockKey::new("doc", "ReJSON-RL").with_ttl(300).with_memory(Some(120)),
        ])
    }

    #[tokio::test]
    async fn test_inline_size_single_pipeline() {
        let node = node();
        let enricher = KeyEnricher::new(50_000);

        let infos = enricher
            .enrich(&node, &refs(&node, &["str", "big", "doc"]), true)
            .await
            .unwrap();

        // TYPE pipeline + one TTL/length/MEMORY pipeline
        let pipelines = node.pipelines();
        assert_eq!(pipelines.len(), 2);
        assert!(pipelines[1].iter().any(|c| c.name() == "MEMORY"));

        assert_eq!(infos.len(), 3);
        assert_eq!(infos[0].size, Some(KeySize::Measured(56)));
        assert_eq!(infos[0].length, Some(5));
        assert_eq!(infos[1].size, Some(KeySize::TooLarge));
        assert_eq!(infos[2].key_type, Some(RedisDataType::Json));
        assert_eq!(infos[2].length, None);
        assert_eq!(infos[2].ttl, Some(300));
        assert_eq!(infos[2].size, Some(KeySize::Measured(120)));
    }

    #[tokio::test]
    async fn test_deferred_size_skips_large_keys() {
        let node = node();
        let enricher = KeyEnricher::new(50_000);

        let infos = enricher
            .enrich(&node, &refs(&node, &["str", "big"]), false)
            .await
            .unwrap();

        let pipelines = node.pipelines();
        assert_eq!(pipelines.len(), 3);
        assert!(pipelines[1].iter().all(|c| c.name() != "MEMORY"));
        assert_eq!(pipelines[2].len(), 1);
        assert_eq!(pipelines[2][0].args()[2], Bytes::from_static(b"str"));

        assert_eq!(infos[0].size, Some(KeySize::Measured(56)));
        assert_eq!(infos[1].size, Some(KeySize::TooLarge));
    }

    #[tokio::test]
    async fn test_deferred_without_candidates_sends_no_memory_pipeline() {
        let node = node();
        let enricher = KeyEnricher::new(50_000);

        enricher
            .enrich(&node, &refs(&node, &["big"]), false)
            .await
            .unwrap();
        assert_eq!(node.pipelines().len(), 2);
    }

    /// Keys that received `MEMORY USAGE`, over every pipeline sent
    fn measured_keys(node: &MockNode) -> Vec<String> {
        node.pipelines()
            .iter()
            .flatten()
            .filter(|c| c.name() == "MEMORY")
            .map(|c| String::from_utf8_lossy(&c.args()[2]).into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_memory_lookups_per_size_mode() {
        let names = ["str", "big", "doc"];
        let enricher = KeyEnricher::new(50_000);

        // Inline rides in the TTL/length pipeline, so every key is measured
        let inline = node();
        enricher
            .enrich_keys(&inline, &refs(&inline, &names), None, SizeMode::Inline)
            .await
            .unwrap();
        assert_eq!(measured_keys(&inline), vec!["str", "big", "doc"]);

        // Deferred waits for the lengths and leaves the large hash alone
        let deferred = node();
        enricher
            .enrich_keys(&deferred, &refs(&deferred, &names), None, SizeMode::Deferred)
            .await
            .unwrap();
        assert_eq!(measured_keys(&deferred), vec!["str", "doc"]);

        let skipped = node();
        enricher
            .enrich_keys(&skipped, &refs(&skipped, &names), None, SizeMode::Skip)
            .await
            .unwrap();
        assert!(measured_keys(&skipped).is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_memory_usage_is_not_too_large() {
        let node = node().with_memory_usage_unsupported();
        let enricher = KeyEnricher::new(50_000);

        let infos = enricher
            .enrich(&node, &refs(&node, &["str", "big"]), true)
            .await
            .unwrap();

        assert_eq!(infos[0].size, Some(KeySize::Unavailable));
        assert_eq!(infos[1].size, Some(KeySize::TooLarge));
        assert_ne!(infos[0].size, infos[1].size);
    }

    #[tokio::test]
    async fn test_known_type_skips_type_lookup() {
        let node = node();
        let enricher = KeyEnricher::new(50_000);

        let infos = enricher
            .enrich_keys(
                &node,
                &refs(&node, &["str"]),
                Some(&RedisDataType::String),
                SizeMode::Skip,
            )
            .await
            .unwrap();

        let pipelines = node.pipelines();
        assert_eq!(pipelines.len(), 1);
        assert_eq!(pipelines[0][0].name(), "TTL");
        assert_eq!(infos[0].size, None);
        assert_eq!(infos[0].ttl, Some(-1));
    }

    #[tokio::test]
    async fn test_missing_keys_and_ttl_errors_are_dropped() {
        let node = node();
        node.fail_command_times("TTL", 1, "ERR something odd");
        let enricher = KeyEnricher::new(50_000);

        let infos = enricher
            .enrich(&node, &refs(&node, &["str", "ghost", "doc"]), true)
            .await
            .unwrap();

        let names: Vec<_> = infos.iter().map(|i| i.name_str().into_owned()).collect();
        assert_eq!(names, vec!["doc"]);
    }

    #[tokio::test]
    async fn test_length_error_keeps_key() {
        let node = node();
        node.fail_command("STRLEN", "ERR denied");
        let enricher = KeyEnricher::new(50_000);

        let infos = enricher
            .enrich(&node, &refs(&node, &["str"]), true)
            .await
            .unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].length, None);
        assert_eq!(infos[0].size, Some(KeySize::Measured(56)));
    }

    #[tokio::test]
    async fn test_transport_failure_propagates() {
        let node = node();
        node.disconnect();
        let enricher = KeyEnricher::new(50_000);

        let err = enricher
            .enrich(&node, &refs(&node, &["str"]), true)
            .await
            .unwrap_err();
        assert!(err.is_node_failure());
    }

    #[tokio::test]
    async fn test_empty_batch_sends_nothing() {
        let node = MockNode::new("127.0.0.1", 7000);
        let enricher = KeyEnricher::new(50_000);
        let infos = enricher.enrich(&node, &[], true).await.unwrap();
        assert!(infos.is_empty());
        assert!(node.pipelines().is_empty());
        assert_eq!(node.addr(), &NodeAddr::new("127.0.0.1", 7000));
    }
}
