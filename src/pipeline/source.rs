//! Record Sources
//!
//! 生レコードのバッチを供給する外部コラボレータ

use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

use crate::error::{Error, Result};

/// Raw, undecoded record entries
pub type RawBatch = Vec<Vec<u8>>;

/// レコードソース
#[async_trait]
pub trait RecordSource: Send {
    fn name(&self) -> &str;

    /// Next batch of raw entries. `Ok(None)` means the source is exhausted;
    /// an empty batch means nothing is available right now.
    async fn next_batch(&mut self) -> Result<Option<RawBatch>>;
}

/// In-memory source, one pre-built batch per call
#[derive(Debug, Default)]
pub struct MemorySource {
    batches: VecDeque<RawBatch>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// バッチを追加
    pub fn push_batch<I, B>(&mut self, entries: I)
    where
        I: IntoIterator<Item = B>,
        B: Into<Vec<u8>>,
    {
        self.batches
            .push_back(entries.into_iter().map(Into::into).collect());
    }

    pub fn remaining(&self) -> usize {
        self.batches.len()
    }
}

#[async_trait]
impl RecordSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    async fn next_batch(&mut self) -> Result<Option<RawBatch>> {
        Ok(self.batches.pop_front())
    }
}

/// JSON lines from any async reader (stdin, a replay file)
pub struct LinesSource<R> {
    lines: Lines<R>,
    batch_size: usize,
    name: String,
}

impl<R: AsyncBufRead + Unpin + Send> LinesSource<R> {
    pub fn new(reader: R, batch_size: usize, name: impl Into<String>) -> Self {
        Self {
            lines: reader.lines(),
            batch_size: batch_size.max(1),
            name: name.into(),
        }
    }
}

impl LinesSource<BufReader<tokio::io::Stdin>> {
    /// 標準入力から読み込む
    pub fn stdin(batch_size: usize) -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), batch_size, "stdin")
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> RecordSource for LinesSource<R> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn next_batch(&mut self) -> Result<Option<RawBatch>> {
        let mut batch = Vec::new();
        while batch.len() < self.batch_size {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| Error::Source(format!("{}: {}", self.name, e)))?;
            match line {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => batch.push(line.into_bytes()),
                None if batch.is_empty() => return Ok(None),
                None => break,
            }
        }
        Ok(Some(batch))
    }
}

#[cfg(feature = "redis-backend")]
pub use self::redis_source::RedisListSource;

#[cfg(feature = "redis-backend")]
mod redis_source {
    use super::*;
    use crate::config::RedisConfig;
    use redis::aio::ConnectionManager;
    use redis::Client;
    use tracing::info;

    /// Redis list source
    ///
    /// Pops up to `batch_size` entries per call with `LRANGE` + `LTRIM` in one
    /// `MULTI` block, so each entry is handed out once.
    pub struct RedisListSource {
        connection: ConnectionManager,
        key: String,
        batch_size: usize,
    }

    impl RedisListSource {
        /// Redisに接続
        pub async fn connect(config: &RedisConfig) -> Result<Self> {
            let client = Client::open(config.connection_url())
                .map_err(|e| Error::Source(format!("Redis client creation failed: {}", e)))?;
            let connection = ConnectionManager::new(client)
                .await
                .map_err(|e| Error::Source(format!("Redis connection failed: {}", e)))?;

            info!(address = %config.address, key = %config.key, "connected to redis");

            Ok(Self {
                connection,
                key: config.key.clone(),
                batch_size: config.batch_size.max(1),
            })
        }
    }

    #[async_trait]
    impl RecordSource for RedisListSource {
        fn name(&self) -> &str {
            "redis"
        }

        async fn next_batch(&mut self) -> Result<Option<RawBatch>> {
            let end = self.batch_size as isize - 1;
            let (entries,): (Vec<Vec<u8>>,) = redis::pipe()
                .atomic()
                .lrange(&self.key, 0, end)
                .ltrim(&self.key, self.batch_size as isize, -1)
                .ignore()
                .query_async(&mut self.connection)
                .await?;
            Ok(Some(entries))
        }
    }
}
