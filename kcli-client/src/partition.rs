//! Partition and message data model

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::KcliError;
use crate::Result;

pub type TopicName = String;
pub type PartitionId = i32;
pub type Offset = i64;

/// One partition of a topic together with its readable range and cursor.
///
/// `start <= offset <= end` always holds for values built through
/// [`Partition::new`] and [`Partition::with_offset`]. `end` is the offset the
/// next produced message will receive, so the readable range is
/// `[offset, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Partition {
    pub topic: TopicName,
    pub partition: PartitionId,
    pub start: Offset,
    pub end: Offset,
    pub offset: Offset,
    #[serde(default)]
    pub filter: String,
}

impl Partition {
    /// Create a partition with its cursor at the oldest available offset
    pub fn new<T: Into<TopicName>>(
        topic: T,
        partition: PartitionId,
        start: Offset,
        end: Offset,
    ) -> Result<Self> {
        if start > end {
            return Err(KcliError::metadata(format!(
                "partition {} has start offset {} beyond end offset {}",
                partition, start, end
            )));
        }

        Ok(Self {
            topic: topic.into(),
            partition,
            start,
            end,
            offset: start,
            filter: String::new(),
        })
    }

    /// Move the read cursor, keeping it inside `[start, end]`
    pub fn with_offset(mut self, offset: Offset) -> Result<Self> {
        if offset < self.start || offset > self.end {
            return Err(KcliError::invalid_config(format!(
                "offset {} outside of [{}, {}] for {}:{}",
                offset, self.start, self.end, self.topic, self.partition
            )));
        }
        self.offset = offset;
        Ok(self)
    }

    pub fn with_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.filter = filter.into();
        self
    }

    /// Number of messages between the cursor and the end of the partition
    pub fn remaining(&self) -> i64 {
        (self.end - self.offset).max(0)
    }

    pub fn is_exhausted(&self) -> bool {
        self.offset >= self.end
    }

    /// Compact single-line JSON form, used for display and as an ordering key
    pub fn to_compact_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!("{}:{}@{}", self.topic, self.partition, self.offset)
        })
    }

    /// Parse the form produced by [`Partition::to_compact_string`]
    pub fn from_compact_str(s: &str) -> Result<Self> {
        serde_json::from_str(s)
            .map_err(|e| KcliError::invalid_config(format!("invalid partition '{}': {}", s, e)))
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_compact_string())
    }
}

/// A decoded message and the partition position it was read from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub partition: Partition,
    #[serde(rename = "msg")]
    pub value: Bytes,
    pub offset: Offset,
}

impl Message {
    pub(crate) fn new(source: &Partition, offset: Offset, value: Bytes) -> Self {
        Self {
            partition: Partition {
                topic: source.topic.clone(),
                partition: source.partition,
                start: source.start,
                end: source.end,
                offset,
                filter: String::new(),
            },
            value,
            offset,
        }
    }

    /// Payload as text, replacing invalid UTF-8
    pub fn value_lossy(&self) -> String {
        String::from_utf8_lossy(&self.value).into_owned()
    }
}
