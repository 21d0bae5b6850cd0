//! Records delivered by a source and the cursors committed for them

use std::collections::HashMap;
use std::fmt;

/// An immutable record as delivered by the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    topic: String,
    partition: i32,
    offset: i64,
    key: Option<Vec<u8>>,
    value: Vec<u8>,
}

impl Record {
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        key: Option<Vec<u8>>,
        value: Vec<u8>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key,
            value,
        }
    }

    /// Build a record from an rdkafka message, copying key and payload.
    ///
    /// A message without payload (tombstone) becomes an empty value.
    pub fn from_message<M: rdkafka::message::Message>(message: &M) -> Self {
        Self {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(<[u8]>::to_vec),
            value: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Value decoded as UTF-8, with invalid sequences replaced
    pub fn value_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.value)
    }

    /// Cursor pointing at this record, i.e. "processed up to and including me"
    pub fn cursor(&self) -> Cursor {
        Cursor {
            topic: self.topic.clone(),
            partition: self.partition,
            offset: self.offset,
        }
    }
}

/// Last successfully processed offset of one topic partition
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cursor {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl Cursor {
    /// Offset handed to the broker on commit.
    ///
    /// Kafka stores the position of the next record to read, one past the
    /// last processed record.
    pub fn next_offset(&self) -> i64 {
        self.offset + 1
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset)
    }
}

/// Cursors committed by this consumer, one per topic partition.
///
/// A cursor only moves forward: a redelivered record at or below the
/// committed position does not pull the cursor back.
#[derive(Debug, Default, Clone)]
pub struct CursorTable {
    committed: HashMap<(String, i32), i64>,
}

impl CursorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether committing `cursor` would move its partition forward
    pub fn can_advance(&self, cursor: &Cursor) -> bool {
        match self.committed.get(&(cursor.topic.clone(), cursor.partition)) {
            Some(&current) => cursor.offset > current,
            None => true,
        }
    }

    /// Record a successful commit. Returns `false` and keeps the current
    /// position when the cursor would regress.
    pub fn advance(&mut self, cursor: &Cursor) -> bool {
        if !self.can_advance(cursor) {
            return false;
        }
        self.committed
            .insert((cursor.topic.clone(), cursor.partition), cursor.offset);
        true
    }

    /// Last committed offset for a topic partition
    pub fn get(&self, topic: &str, partition: i32) -> Option<i64> {
        self.committed.get(&(topic.to_string(), partition)).copied()
    }

    pub fn len(&self) -> usize {
        self.committed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.committed.is_empty()
    }

    /// Snapshot of every committed cursor, sorted by topic then partition
    pub fn cursors(&self) -> Vec<Cursor> {
        let mut cursors: Vec<Cursor> = self
            .committed
            .iter()
            .map(|((topic, partition), offset)| Cursor {
                topic: topic.clone(),
                partition: *partition,
                offset: *offset,
            })
            .collect();
        cursors.sort_by(|a, b| (&a.topic, a.partition).cmp(&(&b.topic, b.partition)));
        cursors
    }
}
