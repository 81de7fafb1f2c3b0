//! Turning a parsed response body into the value a caller's future resolves
//! with.
use crate::version::{Counter, Value, Version};
use crate::wire::{self, Body, Extras};
use std::collections::BTreeMap;

/// What a caller's future ultimately resolves to, one variant per
/// per-opcode return shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Unit,
    Version(Version),
    Value(Option<Value>),
    Counter(Counter),
    Text(String),
    Stat(BTreeMap<String, String>),
}

pub(crate) fn parse_value(body: Body, cas: Version, keyed: bool) -> Value {
    let flags = match body.extras {
        Extras::GetReply { flags } => flags,
        _ => 0,
    };
    Value {
        flags,
        data: body.value,
        cas,
        key: if keyed { Some(body.key) } else { None },
    }
}

pub(crate) fn parse_counter(body: Body, cas: Version) -> std::io::Result<Counter> {
    let value = wire::read_u64_be(&body.value)?;
    Ok(Counter { value, cas })
}

pub(crate) fn parse_text(body: Body) -> String {
    String::from_utf8_lossy(&body.value).into_owned()
}

/// Accumulates `stat` entries until the zero-length terminator response
/// arrives.
#[derive(Debug, Default)]
pub(crate) struct StatAccumulator {
    entries: BTreeMap<String, String>,
}

impl StatAccumulator {
    /// Returns `Some(map)` once `body` is the zero-length terminator.
    pub(crate) fn push(&mut self, body: Body) -> Option<BTreeMap<String, String>> {
        if body.key.is_empty() && body.value.is_empty() {
            return Some(std::mem::take(&mut self.entries));
        }
        let key = String::from_utf8_lossy(&body.key).into_owned();
        let value = String::from_utf8_lossy(&body.value).into_owned();
        self.entries.insert(key, value);
        None
    }
}
