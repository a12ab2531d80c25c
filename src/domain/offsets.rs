use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

const FILE_PREFIX: &str = "file:";

/// A logical substream of the uplink.
///
/// Each substream has its own position counter. For the appended substreams
/// the position is a row/line index; for `Summary` it counts transmitted
/// snapshots; for `File` it is the line index inside the named file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Substream {
    History,
    Events,
    Output,
    Console,
    Summary,
    File(String),
}

impl fmt::Display for Substream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Substream::History => f.write_str("history"),
            Substream::Events => f.write_str("events"),
            Substream::Output => f.write_str("output"),
            Substream::Console => f.write_str("console"),
            Substream::Summary => f.write_str("summary"),
            Substream::File(name) => write!(f, "{FILE_PREFIX}{name}"),
        }
    }
}

impl FromStr for Substream {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "history" => Ok(Substream::History),
            "events" => Ok(Substream::Events),
            "output" => Ok(Substream::Output),
            "console" => Ok(Substream::Console),
            "summary" => Ok(Substream::Summary),
            other => match other.strip_prefix(FILE_PREFIX) {
                Some(name) if !name.is_empty() => Ok(Substream::File(name.to_string())),
                _ => Err(format!("unknown substream '{other}'")),
            },
        }
    }
}

impl TryFrom<String> for Substream {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Substream> for String {
    fn from(value: Substream) -> Self {
        value.to_string()
    }
}

/// Last accounted position per substream.
///
/// Positions only ever move forward: `advance` and `merge` ignore values
/// lower than what is already recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OffsetMap {
    offsets: BTreeMap<Substream, i64>,
}

impl OffsetMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Position for `substream`, 0 when nothing was accounted yet.
    pub fn get(&self, substream: &Substream) -> i64 {
        self.offsets.get(substream).copied().unwrap_or(0)
    }

    /// Moves `substream` to `offset` if that is ahead of the current value.
    ///
    /// Returns whether the map changed.
    pub fn advance(&mut self, substream: Substream, offset: i64) -> bool {
        let current = self.offsets.entry(substream).or_insert(0);
        if offset > *current {
            *current = offset;
            true
        } else {
            false
        }
    }

    /// Moves `substream` forward by `count` positions.
    pub fn advance_by(&mut self, substream: Substream, count: i64) {
        if count > 0 {
            *self.offsets.entry(substream).or_insert(0) += count;
        }
    }

    /// Per-substream maximum of both maps.
    pub fn merge(&mut self, other: &OffsetMap) {
        for (substream, offset) in &other.offsets {
            self.advance(substream.clone(), *offset);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Substream, i64)> {
        self.offsets.iter().map(|(k, v)| (k, *v))
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }
}

impl FromIterator<(Substream, i64)> for OffsetMap {
    fn from_iter<T: IntoIterator<Item = (Substream, i64)>>(iter: T) -> Self {
        let mut map = OffsetMap::new();
        for (substream, offset) in iter {
            map.advance(substream, offset);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_is_monotonic() {
        let mut offsets = OffsetMap::new();
        assert!(offsets.advance(Substream::History, 10));
        assert!(!offsets.advance(Substream::History, 4));
        assert_eq!(offsets.get(&Substream::History), 10);
        assert_eq!(offsets.get(&Substream::Output), 0);
    }

    #[test]
    fn test_merge_takes_maximum() {
        let mut a: OffsetMap = [(Substream::History, 5), (Substream::Output, 9)]
            .into_iter()
            .collect();
        let b: OffsetMap = [(Substream::History, 7), (Substream::Output, 2)]
            .into_iter()
            .collect();

        a.merge(&b);

        assert_eq!(a.get(&Substream::History), 7);
        assert_eq!(a.get(&Substream::Output), 9);
    }

    #[test]
    fn test_json_uses_substream_names() {
        let offsets: OffsetMap = [
            (Substream::Events, 3),
            (Substream::File("train.log".to_string()), 12),
        ]
        .into_iter()
        .collect();

        let json = serde_json::to_value(&offsets).unwrap();
        assert_eq!(json["events"], 3);
        assert_eq!(json["file:train.log"], 12);

        let back: OffsetMap = serde_json::from_value(json).unwrap();
        assert_eq!(back, offsets);
    }

    #[test]
    fn test_unknown_substream_is_rejected() {
        assert!("bogus".parse::<Substream>().is_err());
        assert!("file:".parse::<Substream>().is_err());
    }
}
