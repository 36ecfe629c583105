//! Chrome DevTools `.cpuprofile` document.
//!
//! The layout understood by DevTools, VS Code and speedscope:
//!
//! ```json
//! {"nodes": [{"id": 1, "callFrame": {...}, "hitCount": 0, "children": [2]}],
//!  "startTime": 1700000000000000, "endTime": 1700000000500000,
//!  "samples": [2, 2], "timeDeltas": [1000, 1000]}
//! ```
//!
//! `startTime`/`endTime` are microseconds since the Unix epoch. They are kept as
//! `u64` end to end, so 16-digit values are written without going through a
//! floating-point or 32-bit representation.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::{Read, Write};

use crate::{ParseError, Result, WriteResult};

/// A CPU profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuProfile {
    /// Call tree nodes; node 1 is the root.
    pub nodes: Vec<ProfileNode>,
    /// Session start in microseconds since the epoch.
    pub start_time: u64,
    /// Session end in microseconds since the epoch.
    pub end_time: u64,
    /// Node id sampled at each tick, in chronological order.
    #[serde(default)]
    pub samples: Vec<u32>,
    /// Microseconds since the previous sample (or since `start_time`).
    #[serde(default)]
    pub time_deltas: Vec<i64>,
}

/// A node in the profile call tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileNode {
    pub id: u32,
    pub call_frame: CallFrame,
    #[serde(default)]
    pub hit_count: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<u32>,
}

/// Information about a call frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    pub function_name: String,
    /// Decimal script id. Some producers write a number here.
    #[serde(default, deserialize_with = "deserialize_script_id")]
    pub script_id: String,
    #[serde(default)]
    pub url: String,
    /// Line number (0-based, -1 if unknown).
    #[serde(default = "default_line")]
    pub line_number: i64,
    /// Column number (0-based, -1 if unknown).
    #[serde(default = "default_line")]
    pub column_number: i64,
}

fn default_line() -> i64 {
    -1
}

fn deserialize_script_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    let value: serde_json::Value = Deserialize::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Null => Ok(String::new()),
        _ => Err(D::Error::custom("expected string or number for scriptId")),
    }
}

impl CpuProfile {
    /// Parse a profile from any `Read`-able source.
    pub fn parse<R: Read>(reader: R) -> Result<Self> {
        let profile: CpuProfile = serde_json::from_reader(reader)?;
        Ok(profile)
    }

    /// Write the profile as compact JSON.
    pub fn write<W: Write>(&self, mut writer: W) -> WriteResult<()> {
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    /// Write the profile as indented JSON.
    pub fn write_pretty<W: Write>(&self, mut writer: W) -> WriteResult<()> {
        serde_json::to_writer_pretty(&mut writer, self)?;
        writeln!(writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Check the cross references a consumer relies on.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(ParseError::InvalidProfile("no nodes in profile".into()));
        }

        let ids: HashSet<u32> = self.nodes.iter().map(|n| n.id).collect();

        for node in &self.nodes {
            for &child in &node.children {
                if !ids.contains(&child) {
                    return Err(ParseError::UnknownChild {
                        parent: node.id,
                        child,
                    });
                }
            }
        }

        for (sample_index, &node_id) in self.samples.iter().enumerate() {
            if !ids.contains(&node_id) {
                return Err(ParseError::UnknownNode {
                    sample_index,
                    node_id,
                });
            }
        }

        if self.samples.len() != self.time_deltas.len() {
            return Err(ParseError::DeltaCountMismatch {
                samples: self.samples.len(),
                deltas: self.time_deltas.len(),
            });
        }

        Ok(())
    }

    /// Total hits across all nodes.
    pub fn total_hits(&self) -> u64 {
        self.nodes.iter().map(|n| u64::from(n.hit_count)).sum()
    }

    /// Look up a node by id.
    pub fn node(&self, id: u32) -> Option<&ProfileNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_profile() -> &'static str {
        r#"{
            "nodes": [
                {
                    "id": 1,
                    "callFrame": {"functionName": "(root)", "scriptId": "0", "url": "", "lineNumber": -1, "columnNumber": -1},
                    "hitCount": 0,
                    "children": [2]
                },
                {
                    "id": 2,
                    "callFrame": {"functionName": "main", "scriptId": 3, "url": "file:///app/main.js", "lineNumber": 4, "columnNumber": 2},
                    "hitCount": 2
                }
            ],
            "startTime": 1712345678901234,
            "endTime": 1712345678905234,
            "samples": [2, 2],
            "timeDeltas": [1000, 3000]
        }"#
    }

    #[test]
    fn parse_profile() {
        let profile = CpuProfile::parse(Cursor::new(sample_profile())).unwrap();

        assert_eq!(profile.nodes.len(), 2);
        assert_eq!(profile.nodes[0].children, vec![2]);
        assert!(profile.nodes[1].children.is_empty());
        assert_eq!(profile.nodes[1].call_frame.script_id, "3");
        assert_eq!(profile.start_time, 1_712_345_678_901_234);
        assert_eq!(profile.total_hits(), 2);
        profile.validate().unwrap();
    }

    #[test]
    fn missing_line_numbers_default_to_unknown() {
        let data = r#"{
            "nodes": [{"id": 1, "callFrame": {"functionName": "(root)"}}],
            "startTime": 0,
            "endTime": 0
        }"#;
        let profile = CpuProfile::parse(Cursor::new(data)).unwrap();

        assert_eq!(profile.nodes[0].call_frame.line_number, -1);
        assert_eq!(profile.nodes[0].call_frame.column_number, -1);
        assert_eq!(profile.nodes[0].call_frame.script_id, "");
    }

    #[test]
    fn write_keeps_sixteen_digit_times() {
        let profile = CpuProfile::parse(Cursor::new(sample_profile())).unwrap();

        let mut output = Vec::new();
        profile.write(&mut output).unwrap();
        let text = String::from_utf8(output).unwrap();

        assert!(text.contains("\"startTime\":1712345678901234"));
        assert!(text.contains("\"endTime\":1712345678905234"));
        assert!(text.contains("\"scriptId\":\"3\""));
        // Empty children lists are omitted.
        assert_eq!(text.matches("\"children\"").count(), 1);
    }

    #[test]
    fn write_and_read_back() {
        let profile = CpuProfile::parse(Cursor::new(sample_profile())).unwrap();

        let mut output = Vec::new();
        profile.write_pretty(&mut output).unwrap();
        let reparsed = CpuProfile::parse(Cursor::new(output)).unwrap();

        assert_eq!(profile, reparsed);
    }

    #[test]
    fn unknown_sample_node_fails_validation() {
        let mut profile = CpuProfile::parse(Cursor::new(sample_profile())).unwrap();
        profile.samples.push(7);
        profile.time_deltas.push(0);

        assert!(matches!(
            profile.validate(),
            Err(ParseError::UnknownNode {
                sample_index: 2,
                node_id: 7
            })
        ));
    }

    #[test]
    fn unknown_child_fails_validation() {
        let mut profile = CpuProfile::parse(Cursor::new(sample_profile())).unwrap();
        profile.nodes[1].children.push(9);

        assert!(matches!(
            profile.validate(),
            Err(ParseError::UnknownChild { parent: 2, child: 9 })
        ));
    }

    #[test]
    fn delta_count_mismatch_fails_validation() {
        let mut profile = CpuProfile::parse(Cursor::new(sample_profile())).unwrap();
        profile.time_deltas.pop();

        assert!(matches!(
            profile.validate(),
            Err(ParseError::DeltaCountMismatch {
                samples: 2,
                deltas: 1
            })
        ));
    }
}
