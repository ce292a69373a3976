//! On-disk JSON conventions.
//!
//! Every file the database writes goes through [`write_atomic`]: serialized
//! with sorted keys and 2-space indent, a trailing newline, written to a
//! `*.tmp` sibling, fsynced, then renamed over the destination.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Serialize a value into the canonical on-disk form.
///
/// Going through `serde_json::Value` sorts object keys regardless of struct
/// field order.
pub fn to_canonical_string<T: Serialize>(value: &T) -> Result<String> {
    let value = serde_json::to_value(value)
        .map_err(|e| Error::corrupt("serializing JSON", e))?;
    let mut rendered = serde_json::to_string_pretty(&value)
        .map_err(|e| Error::corrupt("serializing JSON", e))?;
    rendered.push('\n');
    Ok(rendered)
}

/// Atomically replace `path` with the serialized value.
pub fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let rendered = to_canonical_string(value)?;
    let tmp = path.with_extension("json.tmp");

    let mut file = File::create(&tmp)
        .map_err(|e| Error::io(format!("creating {}", tmp.display()), &e))?;
    file.write_all(rendered.as_bytes())
        .map_err(|e| Error::io(format!("writing {}", tmp.display()), &e))?;
    file.sync_all()
        .map_err(|e| Error::io(format!("syncing {}", tmp.display()), &e))?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| {
        Error::io(
            format!("renaming {} to {}", tmp.display(), path.display()),
            &e,
        )
    })
}

/// Load and deserialize a JSON file.
pub fn read<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .map_err(|e| Error::io(format!("reading {}", path.display()), &e))?;
    serde_json::from_str(&content).map_err(|e| Error::corrupt(path.display(), e))
}

/// ISO-8601 UTC timestamps with a `Z` suffix, for use with
/// `#[serde(with = "...")]`.
pub mod iso8601 {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        timestamp: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&timestamp.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Sample {
        zebra: u32,
        apple: u32,
        nested: BTreeMap<String, String>,
    }

    #[test]
    fn test_canonical_form_sorts_keys_and_ends_with_newline() {
        let sample = Sample {
            zebra: 1,
            apple: 2,
            nested: BTreeMap::new(),
        };
        let rendered = to_canonical_string(&sample).unwrap();
        assert!(rendered.ends_with('\n'));
        let apple = rendered.find("\"apple\"").unwrap();
        let zebra = rendered.find("\"zebra\"").unwrap();
        assert!(apple < zebra, "keys must be sorted: {}", rendered);
    }

    #[test]
    fn test_write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        let mut nested = BTreeMap::new();
        nested.insert("k".to_string(), "v".to_string());
        let sample = Sample {
            zebra: 7,
            apple: 8,
            nested,
        };

        write_atomic(&path, &sample).unwrap();
        let loaded: Sample = read(&path).unwrap();
        assert_eq!(loaded, sample);
        // No temp file left behind.
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_read_reports_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ nope").unwrap();
        let err = read::<Sample>(&path).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Corrupt);
    }

    #[derive(Serialize, Deserialize)]
    struct Stamped {
        #[serde(with = "iso8601")]
        at: DateTime<Utc>,
    }

    #[test]
    fn test_timestamps_use_z_suffix() {
        let stamped = Stamped { at: Utc::now() };
        let rendered = to_canonical_string(&stamped).unwrap();
        assert!(rendered.contains('Z'), "expected Z suffix: {}", rendered);
        let reparsed: Stamped = serde_json::from_str(&rendered).unwrap();
        assert_eq!(
            reparsed.at.timestamp(),
            stamped.at.timestamp()
        );
    }
}
