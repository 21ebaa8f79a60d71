//! Tagged snapshot encoding for controller state.
//!
//! A snapshot is a JSON envelope `{"class": .., "version": .., "state": ..}`.
//! The class tag selects the payload schema; older snapshots are brought
//! forward by textual substitutions before decoding.

use super::{ControllerKind, NoDb};
use crate::climate::Climate;
use crate::error::{Error, IoContext, Result};
use crate::landuse::Landuse;
use crate::observed::Observed;
use crate::plugins::disturbed::Disturbed;
use crate::ron::Ron;
use crate::soils::Soils;
use crate::watershed::Watershed;
use crate::wepp::Wepp;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

pub const SNAPSHOT_VERSION: u32 = 3;

#[derive(Serialize)]
struct EnvelopeOut<'a, T> {
    class: &'a str,
    version: u32,
    state: &'a T,
}

#[derive(Deserialize)]
struct EnvelopeIn {
    class: String,
    #[serde(default)]
    version: u32,
    state: serde_json::Value,
}

pub fn encode<T: NoDb>(controller: &T) -> Result<String> {
    let envelope = EnvelopeOut {
        class: T::KIND.class_tag(),
        version: SNAPSHOT_VERSION,
        state: controller,
    };
    Ok(serde_json::to_string_pretty(&envelope)?)
}

/// Applies `migrations` in order to the raw snapshot text.
pub fn migrate(text: &str, migrations: &[(&str, &str)]) -> String {
    migrations
        .iter()
        .fold(text.to_string(), |acc, (from, to)| acc.replace(from, to))
}

pub fn decode<T: NoDb>(text: &str, path: &Path) -> Result<T> {
    let migrated = migrate(text, T::migrations());
    let envelope: EnvelopeIn = serde_json::from_str(&migrated)?;
    if envelope.class != T::KIND.class_tag() {
        return Err(Error::SnapshotClass {
            path: path.to_path_buf(),
            expected: T::KIND.class_tag(),
            found: envelope.class,
        });
    }
    if envelope.version > SNAPSHOT_VERSION {
        tracing::warn!(
            path = %path.display(),
            "snapshot version {} is newer than {}",
            envelope.version,
            SNAPSHOT_VERSION
        );
    }
    Ok(serde_json::from_value(envelope.state)?)
}

/// Any controller snapshot, decoded by its class tag. Unknown tags decode to
/// an opaque mapping.
#[derive(Debug)]
pub enum AnySnapshot {
    Ron(Box<Ron>),
    Watershed(Box<Watershed>),
    Landuse(Box<Landuse>),
    Soils(Box<Soils>),
    Climate(Box<Climate>),
    Wepp(Box<Wepp>),
    Observed(Box<Observed>),
    Disturbed(Box<Disturbed>),
    Opaque {
        class: String,
        state: serde_json::Value,
    },
}

pub fn decode_any(text: &str, path: &Path) -> Result<AnySnapshot> {
    let envelope: EnvelopeIn = serde_json::from_str(text)?;
    let kind = ControllerKind::ALL
        .iter()
        .copied()
        .find(|k| k.class_tag() == envelope.class);
    let snapshot = match kind {
        Some(ControllerKind::Ron) => AnySnapshot::Ron(Box::new(decode(text, path)?)),
        Some(ControllerKind::Watershed) => AnySnapshot::Watershed(Box::new(decode(text, path)?)),
        Some(ControllerKind::Landuse) => AnySnapshot::Landuse(Box::new(decode(text, path)?)),
        Some(ControllerKind::Soils) => AnySnapshot::Soils(Box::new(decode(text, path)?)),
        Some(ControllerKind::Climate) => AnySnapshot::Climate(Box::new(decode(text, path)?)),
        Some(ControllerKind::Wepp) => AnySnapshot::Wepp(Box::new(decode(text, path)?)),
        Some(ControllerKind::Observed) => AnySnapshot::Observed(Box::new(decode(text, path)?)),
        Some(ControllerKind::Disturbed) => AnySnapshot::Disturbed(Box::new(decode(text, path)?)),
        None => AnySnapshot::Opaque {
            class: envelope.class,
            state: envelope.state,
        },
    };
    Ok(snapshot)
}

/// Write-rename so a crash mid-write never truncates an existing snapshot.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).at(parent)?;
        }
    }
    let tmp_path = path.with_extension(match path.extension() {
        Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
        None => "tmp".to_string(),
    });
    let mut file = File::create(&tmp_path).at(&tmp_path)?;
    file.write_all(data).at(&tmp_path)?;
    file.sync_all().at(&tmp_path)?;
    fs::rename(&tmp_path, path).at(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_applies_in_order() {
        let text = r#"{"_subs_summary": 1}"#;
        let out = migrate(
            text,
            &[("_subs_summary", "sub_summary"), ("sub_summary", "sub_summaries")],
        );
        assert_eq!(out, r#"{"sub_summaries": 1}"#);
    }

    #[test]
    fn test_unknown_class_is_opaque() {
        let text = r#"{"class": "wepppy.nodb.mods.Rhem", "version": 1, "state": {"a": 1}}"#;
        match decode_any(text, Path::new("rhem.nodb")).unwrap() {
            AnySnapshot::Opaque { class, state } => {
                assert_eq!(class, "wepppy.nodb.mods.Rhem");
                assert_eq!(state["a"], 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_atomic_write_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wepp.nodb");
        atomic_write(&path, b"one").unwrap();
        atomic_write(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
        assert!(!dir.path().join("wepp.nodb.tmp").exists());
    }
}
