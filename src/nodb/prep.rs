//! Prep record: stage-completion timestamps and async job ids for a run.
//!
//! The authoritative store is an external key-value service; `redisprep.dump`
//! in the run directory mirrors every field except `locked:*` entries.

use super::snapshot::atomic_write;
use crate::error::{IoContext, Result};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DUMP_FILENAME: &str = "redisprep.dump";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskEnum {
    ProjectInit,
    FetchDem,
    BuildChannels,
    SetOutlet,
    BuildSubcatchments,
    AbstractWatershed,
    BuildLanduse,
    BuildSoils,
    BuildClimate,
    PrepWepp,
    RunWepp,
    RunObserved,
    ReturnPeriods,
}

impl TaskEnum {
    pub const ALL: [TaskEnum; 13] = [
        TaskEnum::ProjectInit,
        TaskEnum::FetchDem,
        TaskEnum::BuildChannels,
        TaskEnum::SetOutlet,
        TaskEnum::BuildSubcatchments,
        TaskEnum::AbstractWatershed,
        TaskEnum::BuildLanduse,
        TaskEnum::BuildSoils,
        TaskEnum::BuildClimate,
        TaskEnum::PrepWepp,
        TaskEnum::RunWepp,
        TaskEnum::RunObserved,
        TaskEnum::ReturnPeriods,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskEnum::ProjectInit => "project_init",
            TaskEnum::FetchDem => "fetch_dem",
            TaskEnum::BuildChannels => "build_channels",
            TaskEnum::SetOutlet => "set_outlet",
            TaskEnum::BuildSubcatchments => "build_subcatchments",
            TaskEnum::AbstractWatershed => "abstract_watershed",
            TaskEnum::BuildLanduse => "build_landuse",
            TaskEnum::BuildSoils => "build_soils",
            TaskEnum::BuildClimate => "build_climate",
            TaskEnum::PrepWepp => "prep_wepp",
            TaskEnum::RunWepp => "run_wepp",
            TaskEnum::RunObserved => "run_observed",
            TaskEnum::ReturnPeriods => "return_periods",
        }
    }

    /// Stages invalidated when this stage is redone.
    pub fn downstream(&self) -> &'static [TaskEnum] {
        match self {
            TaskEnum::FetchDem => &[
                TaskEnum::BuildChannels,
                TaskEnum::SetOutlet,
                TaskEnum::BuildSubcatchments,
                TaskEnum::AbstractWatershed,
                TaskEnum::BuildLanduse,
                TaskEnum::BuildSoils,
                TaskEnum::BuildClimate,
                TaskEnum::PrepWepp,
                TaskEnum::RunWepp,
            ],
            TaskEnum::BuildChannels | TaskEnum::SetOutlet | TaskEnum::BuildSubcatchments => &[
                TaskEnum::AbstractWatershed,
                TaskEnum::BuildLanduse,
                TaskEnum::BuildSoils,
                TaskEnum::BuildClimate,
                TaskEnum::PrepWepp,
                TaskEnum::RunWepp,
            ],
            TaskEnum::AbstractWatershed => &[
                TaskEnum::BuildLanduse,
                TaskEnum::BuildSoils,
                TaskEnum::BuildClimate,
                TaskEnum::PrepWepp,
                TaskEnum::RunWepp,
                TaskEnum::RunObserved,
                TaskEnum::ReturnPeriods,
            ],
            TaskEnum::BuildLanduse | TaskEnum::BuildSoils | TaskEnum::BuildClimate => &[
                TaskEnum::PrepWepp,
                TaskEnum::RunWepp,
                TaskEnum::RunObserved,
                TaskEnum::ReturnPeriods,
            ],
            TaskEnum::PrepWepp | TaskEnum::RunWepp => {
                &[TaskEnum::RunObserved, TaskEnum::ReturnPeriods]
            }
            _ => &[],
        }
    }
}

impl fmt::Display for TaskEnum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepAttr {
    SbsRequired,
    HasSbs,
}

impl PrepAttr {
    fn key(&self) -> &'static str {
        match self {
            PrepAttr::SbsRequired => "attrs:sbs_required",
            PrepAttr::HasSbs => "attrs:has_sbs",
        }
    }
}

/// Hash-per-run key-value service (the external Redis in production).
pub trait KvStore: Send + Sync {
    fn hget(&self, hash: &str, field: &str) -> Option<String>;
    fn hset(&self, hash: &str, field: &str, value: String);
    fn hdel(&self, hash: &str, field: &str);
    fn hgetall(&self, hash: &str) -> BTreeMap<String, String>;
}

/// In-process store. Shared across runs of one process; telemetry only.
#[derive(Default)]
pub struct MemoryKv {
    hashes: RwLock<BTreeMap<String, BTreeMap<String, String>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKv {
    fn hget(&self, hash: &str, field: &str) -> Option<String> {
        self.hashes.read().get(hash).and_then(|h| h.get(field).cloned())
    }

    fn hset(&self, hash: &str, field: &str, value: String) {
        self.hashes
            .write()
            .entry(hash.to_string())
            .or_default()
            .insert(field.to_string(), value);
    }

    fn hdel(&self, hash: &str, field: &str) {
        if let Some(h) = self.hashes.write().get_mut(hash) {
            h.remove(field);
        }
    }

    fn hgetall(&self, hash: &str) -> BTreeMap<String, String> {
        self.hashes.read().get(hash).cloned().unwrap_or_default()
    }
}

pub struct RedisPrep {
    wd: PathBuf,
    run_id: String,
    store: Arc<dyn KvStore>,
}

impl RedisPrep {
    /// Binds to `run_id`, seeding the store from the on-disk mirror when the
    /// store has nothing for this run yet.
    pub fn open(wd: &Path, run_id: &str, store: Arc<dyn KvStore>) -> Result<Self> {
        let prep = RedisPrep {
            wd: wd.to_path_buf(),
            run_id: run_id.to_string(),
            store,
        };
        let dump = wd.join(DUMP_FILENAME);
        if prep.store.hgetall(run_id).is_empty() && dump.exists() {
            let text = fs::read_to_string(&dump).at(&dump)?;
            let fields: BTreeMap<String, String> = serde_json::from_str(&text)?;
            for (field, value) in fields {
                prep.store.hset(run_id, &field, value);
            }
        }
        Ok(prep)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn set(&self, field: &str, value: String) -> Result<()> {
        self.store.hset(&self.run_id, field, value);
        self.dump()
    }

    fn del(&self, field: &str) -> Result<()> {
        self.store.hdel(&self.run_id, field);
        self.dump()
    }

    pub fn timestamp(&self, task: TaskEnum) -> Result<()> {
        let now = Utc::now().timestamp();
        tracing::debug!(run = %self.run_id, "timestamp {} = {}", task, now);
        self.set(&format!("timestamps:{}", task), now.to_string())
    }

    pub fn remove_timestamp(&self, task: TaskEnum) -> Result<()> {
        self.del(&format!("timestamps:{}", task))
    }

    pub fn get_timestamp(&self, task: TaskEnum) -> Option<i64> {
        self.store
            .hget(&self.run_id, &format!("timestamps:{}", task))
            .and_then(|v| v.parse().ok())
    }

    /// Clears the timestamps of every stage downstream of `task`.
    pub fn invalidate_downstream(&self, task: TaskEnum) -> Result<()> {
        for t in task.downstream() {
            self.store
                .hdel(&self.run_id, &format!("timestamps:{}", t));
        }
        self.dump()
    }

    pub fn set_rq_job_id(&self, task: TaskEnum, job_id: &str) -> Result<()> {
        self.set(&format!("rq:{}", task), job_id.to_string())
    }

    pub fn get_rq_job_id(&self, task: TaskEnum) -> Option<String> {
        self.store.hget(&self.run_id, &format!("rq:{}", task))
    }

    pub fn set_archive_job_id(&self, job_id: &str) -> Result<()> {
        self.set("archive:job_id", job_id.to_string())
    }

    pub fn get_archive_job_id(&self) -> Option<String> {
        self.store.hget(&self.run_id, "archive:job_id")
    }

    pub fn clear_archive_job_id(&self) -> Result<()> {
        self.del("archive:job_id")
    }

    pub fn set_attr(&self, attr: PrepAttr, value: bool) -> Result<()> {
        self.set(attr.key(), value.to_string())
    }

    pub fn get_attr(&self, attr: PrepAttr) -> bool {
        self.store
            .hget(&self.run_id, attr.key())
            .is_some_and(|v| v == "true")
    }

    pub fn set_locked(&self, name: &str, locked: bool) -> Result<()> {
        let field = format!("locked:{}", name);
        if locked {
            self.store.hset(&self.run_id, &field, "true".to_string());
        } else {
            self.store.hdel(&self.run_id, &field);
        }
        Ok(())
    }

    pub fn fields(&self) -> BTreeMap<String, String> {
        self.store.hgetall(&self.run_id)
    }

    pub fn dump(&self) -> Result<()> {
        let mirrored: BTreeMap<String, String> = self
            .fields()
            .into_iter()
            .filter(|(k, _)| !k.starts_with("locked:"))
            .collect();
        let text = serde_json::to_string_pretty(&mirrored)?;
        atomic_write(&self.wd.join(DUMP_FILENAME), text.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_excludes_locked_entries() {
        let dir = tempfile::tempdir().unwrap();
        let prep = RedisPrep::open(dir.path(), "run-a", Arc::new(MemoryKv::new())).unwrap();
        prep.set_locked("wepp.nodb", true).unwrap();
        prep.timestamp(TaskEnum::BuildLanduse).unwrap();
        prep.set_attr(PrepAttr::HasSbs, true).unwrap();

        let text = fs::read_to_string(dir.path().join(DUMP_FILENAME)).unwrap();
        let dumped: BTreeMap<String, String> = serde_json::from_str(&text).unwrap();
        assert!(dumped.contains_key("timestamps:build_landuse"));
        assert_eq!(dumped.get("attrs:has_sbs").map(String::as_str), Some("true"));
        assert!(!dumped.keys().any(|k| k.starts_with("locked:")));
    }

    #[test]
    fn test_reopen_seeds_from_dump() {
        let dir = tempfile::tempdir().unwrap();
        {
            let prep = RedisPrep::open(dir.path(), "run-b", Arc::new(MemoryKv::new())).unwrap();
            prep.set_rq_job_id(TaskEnum::RunWepp, "job-42").unwrap();
        }
        let prep = RedisPrep::open(dir.path(), "run-b", Arc::new(MemoryKv::new())).unwrap();
        assert_eq!(prep.get_rq_job_id(TaskEnum::RunWepp).as_deref(), Some("job-42"));
    }

    #[test]
    fn test_invalidate_downstream_clears_later_stages() {
        let dir = tempfile::tempdir().unwrap();
        let prep = RedisPrep::open(dir.path(), "run-c", Arc::new(MemoryKv::new())).unwrap();
        prep.timestamp(TaskEnum::AbstractWatershed).unwrap();
        prep.timestamp(TaskEnum::BuildSoils).unwrap();
        prep.timestamp(TaskEnum::RunWepp).unwrap();
        prep.invalidate_downstream(TaskEnum::AbstractWatershed).unwrap();
        assert!(prep.get_timestamp(TaskEnum::AbstractWatershed).is_some());
        assert!(prep.get_timestamp(TaskEnum::BuildSoils).is_none());
        assert!(prep.get_timestamp(TaskEnum::RunWepp).is_none());
    }
}
