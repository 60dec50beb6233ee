//! Phase-keyed handler registry

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use kiln_core::FileId;

use crate::build::Build;
use crate::handler::{BuildHandler, FileHandler};

/// Phases that run once per build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildPhase {
    Preparse,
    Postparse,
    Precompile,
    Postcompile,
}

/// Phases that run once per file, keyed by file type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilePhase {
    Preread,
    Read,
    Postread,
    Predependencies,
    Dependencies,
    Postdependencies,
    Prewrite,
    Write,
    Postwrite,
}

impl BuildPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildPhase::Preparse => "preparse",
            BuildPhase::Postparse => "postparse",
            BuildPhase::Precompile => "precompile",
            BuildPhase::Postcompile => "postcompile",
        }
    }
}

impl FilePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilePhase::Preread => "preread",
            FilePhase::Read => "read",
            FilePhase::Postread => "postread",
            FilePhase::Predependencies => "predependencies",
            FilePhase::Dependencies => "dependencies",
            FilePhase::Postdependencies => "postdependencies",
            FilePhase::Prewrite => "prewrite",
            FilePhase::Write => "write",
            FilePhase::Postwrite => "postwrite",
        }
    }
}

/// Full identity of a handler chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HookKey {
    Build(BuildPhase),
    File(FilePhase, String),
}

impl fmt::Display for HookKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookKey::Build(phase) => f.write_str(phase.as_str()),
            HookKey::File(phase, file_type) => write!(f, "{}:{}", phase.as_str(), file_type),
        }
    }
}

/// Wall time spent in one handler invocation.
#[derive(Debug, Clone)]
pub struct HookTiming {
    pub id: HookKey,
    pub name: String,
    pub duration: Duration,
}

#[derive(Default)]
pub struct Hooks {
    build_chains: RwLock<HashMap<BuildPhase, Vec<BuildHandler>>>,
    file_chains: RwLock<HashMap<(FilePhase, String), Vec<FileHandler>>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_build(&self, phase: BuildPhase, handler: BuildHandler) {
        tracing::debug!(hook = phase.as_str(), handler = handler.name(), "hook registered");
        self.build_chains
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(phase)
            .or_default()
            .push(handler);
    }

    pub fn add_file(&self, phase: FilePhase, file_type: &str, handler: FileHandler) {
        let file_type = file_type.to_lowercase();
        tracing::debug!(
            hook = %HookKey::File(phase, file_type.clone()),
            handler = handler.name(),
            "hook registered"
        );
        self.file_chains
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry((phase, file_type))
            .or_default()
            .push(handler);
    }

    /// Number of handlers registered under `key`.
    pub fn len(&self, key: &HookKey) -> usize {
        match key {
            HookKey::Build(phase) => self
                .build_chains
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .get(phase)
                .map_or(0, Vec::len),
            HookKey::File(phase, file_type) => self
                .file_chains
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .get(&(*phase, file_type.to_lowercase()))
                .map_or(0, Vec::len),
        }
    }

    /// Await every handler of a build phase in registration order.
    pub async fn run_build(
        &self,
        phase: BuildPhase,
        build: &Arc<Build>,
    ) -> anyhow::Result<Vec<HookTiming>> {
        // cloned so registration during a run never blocks on the lock
        let chain = match self
            .build_chains
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&phase)
        {
            Some(chain) => chain.clone(),
            None => return Ok(Vec::new()),
        };

        let mut timings = Vec::with_capacity(chain.len());
        for handler in chain {
            let started = Instant::now();
            handler.invoke(Arc::clone(build)).await?;
            timings.push(HookTiming {
                id: HookKey::Build(phase),
                name: handler.name().to_string(),
                duration: started.elapsed(),
            });
        }
        Ok(timings)
    }

    /// Await every handler of a file phase for `file_type` in registration order.
    pub async fn run_file(
        &self,
        phase: FilePhase,
        file_type: &str,
        file: FileId,
        build: &Arc<Build>,
    ) -> anyhow::Result<Vec<HookTiming>> {
        let file_type = file_type.to_lowercase();
        let chain = match self
            .file_chains
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(phase, file_type.clone()))
        {
            Some(chain) => chain.clone(),
            None => return Ok(Vec::new()),
        };

        let mut timings = Vec::with_capacity(chain.len());
        for handler in chain {
            let started = Instant::now();
            handler.invoke(file, Arc::clone(build)).await?;
            timings.push(HookTiming {
                id: HookKey::File(phase, file_type.clone()),
                name: handler.name().to_string(),
                duration: started.elapsed(),
            });
        }
        Ok(timings)
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let build = self.build_chains.read().unwrap_or_else(|e| e.into_inner()).len();
        let file = self.file_chains.read().unwrap_or_else(|e| e.into_inner()).len();
        f.debug_struct("Hooks")
            .field("build_chains", &build)
            .field("file_chains", &file)
            .finish()
    }
}
