use std::{env, str::FromStr};

use anyhow::{Context, Result};

/// Frame depth allowed by [`Config::default`].
pub const DEFAULT_MAX_FRAMES: usize = 64;

/// Live-object count of the first collection, and the floor of every later threshold.
pub const DEFAULT_GC_THRESHOLD: usize = 256;

pub const DEFAULT_GC_GROWTH_FACTOR: usize = 2;

/// Runtime configuration of a [`crate::vm::VirtualMachine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Call depth beyond which a call fails with a stack overflow.
    pub max_frames: usize,
    pub gc: GcConfig,
}

/// Tuning of the collector.
///
/// After every collection the threshold is raised to `max(base_threshold, live * growth_factor)`
/// if that is higher. It never goes down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcConfig {
    pub base_threshold: usize,
    pub growth_factor: usize,
    /// Collect before every allocation. Slow, but shakes out missing roots.
    pub stress: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_frames: DEFAULT_MAX_FRAMES,
            gc: GcConfig::default(),
        }
    }
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            base_threshold: DEFAULT_GC_THRESHOLD,
            growth_factor: DEFAULT_GC_GROWTH_FACTOR,
            stress: false,
        }
    }
}

impl Config {
    /// The defaults, overridden by `CLAM_MAX_FRAMES`, `CLAM_GC_THRESHOLD`, `CLAM_GC_GROWTH` and
    /// `CLAM_GC_STRESS` when set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(frames) = parse(&lookup, "CLAM_MAX_FRAMES")? {
            config.max_frames = frames;
        }
        if let Some(threshold) = parse(&lookup, "CLAM_GC_THRESHOLD")? {
            config.gc.base_threshold = threshold;
        }
        if let Some(factor) = parse::<usize>(&lookup, "CLAM_GC_GROWTH")? {
            anyhow::ensure!(factor >= 1, "CLAM_GC_GROWTH must be at least 1");
            config.gc.growth_factor = factor;
        }
        if let Some(stress) = parse(&lookup, "CLAM_GC_STRESS")? {
            config.gc.stress = stress;
        }
        Ok(config)
    }

    pub fn with_max_frames(mut self, max_frames: usize) -> Self {
        self.max_frames = max_frames;
        self
    }

    pub fn with_gc(mut self, gc: GcConfig) -> Self {
        self.gc = gc;
        self
    }

    pub fn with_gc_stress(mut self, stress: bool) -> Self {
        self.gc.stress = stress;
        self
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .with_context(|| format!("invalid value {:?} for {}", raw, key))
        })
        .transpose()
}
