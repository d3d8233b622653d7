use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use super::profile::LanguageProfile;
use super::runner::ProcessRunner;

const PROBE_MAX_OUTPUT: usize = 64 << 10;

#[derive(Debug, Clone, Copy)]
struct ProbeEntry {
    available: bool,
    checked_at: Instant,
}

/// Answers whether a language's toolchain is installed on this host
///
/// Results are cached for at most `ttl`; a zero `ttl` probes on every call.
#[derive(Debug)]
pub struct CapabilityProber {
    runner: ProcessRunner,
    timeout: Duration,
    ttl: Duration,
    probe_dir: PathBuf,
    cache: RwLock<HashMap<String, ProbeEntry>>,
}

impl CapabilityProber {
    pub fn new(runner: ProcessRunner, timeout: Duration, ttl: Duration) -> Self {
        Self {
            runner,
            timeout,
            ttl,
            probe_dir: std::env::temp_dir(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn is_supported(&self, profile: &LanguageProfile) -> bool {
        if profile.is_sandboxed() {
            return true;
        }

        if let Some(available) = self.cached(&profile.name) {
            return available;
        }

        let available = self.probe(profile).await;
        if !self.ttl.is_zero() {
            self.cache.write().insert(
                profile.name.clone(),
                ProbeEntry {
                    available,
                    checked_at: Instant::now(),
                },
            );
        }

        available
    }

    fn cached(&self, name: &str) -> Option<bool> {
        let cache = self.cache.read();
        cache
            .get(name)
            .filter(|entry| entry.checked_at.elapsed() < self.ttl)
            .map(|entry| entry.available)
    }

    async fn probe(&self, profile: &LanguageProfile) -> bool {
        match self
            .runner
            .run(&profile.probe, &self.probe_dir, self.timeout, PROBE_MAX_OUTPUT)
            .await
        {
            Ok(output) if output.success() => {
                log::debug!("Toolchain for {} is available", profile.name);
                true
            }
            Ok(output) => {
                log::info!(
                    "Toolchain probe for {} failed: {:?}",
                    profile.name,
                    output.termination
                );
                false
            }
            Err(e) => {
                log::info!("Toolchain for {} is not installed: {e}", profile.name);
                false
            }
        }
    }
}
