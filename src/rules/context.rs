//! Read-only snapshots consulted by the rule engine.
//!
//! The sanctions list, mixer directory and FX rates are maintained by
//! external collaborators; the pipeline only needs membership and lookup
//! contracts. Snapshots are versioned out-of-band and never mutated during
//! evaluation.

use crate::error::{PipelineError, PipelineResult};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Membership contract against the sanctions list snapshot.
///
/// The source may be unreachable; callers must treat an `Err` as
/// "unknown", never as "clean".
pub trait SanctionsList: Send + Sync {
    fn is_listed(&self, address: &str) -> PipelineResult<bool>;
}

/// In-memory sanctions snapshot.
pub struct SanctionsSnapshot {
    entries: HashSet<String>,
}

impl SanctionsSnapshot {
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: addresses.into_iter().map(Into::into).collect(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::<String>::new())
    }

    /// Load a snapshot from a JSON array of addresses.
    pub fn load<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            PipelineError::ExternalDependency {
                dependency: "sanctions_list",
                reason: e.to_string(),
            }
        })?;
        let addresses: Vec<String> =
            serde_json::from_str(&raw).map_err(|e| PipelineError::ExternalDependency {
                dependency: "sanctions_list",
                reason: e.to_string(),
            })?;
        Ok(Self::new(addresses))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SanctionsList for SanctionsSnapshot {
    fn is_listed(&self, address: &str) -> PipelineResult<bool> {
        Ok(self.entries.contains(address))
    }
}

/// Stand-in used when the sanctions source could not be loaded at startup.
/// Every screen fails, which drives the fail-closed path downstream.
pub struct UnreachableSanctions {
    pub reason: String,
}

impl SanctionsList for UnreachableSanctions {
    fn is_listed(&self, _address: &str) -> PipelineResult<bool> {
        Err(PipelineError::ExternalDependency {
            dependency: "sanctions_list",
            reason: self.reason.clone(),
        })
    }
}

/// Known mixing-service address directory.
pub struct MixerDirectory {
    entries: HashSet<String>,
}

impl MixerDirectory {
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: addresses.into_iter().map(Into::into).collect(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::<String>::new())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            PipelineError::ExternalDependency {
                dependency: "mixer_directory",
                reason: e.to_string(),
            }
        })?;
        let addresses: Vec<String> =
            serde_json::from_str(&raw).map_err(|e| PipelineError::ExternalDependency {
                dependency: "mixer_directory",
                reason: e.to_string(),
            })?;
        Ok(Self::new(addresses))
    }

    pub fn is_mixer(&self, address: &str) -> bool {
        self.entries.contains(address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug, Deserialize)]
struct FxRatesFile {
    rates: HashMap<String, Decimal>,
}

/// USD conversion rates per currency unit, snapshotted out-of-band.
pub struct FxRates {
    rates: HashMap<String, Decimal>,
}

impl FxRates {
    pub fn new(rates: HashMap<String, Decimal>) -> Self {
        Self { rates }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            PipelineError::ExternalDependency {
                dependency: "fx_rates",
                reason: e.to_string(),
            }
        })?;
        let file: FxRatesFile =
            serde_json::from_str(&raw).map_err(|e| PipelineError::ExternalDependency {
                dependency: "fx_rates",
                reason: e.to_string(),
            })?;
        Ok(Self::new(file.rates))
    }

    /// Convert `amount` of `currency` to USD. `None` when the currency has
    /// no snapshotted rate.
    pub fn to_usd(&self, amount: Decimal, currency: &str) -> Option<Decimal> {
        self.rates.get(currency).map(|rate| amount * *rate)
    }

    pub fn currencies(&self) -> usize {
        self.rates.len()
    }
}

impl Default for FxRates {
    fn default() -> Self {
        let mut rates = HashMap::new();
        rates.insert("USD".to_string(), Decimal::ONE);
        rates.insert("USDT".to_string(), Decimal::ONE);
        rates.insert("USDC".to_string(), Decimal::ONE);
        Self::new(rates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::prelude::FromPrimitive;

    #[test]
    fn test_sanctions_membership() {
        let list = SanctionsSnapshot::new(["addr_a", "addr_b"]);
        assert!(list.is_listed("addr_a").unwrap());
        assert!(!list.is_listed("addr_c").unwrap());
    }

    #[test]
    fn test_unreachable_sanctions_always_errors() {
        let list = UnreachableSanctions {
            reason: "file missing".into(),
        };
        assert!(list.is_listed("anything").is_err());
    }

    #[test]
    fn test_fx_conversion() {
        let mut rates = HashMap::new();
        rates.insert("BTC".to_string(), Decimal::from(60_000));
        let fx = FxRates::new(rates);

        let usd = fx
            .to_usd(Decimal::from_f64(0.25).unwrap(), "BTC")
            .unwrap();
        assert_eq!(usd, Decimal::from(15_000));
        assert!(fx.to_usd(Decimal::ONE, "DOGE").is_none());
    }

    #[test]
    fn test_mixer_directory() {
        let mixers = MixerDirectory::new(["tumbler_1"]);
        assert!(mixers.is_mixer("tumbler_1"));
        assert!(!mixers.is_mixer("plain_wallet"));
    }

    #[test]
    fn test_snapshot_loading_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sanctions.json");
        std::fs::write(&path, r#"["bad_wallet"]"#).unwrap();

        let list = SanctionsSnapshot::load(&path).unwrap();
        assert_eq!(list.len(), 1);
        assert!(list.is_listed("bad_wallet").unwrap());

        assert!(SanctionsSnapshot::load(dir.path().join("missing.json")).is_err());
    }
}
