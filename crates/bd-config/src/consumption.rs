//! Unused-key reporting.
//!
//! Each run mode only reads a fixed set of config leaves. Everything else in
//! the merged config is either future-proofing, operator notes, or a typo —
//! this module flags it rather than letting it silently do nothing.
//!
//! Consumption is tracked by exact JSON pointer to the leaf value, not by
//! subtree prefix: `/risk/max_gross_exposure` being consumed does not make
//! `/risk/max_gross_exposure_extra` consumed too.

use anyhow::{bail, Result};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigMode {
    Backtest,
    Paper,
    Live,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnusedKeyPolicy {
    Warn,
    Fail,
}

#[derive(Debug, Clone)]
pub struct UnusedKeysReport {
    pub mode: ConfigMode,
    pub unused_leaf_pointers: Vec<String>,
}

impl UnusedKeysReport {
    pub fn is_clean(&self) -> bool {
        self.unused_leaf_pointers.is_empty()
    }
}

/// JSON pointers read by code today. Extend this list alongside the code
/// that starts reading a new key — an unused leaf is either dead config or
/// a bug, and this registry is what tells them apart.
fn consumed_pointers(mode: ConfigMode) -> &'static [&'static str] {
    match mode {
        ConfigMode::Backtest => BACKTEST,
        ConfigMode::Paper => PAPER,
        ConfigMode::Live => LIVE,
    }
}

static COMMON: &[&str] = &[
    "/engine/engine_id",
    "/broker/keys_env/api_key",
    "/broker/keys_env/api_secret",
    "/risk/max_gross_exposure",
];

static BACKTEST: &[&str] = COMMON;

static PAPER: &[&str] = COMMON;

static LIVE: &[&str] = &[
    "/engine/engine_id",
    "/broker/keys_env/api_key",
    "/broker/keys_env/api_secret",
    "/risk/max_gross_exposure",
    "/data/providers/twelvedata/api_key_env",
    "/integrity",
    "/reconcile",
];

/// Walk `value` to every leaf (scalar or array) and collect its JSON pointer.
fn collect_leaf_pointers(value: &Value, prefix: &str, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let pointer = format!("{prefix}/{k}");
                collect_leaf_pointers(v, &pointer, out);
            }
        }
        _ => out.push(prefix.to_string()),
    }
}

/// A leaf is consumed if its pointer exactly matches a registry entry, or if
/// it is nested beneath a registry entry that names a whole subtree.
fn is_consumed(pointer: &str, registry: &[&str]) -> bool {
    registry
        .iter()
        .any(|entry| pointer == *entry || pointer.starts_with(&format!("{entry}/")))
}

pub fn report_unused_keys(
    mode: ConfigMode,
    config_json: &Value,
    policy: UnusedKeyPolicy,
) -> Result<UnusedKeysReport> {
    let mut leaves = Vec::new();
    collect_leaf_pointers(config_json, "", &mut leaves);

    let registry = consumed_pointers(mode);
    let mut unused: Vec<String> = leaves
        .into_iter()
        .filter(|p| !is_consumed(p, registry))
        .collect();
    unused.sort();

    if policy == UnusedKeyPolicy::Fail && !unused.is_empty() {
        bail!(
            "CONFIG_UNUSED_KEYS: {} config key(s) not consumed in mode {:?}: {}",
            unused.len(),
            mode,
            unused.join(", "),
        );
    }

    Ok(UnusedKeysReport {
        mode,
        unused_leaf_pointers: unused,
    })
}
