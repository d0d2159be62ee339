// Copyright (c) 2024-2026 Otto Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Workspace-local config file name, discovered by walking ancestors of the
/// working directory.
const WORKSPACE_FILE: &str = ".otto.yaml";

/// Config layers in ascending precedence.
///
/// Discovery order: the system file, the user config directory, every
/// `.otto.yaml` on the path from the filesystem root down to the working
/// directory (a closer directory overrides a farther one, so a repo can
/// refine its parent workspace's settings), and finally the file named by
/// `OTTO_CONFIG`.
fn discovered_layers() -> Vec<PathBuf> {
    let mut layers = vec![PathBuf::from("/etc/otto/config.yaml")];
    if let Some(base) = dirs::config_dir() {
        layers.push(base.join("otto/config.yaml"));
    }
    if let Ok(cwd) = std::env::current_dir() {
        let mut workspace: Vec<PathBuf> =
            cwd.ancestors().map(|dir| dir.join(WORKSPACE_FILE)).collect();
        workspace.reverse(); // root first, working directory last
        layers.extend(workspace);
    }
    if let Some(path) = std::env::var_os("OTTO_CONFIG") {
        if !path.is_empty() {
            layers.push(PathBuf::from(path));
        }
    }
    layers
}

/// Load configuration by overlaying every discovered layer, then the
/// explicit `--config` path (which, unlike discovered layers, must exist).
///
/// The merged document is validated against the schema — a config that
/// parses as YAML but does not fit the schema is an error, not a silent
/// fall-back to defaults — and range-clamped before being returned.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = serde_yaml::Value::Null;
    for path in discovered_layers() {
        if !path.is_file() {
            continue;
        }
        overlay(&mut merged, read_layer(&path)?, false);
    }
    if let Some(path) = explicit {
        overlay(&mut merged, read_layer(path)?, false);
    }

    let mut config: Config = match merged {
        serde_yaml::Value::Null => Config::default(),
        value => serde_yaml::from_value(value)
            .context("merged config does not match the expected schema")?,
    };
    config.normalize();
    Ok(config)
}

fn read_layer(path: &Path) -> anyhow::Result<serde_yaml::Value> {
    debug!(path = %path.display(), "applying config layer");
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Overlay `src` onto `dst`.
///
/// Mappings combine key-by-key so a layer can override a single knob (say
/// `engine.turn_limit`) without restating its siblings.  The `agents` map
/// is the exception: a redefined agent replaces the lower layer's
/// definition wholesale — splicing the instructions of one layer with the
/// delegate list of another is never what the author meant.
fn overlay(dst: &mut serde_yaml::Value, src: serde_yaml::Value, in_agents: bool) {
    use serde_yaml::Value;
    match (dst, src) {
        (Value::Mapping(d), Value::Mapping(s)) => {
            for (key, value) in s {
                if !in_agents && d.contains_key(&key) {
                    if let Some(slot) = d.get_mut(&key) {
                        let descend_agents = key.as_str() == Some("agents");
                        overlay(slot, value, descend_agents);
                        continue;
                    }
                }
                d.insert(key, value);
            }
        }
        // Scalars, sequences, and type changes: the higher layer wins.
        (dst, src) => *dst = src,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
