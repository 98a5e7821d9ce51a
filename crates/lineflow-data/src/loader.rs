//! Resolution pipeline: reads a scenario file, resolves names, builds a line.
//!
//! Provides format detection (RON/JSON/TOML), file discovery, and the
//! name-resolution pass that turns a [`LineData`] into a wired
//! [`Line`].

use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use lineflow_core::error::LineError;
use lineflow_core::event::EventLog;
use lineflow_core::fixed::f64_to_fixed64;
use lineflow_core::id::{NodeId, SpawnerId, ZoneId};
use lineflow_core::line::Line;

use crate::schema::LineData;

// ===========================================================================
// Errors
// ===========================================================================

/// Errors that can occur while loading a scenario.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// No scenario file with the given base name exists in the directory.
    #[error("scenario '{name}' not found in {dir}")]
    MissingScenario { name: String, dir: PathBuf },

    /// The file has an extension we don't support.
    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// Two files with the same base name but different formats exist.
    #[error("conflicting formats: {a} and {b}")]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    /// A deserialization error occurred.
    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// A name reference could not be resolved.
    #[error("unresolved {expected_kind} reference '{name}'")]
    UnresolvedRef {
        name: String,
        expected_kind: &'static str,
    },

    /// A duplicate name was found.
    #[error("duplicate {kind} name '{name}'")]
    DuplicateName { kind: &'static str, name: String },

    /// An approach zone lists no nodes.
    #[error("approach zone '{name}' has no nodes")]
    EmptyZone { name: String },

    /// The core rejected a node or a piece of wiring.
    #[error("invalid '{name}': {source}")]
    Invalid {
        name: String,
        #[source]
        source: LineError,
    },

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Format detection
// ===========================================================================

/// Supported scenario file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

/// Detect the format of a file based on its extension.
pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(Format::Ron),
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(DataLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

// ===========================================================================
// File discovery
// ===========================================================================

/// Scan a directory for `{name}.ron`, `{name}.toml` or `{name}.json`.
///
/// Returns `Ok(None)` if no file is found, or `Err(ConflictingFormats)` if
/// several formats exist for the same name.
pub fn find_scenario(dir: &Path, name: &str) -> Result<Option<PathBuf>, DataLoadError> {
    let mut found: Option<PathBuf> = None;
    for ext in ["ron", "toml", "json"] {
        let candidate = dir.join(format!("{name}.{ext}"));
        if candidate.exists() {
            if let Some(existing) = found {
                return Err(DataLoadError::ConflictingFormats {
                    a: existing,
                    b: candidate,
                });
            }
            found = Some(candidate);
        }
    }
    Ok(found)
}

// ===========================================================================
// Deserialization
// ===========================================================================

/// Deserialize `content` according to `format`. `file` only labels errors.
pub fn deserialize_str<T: DeserializeOwned>(
    content: &str,
    format: Format,
    file: &Path,
) -> Result<T, DataLoadError> {
    let parse = |detail: String| DataLoadError::Parse {
        file: file.to_path_buf(),
        detail,
    };
    match format {
        Format::Ron => ron::from_str(content).map_err(|e| parse(e.to_string())),
        Format::Json => serde_json::from_str(content).map_err(|e| parse(e.to_string())),
        Format::Toml => toml::from_str(content).map_err(|e| parse(e.to_string())),
    }
}

/// Read a file and deserialize it according to its extension.
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    deserialize_str(&content, format, path)
}

// ===========================================================================
// Line building
// ===========================================================================

/// A built line plus the name tables used to address it.
#[derive(Debug)]
pub struct LoadedLine {
    pub line: Line,
    pub nodes: HashMap<String, NodeId>,
    pub spawners: HashMap<String, SpawnerId>,
    pub zones: HashMap<String, ZoneId>,
}

impl LoadedLine {
    pub fn node(&self, name: &str) -> Option<NodeId> {
        self.nodes.get(name).copied()
    }

    pub fn spawner(&self, name: &str) -> Option<SpawnerId> {
        self.spawners.get(name).copied()
    }

    pub fn zone(&self, name: &str) -> Option<ZoneId> {
        self.zones.get(name).copied()
    }
}

/// Load and build a scenario file.
pub fn load_line(path: &Path) -> Result<LoadedLine, DataLoadError> {
    let data: LineData = deserialize_file(path)?;
    debug!(file = %path.display(), nodes = data.nodes.len(), "scenario parsed");
    build_line(&data)
}

/// Load `{name}.{ron,toml,json}` from `dir`.
pub fn load_line_from_dir(dir: &Path, name: &str) -> Result<LoadedLine, DataLoadError> {
    let path = find_scenario(dir, name)?.ok_or_else(|| DataLoadError::MissingScenario {
        name: name.to_string(),
        dir: dir.to_path_buf(),
    })?;
    load_line(&path)
}

/// Resolve names and wire a line from parsed scenario data.
pub fn build_line(data: &LineData) -> Result<LoadedLine, DataLoadError> {
    let mut line = Line::new(data.seed);
    if let Some(capacity) = data.event_capacity {
        line.events = EventLog::new(capacity);
    }

    let mut nodes: HashMap<String, NodeId> = HashMap::new();
    for (index, node) in data.nodes.iter().enumerate() {
        check_duplicate(&nodes, &node.name, "node")?;
        let id = line
            .add_node(node.to_config(index))
            .map_err(|source| invalid(&node.name, source))?;
        nodes.insert(node.name.clone(), id);
    }

    for link in &data.links {
        let from = resolve_name(&nodes, &link.from, "node")?;
        let to = resolve_name(&nodes, &link.to, "node")?;
        line.connect(from, to, link.travel_ticks)
            .map_err(|source| invalid(&format!("{} -> {}", link.from, link.to), source))?;
    }

    for branch in &data.branches {
        let from = resolve_name(&nodes, &branch.from, "node")?;
        let to = resolve_name(&nodes, &branch.to, "node")?;
        line.connect_branch(from, to, f64_to_fixed64(branch.weight), branch.travel_ticks)
            .map_err(|source| invalid(&format!("{} => {}", branch.from, branch.to), source))?;
    }

    let mut spawners: HashMap<String, SpawnerId> = HashMap::new();
    for spawner in &data.spawners {
        check_duplicate(&spawners, &spawner.name, "spawner")?;
        let target = resolve_name(&nodes, &spawner.feeds, "node")?;
        let id = line
            .add_spawner(spawner.to_config(), target, spawner.travel_ticks)
            .map_err(|source| invalid(&spawner.name, source))?;
        spawners.insert(spawner.name.clone(), id);
    }

    let mut zones: HashMap<String, ZoneId> = HashMap::new();
    for zone in &data.zones {
        check_duplicate(&zones, &zone.name, "zone")?;
        let mut members = zone.nodes.iter();
        let first = members.next().ok_or_else(|| DataLoadError::EmptyZone {
            name: zone.name.clone(),
        })?;
        let first = resolve_name(&nodes, first, "node")?;
        let id = line
            .register_approach_zone(first)
            .map_err(|source| invalid(&zone.name, source))?;
        for member in members {
            let node = resolve_name(&nodes, member, "node")?;
            line.attach_approach_zone(node, id)
                .map_err(|source| invalid(&zone.name, source))?;
        }
        zones.insert(zone.name.clone(), id);
    }

    debug!(
        nodes = nodes.len(),
        spawners = spawners.len(),
        zones = zones.len(),
        seed = data.seed,
        "line built"
    );
    Ok(LoadedLine {
        line,
        nodes,
        spawners,
        zones,
    })
}

// ===========================================================================
// Name resolution helpers
// ===========================================================================

/// Look up a name, returning an `UnresolvedRef` error if not found.
pub fn resolve_name<V: Copy>(
    map: &HashMap<String, V>,
    name: &str,
    expected_kind: &'static str,
) -> Result<V, DataLoadError> {
    map.get(name).copied().ok_or_else(|| DataLoadError::UnresolvedRef {
        name: name.to_string(),
        expected_kind,
    })
}

/// Fail with `DuplicateName` if `name` is already taken.
pub fn check_duplicate<V>(
    map: &HashMap<String, V>,
    name: &str,
    kind: &'static str,
) -> Result<(), DataLoadError> {
    if map.contains_key(name) {
        Err(DataLoadError::DuplicateName {
            kind,
            name: name.to_string(),
        })
    } else {
        Ok(())
    }
}

fn invalid(name: &str, source: LineError) -> DataLoadError {
    DataLoadError::Invalid {
        name: name.to_string(),
        source,
    }
}

// ===========================================================================
// Tests
// ===========================================================================
