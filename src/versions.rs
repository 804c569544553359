//! Version pins for the vLLM image and their Dockerfile `ARG` lines.
//!
//! The pins file is the single source of truth for the CUDA / PyTorch / vLLM
//! triple. `check` reports Dockerfiles whose `ARG NAME=value` lines drift
//! from it; `sync` rewrites those lines in place. A pinned ARG that a
//! Dockerfile does not declare is reported, never inserted.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

static ARG_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(\s*ARG\s+)([A-Za-z_][A-Za-z0-9_]*)=(?:"([^"]*)"|(\S*))(.*)$"#)
        .expect("ARG pattern is valid")
});

#[derive(Debug, Error)]
pub enum VersionError {
    #[error("failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid pins file {}: {source}", .path.display())]
    Pins {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Pinned versions. Unset pins are not checked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionPins {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cuda: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub torch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vllm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub torch_cuda_arch_list: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_image: Option<String>,
}

impl VersionPins {
    pub fn load(path: &Path) -> Result<Self, VersionError> {
        let data = std::fs::read_to_string(path).map_err(|source| VersionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| VersionError::Pins {
            path: path.to_path_buf(),
            source,
        })
    }

    /// `(ARG name, expected value)` for every set pin.
    pub fn expected_args(&self) -> Vec<(&'static str, &str)> {
        [
            ("CUDA_VERSION", &self.cuda),
            ("TORCH_VERSION", &self.torch),
            ("VLLM_VERSION", &self.vllm),
            ("TORCH_CUDA_ARCH_LIST", &self.torch_cuda_arch_list),
            ("BASE_IMAGE", &self.base_image),
        ]
        .into_iter()
        .filter_map(|(arg, value)| value.as_deref().map(|v| (arg, v)))
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DriftKind {
    /// The ARG is declared with another value.
    Mismatch { line: usize, found: String },
    /// The ARG is not declared with a default value.
    Missing,
}

/// One pinned ARG that does not match a Dockerfile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Drift {
    pub arg: String,
    pub expected: String,
    #[serde(flatten)]
    pub kind: DriftKind,
}

/// Compare the ARG lines in `content` with the pins. With `rewrite`, also
/// return the content with mismatching values replaced.
fn reconcile(content: &str, pins: &VersionPins, rewrite: bool) -> (Vec<Drift>, String) {
    let expected = pins.expected_args();
    let mut seen = vec![false; expected.len()];
    let mut drifts = Vec::new();
    let mut out = String::with_capacity(content.len());

    for (index, line) in content.split_inclusive('\n').enumerate() {
        let body = line.trim_end_matches(['\n', '\r']);
        let ending = &line[body.len()..];

        let Some(caps) = ARG_LINE.captures(body) else {
            out.push_str(line);
            continue;
        };
        let Some(slot) = expected.iter().position(|(arg, _)| *arg == &caps[2]) else {
            out.push_str(line);
            continue;
        };
        seen[slot] = true;

        let (arg, want) = expected[slot];
        let quoted = caps.get(3).is_some();
        let found = caps.get(3).or_else(|| caps.get(4)).map_or("", |m| m.as_str());
        if found == want {
            out.push_str(line);
            continue;
        }

        drifts.push(Drift {
            arg: arg.to_string(),
            expected: want.to_string(),
            kind: DriftKind::Mismatch {
                line: index + 1,
                found: found.to_string(),
            },
        });
        if rewrite {
            let value = if quoted { format!("\"{want}\"") } else { want.to_string() };
            out.push_str(&format!("{}{arg}={value}{}{ending}", &caps[1], &caps[5]));
        } else {
            out.push_str(line);
        }
    }

    for ((arg, want), found) in expected.iter().zip(&seen) {
        if !found {
            drifts.push(Drift {
                arg: arg.to_string(),
                expected: want.to_string(),
                kind: DriftKind::Missing,
            });
        }
    }
    (drifts, out)
}

pub fn check_content(content: &str, pins: &VersionPins) -> Vec<Drift> {
    reconcile(content, pins, false).0
}

/// Rewrite drifting ARG values. Returns the new content and the drift that
/// was found (including Missing entries, which stay unresolved).
pub fn sync_content(content: &str, pins: &VersionPins) -> (String, Vec<Drift>) {
    let (drifts, out) = reconcile(content, pins, true);
    (out, drifts)
}

/// Drift found in one Dockerfile.
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub drifts: Vec<Drift>,
    /// Whether the file was rewritten.
    pub updated: bool,
}

impl FileReport {
    /// Drift that remains after the operation.
    pub fn unresolved(&self) -> usize {
        if self.updated {
            self.drifts
                .iter()
                .filter(|d| d.kind == DriftKind::Missing)
                .count()
        } else {
            self.drifts.len()
        }
    }
}

fn read(path: &Path) -> Result<String, VersionError> {
    std::fs::read_to_string(path).map_err(|source| VersionError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn check_file(path: &Path, pins: &VersionPins) -> Result<FileReport, VersionError> {
    let drifts = check_content(&read(path)?, pins);
    for drift in &drifts {
        warn!(file = %path.display(), arg = %drift.arg, expected = %drift.expected, kind = ?drift.kind, "Version drift");
    }
    Ok(FileReport {
        path: path.to_path_buf(),
        drifts,
        updated: false,
    })
}

pub fn sync_file(path: &Path, pins: &VersionPins) -> Result<FileReport, VersionError> {
    let content = read(path)?;
    let (rewritten, drifts) = sync_content(&content, pins);
    let updated = rewritten != content;
    if updated {
        std::fs::write(path, rewritten).map_err(|source| VersionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!(file = %path.display(), "Synchronised version pins");
    }
    for drift in drifts.iter().filter(|d| d.kind == DriftKind::Missing) {
        warn!(file = %path.display(), arg = %drift.arg, "Pinned ARG not declared; not inserting it");
    }
    Ok(FileReport {
        path: path.to_path_buf(),
        drifts,
        updated,
    })
}
