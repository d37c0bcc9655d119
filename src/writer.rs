use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::platform::{Plan, Platform};
use crate::template;

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Could not write {path}: {reason}")]
    WriteError { path: String, reason: String },

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub fn template_file_name(stack_name: &str) -> String {
    return format!("{stack_name}.template.json");
}

fn write_json<T: Serialize>(path: &Path, contents: &T) -> Result<(), Error> {
    let file_contents = serde_json::to_string_pretty(contents)
        .map_err(|error| Error::SerializationError(error.to_string()))?;

    return fs::write(path, file_contents).map_err(|error| Error::WriteError {
        path: path.display().to_string(),
        reason: error.to_string(),
    });
}

/// Writes one template per stack plus the manifest into `directory`,
/// creating it when missing. Returns the written paths, manifest last.
pub fn write_assembly(
    directory: &Path,
    platform: &Platform,
    plan: &Plan,
) -> Result<Vec<PathBuf>, Error> {
    fs::create_dir_all(directory).map_err(|error| Error::WriteError {
        path: directory.display().to_string(),
        reason: error.to_string(),
    })?;

    let mut written = Vec::new();
    for stack in platform.stacks() {
        let path = directory.join(template_file_name(&stack.name));
        write_json(&path, &template::synthesize(stack))?;
        info!(stack = %stack.name, path = %path.display(), "template written");
        written.push(path);
    }

    let manifest = directory.join(MANIFEST_FILE);
    write_json(&manifest, plan)?;
    written.push(manifest);

    return Ok(written);
}

pub fn write_outputs<T: Serialize>(path: &Path, outputs: &T) -> Result<(), Error> {
    write_json(path, outputs)?;
    info!(path = %path.display(), "outputs written");
    return Ok(());
}
