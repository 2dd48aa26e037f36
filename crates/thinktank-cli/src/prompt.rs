//! Prompt assembly: read the instructions file, then append the
//! contents of every file reachable from the given paths, honoring
//! `.gitignore` the way a developer would expect when pointing
//! `thinktank` at a source tree.

use std::path::Path;

use ignore::WalkBuilder;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PromptError {
    #[error("failed to read instructions file {path}: {source}")]
    ReadInstructions {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read input file {path}: {source}")]
    ReadInput {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Read `instructions_path`, then walk every path in `context_paths`
/// (files are read directly, directories are walked gitignore-aware),
/// appending each file's contents under a `--- <path> ---` header.
pub fn assemble_prompt(instructions_path: &Path, context_paths: &[std::path::PathBuf]) -> Result<String, PromptError> {
    let instructions = std::fs::read_to_string(instructions_path).map_err(|source| PromptError::ReadInstructions {
        path: instructions_path.to_path_buf(),
        source,
    })?;

    let mut prompt = instructions;

    for path in context_paths {
        if path.is_file() {
            append_file(&mut prompt, path)?;
            continue;
        }

        let walker = WalkBuilder::new(path).hidden(false).build();
        for entry in walker {
            let Ok(entry) = entry else { continue };
            if entry.file_type().is_some_and(|ft| ft.is_file()) {
                append_file(&mut prompt, entry.path())?;
            }
        }
    }

    Ok(prompt)
}

fn append_file(prompt: &mut String, path: &Path) -> Result<(), PromptError> {
    let contents = std::fs::read_to_string(path).map_err(|source| PromptError::ReadInput {
        path: path.to_path_buf(),
        source,
    })?;
    prompt.push_str(&format!("\n\n--- {} ---\n", path.display()));
    prompt.push_str(&contents);
    Ok(())
}
