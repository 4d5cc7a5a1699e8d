//! Filesystem discovery of extension manifests (§4.4.2).

use std::path::{Path, PathBuf};

use lg_types::AppResult;

use crate::manifest::{AgenticModule, ExtensionManifest};

const MANIFEST_FILE: &str = "manifest.yaml";
const MODULE_FILE: &str = "agenticmodule.yaml";

/// One manifest discovered on disk, paired with the directory it was found
/// in (extension-relative paths resolve against this).
pub struct DiscoveredManifest {
    pub manifest: ExtensionManifest,
    pub dir: PathBuf,
}

pub struct DiscoveredModule {
    pub module: AgenticModule,
    pub dir: PathBuf,
}

/// Recursively walks `base_dir` loading every `manifest.yaml`. A parse
/// failure for one manifest is logged and skipped; the walk continues
/// (§4.4.2).
pub fn discover_manifests(base_dir: &Path) -> AppResult<(Vec<DiscoveredManifest>, Vec<String>)> {
    let mut found = Vec::new();
    let mut errors = Vec::new();
    walk(base_dir, MANIFEST_FILE, &mut |path, contents| {
        match serde_yaml::from_str::<ExtensionManifest>(contents)
            .map_err(|e| e.to_string())
            .and_then(|m| m.validate().map(|()| m).map_err(|e| e.to_string()))
        {
            Ok(manifest) => found.push(DiscoveredManifest {
                manifest,
                dir: path.parent().unwrap_or(base_dir).to_path_buf(),
            }),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping invalid extension manifest");
                errors.push(format!("{}: {e}", path.display()));
            }
        }
    })?;
    Ok((found, errors))
}

/// Secondary pass loading `agenticmodule.yaml` descriptors (§4.4.2).
pub fn discover_modules(base_dir: &Path) -> AppResult<(Vec<DiscoveredModule>, Vec<String>)> {
    let mut found = Vec::new();
    let mut errors = Vec::new();
    walk(base_dir, MODULE_FILE, &mut |path, contents| {
        match serde_yaml::from_str::<AgenticModule>(contents) {
            Ok(module) => found.push(DiscoveredModule {
                module,
                dir: path.parent().unwrap_or(base_dir).to_path_buf(),
            }),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping invalid agentic module");
                errors.push(format!("{}: {e}", path.display()));
            }
        }
    })?;
    Ok((found, errors))
}

fn walk(dir: &Path, file_name: &str, on_match: &mut dyn FnMut(&Path, &str)) -> AppResult<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.file_name().and_then(|n| n.to_str()) == Some(file_name) {
                let contents = std::fs::read_to_string(&path)?;
                on_match(&path, &contents);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn discovers_nested_manifests_and_skips_invalid_ones() {
        let dir = tempfile::tempdir().unwrap();
        let good_dir = dir.path().join("good");
        fs::create_dir_all(&good_dir).unwrap();
        fs::write(
            good_dir.join(MANIFEST_FILE),
            "name: good\nversion: 1.0.0\ndescription: ok\ntype: workflow\nsteps:\n  - uses: llm.chat\n",
        )
        .unwrap();

        let bad_dir = dir.path().join("bad");
        fs::create_dir_all(&bad_dir).unwrap();
        fs::write(bad_dir.join(MANIFEST_FILE), "not: [valid manifest").unwrap();

        let (found, errors) = discover_manifests(dir.path()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].manifest.name, "good");
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn missing_base_dir_yields_no_results() {
        let (found, errors) = discover_manifests(Path::new("/nonexistent/path/xyz")).unwrap();
        assert!(found.is_empty());
        assert!(errors.is_empty());
    }
}
