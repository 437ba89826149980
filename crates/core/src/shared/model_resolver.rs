use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelResolveError {
    #[error("configured model path {0} does not exist")]
    MissingExplicit(PathBuf),
    #[error("model {name} not found; searched {}", display_paths(.searched))]
    NotFound { name: String, searched: Vec<PathBuf> },
}

/// Install locations of the cascades shipped with OpenCV packages.
const SYSTEM_CASCADE_DIRS: &[&str] = &[
    "/usr/share/opencv4/haarcascades",
    "/usr/share/opencv/haarcascades",
    "/usr/local/share/opencv4/haarcascades",
    "/opt/homebrew/share/opencv4/haarcascades",
];

/// Resolve a cascade model file by name.
///
/// Resolution order:
/// 1. Explicit path (must exist when given)
/// 2. User data directory (platform-specific)
/// 3. Bundled directory (for development / pre-packaged installs)
/// 4. `haarcascades/` under the working directory
/// 5. System OpenCV install directories
pub fn resolve(
    name: &str,
    explicit: Option<&Path>,
    bundled_dir: Option<&Path>,
) -> Result<PathBuf, ModelResolveError> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(ModelResolveError::MissingExplicit(path.to_path_buf()));
    }
    resolve_in(name, &search_dirs(bundled_dir))
}

/// Platform-specific directory for user-installed cascades.
///
/// - macOS: `~/Library/Application Support/Lookaway/haarcascades/`
/// - Linux: `$XDG_DATA_HOME/Lookaway/haarcascades/` or `~/.local/share/Lookaway/haarcascades/`
/// - Windows: `%APPDATA%/Lookaway/haarcascades/`
pub fn model_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("Lookaway").join("haarcascades"))
}

fn search_dirs(bundled_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    dirs.extend(model_data_dir());
    dirs.extend(bundled_dir.map(Path::to_path_buf));
    dirs.push(PathBuf::from("haarcascades"));
    dirs.extend(SYSTEM_CASCADE_DIRS.iter().map(PathBuf::from));
    dirs
}

fn resolve_in(name: &str, dirs: &[PathBuf]) -> Result<PathBuf, ModelResolveError> {
    let searched: Vec<PathBuf> = dirs.iter().map(|d| d.join(name)).collect();
    if let Some(found) = searched.iter().find(|p| p.is_file()) {
        log::debug!("Resolved {name} to {}", found.display());
        return Ok(found.clone());
    }
    Err(ModelResolveError::NotFound {
        name: name.to_string(),
        searched,
    })
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
