//! Utility functions for directory management
//!
//! Directories follow the XDG Base Directory specification.
//!
//! # Directory Structure
//!
//! - Config: `~/.config/dfw-analyzer/` - `config.json`
//! - State: `~/.local/state/dfw-analyzer/` - log files
//!
//! # Example
//!
//! ```
//! use dfw_analyzer::utils::get_config_dir;
//!
//! if let Some(dir) = get_config_dir() {
//!     assert!(dir.ends_with("dfw-analyzer"));
//! }
//! ```

use directories::ProjectDirs;
use std::path::PathBuf;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "dfw-analyzer", "dfw-analyzer")
}

pub fn get_config_dir() -> Option<PathBuf> {
    project_dirs().map(|pd| pd.config_dir().to_path_buf())
}

pub fn get_state_dir() -> Option<PathBuf> {
    project_dirs().and_then(|pd| pd.state_dir().map(std::path::Path::to_path_buf))
}

pub fn ensure_dirs() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::fs::DirBuilder;
        use std::os::unix::fs::DirBuilderExt;

        let mut builder = DirBuilder::new();
        builder.mode(0o700);
        builder.recursive(true);

        for dir in [get_config_dir(), get_state_dir()].into_iter().flatten() {
            builder.create(dir)?;
        }
    }

    #[cfg(not(unix))]
    {
        for dir in [get_config_dir(), get_state_dir()].into_iter().flatten() {
            std::fs::create_dir_all(dir)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirs_are_namespaced() {
        for dir in [get_config_dir(), get_state_dir()].into_iter().flatten() {
            assert!(dir.ends_with("dfw-analyzer"), "{}", dir.display());
        }
    }
}
