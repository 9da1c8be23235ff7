use std::path::PathBuf;

/// Platform-specific path handling that follows XDG Base Directory spec on Unix-like systems
/// and Windows conventions on Windows.
///
/// On macOS and Linux:
/// - Config: $XDG_CONFIG_HOME/{name} (default: ~/.config/{name})
/// - Data: $XDG_DATA_HOME/{name} (default: ~/.local/share/{name})
///
/// On Windows both live under %APPDATA%\{name}.
pub struct ProjectPaths {
    name: String,
}

impl ProjectPaths {
    /// Returns None when no home directory can be found.
    pub fn new(name: &str) -> Option<Self> {
        home_dir()?;
        Some(ProjectPaths {
            name: name.to_string(),
        })
    }

    pub fn config_dir(&self) -> PathBuf {
        #[cfg(target_os = "windows")]
        {
            windows_appdata()
                .map(|p| p.join(&self.name))
                .unwrap_or_else(|| PathBuf::from(format!(".{}", self.name)))
        }

        #[cfg(not(target_os = "windows"))]
        {
            xdg_dir("XDG_CONFIG_HOME", &[".config"], &self.name)
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        #[cfg(target_os = "windows")]
        {
            windows_appdata()
                .map(|p| p.join(&self.name))
                .unwrap_or_else(|| PathBuf::from(format!(".{}", self.name)))
        }

        #[cfg(not(target_os = "windows"))]
        {
            xdg_dir("XDG_DATA_HOME", &[".local", "share"], &self.name)
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir().join("logs")
    }
}

/// Get the home directory, respecting HOME and USERPROFILE environment variables.
fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| std::env::var("USERPROFILE").ok().map(PathBuf::from))
}

#[cfg(not(target_os = "windows"))]
fn xdg_dir(env_var: &str, fallback: &[&str], name: &str) -> PathBuf {
    let fallback: PathBuf = fallback.iter().collect();
    std::env::var(env_var)
        .ok()
        .map(PathBuf::from)
        .or_else(|| home_dir().map(|h| h.join(&fallback)))
        .unwrap_or(fallback)
        .join(name)
}

#[cfg(target_os = "windows")]
fn windows_appdata() -> Option<PathBuf> {
    std::env::var("APPDATA").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirs_contain_name() {
        if let Some(paths) = ProjectPaths::new("herald") {
            assert!(paths.config_dir().to_string_lossy().contains("herald"));
            assert!(paths.data_dir().to_string_lossy().contains("herald"));
            assert!(paths.log_dir().ends_with("logs"));
        }
    }

    #[test]
    #[cfg(not(target_os = "windows"))]
    fn test_xdg_fallback_segments() {
        let dir = xdg_dir("HERALD_TEST_UNSET_XDG_VAR", &[".local", "share"], "test");
        assert!(dir.ends_with(PathBuf::from(".local").join("share").join("test")));
    }
}
