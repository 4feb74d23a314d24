use anyhow::Result;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub config_file: PathBuf,
    pub known_hosts_file: PathBuf,
}

impl AppPaths {
    pub fn new() -> Result<Self> {
        let proj = ProjectDirs::from("org", "sshpilot", "sshpilot")
            .ok_or_else(|| anyhow::anyhow!("project dirs unavailable"))?;
        Ok(Self::from_dirs(proj.config_dir(), proj.data_dir()))
    }

    pub fn from_dirs(config_dir: impl AsRef<Path>, data_dir: impl AsRef<Path>) -> Self {
        let config_dir = config_dir.as_ref().to_path_buf();
        let data_dir = data_dir.as_ref().to_path_buf();
        Self {
            config_file: config_dir.join("config.toml"),
            log_dir: data_dir.join("logs"),
            known_hosts_file: data_dir.join("known_hosts"),
            config_dir,
            data_dir,
        }
    }

    pub fn project_config_path(base: impl AsRef<Path>) -> PathBuf {
        base.as_ref().join(".sshpilot.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_live_under_their_base_dirs() {
        let paths = AppPaths::from_dirs("/cfg", "/data");
        assert_eq!(paths.config_file, PathBuf::from("/cfg/config.toml"));
        assert_eq!(paths.log_dir, PathBuf::from("/data/logs"));
        assert_eq!(paths.known_hosts_file, PathBuf::from("/data/known_hosts"));
        assert_eq!(
            AppPaths::project_config_path("/work"),
            PathBuf::from("/work/.sshpilot.toml")
        );
    }
}
