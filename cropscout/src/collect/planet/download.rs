use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::info;

use crate::config::DownloadSettings;
use crate::error::CropScoutError;

/// Asset download through the provider's command-line client.
///
/// The command line is
/// `<program> data download --item-type <t> --asset-type <a,b> --dest <dir> --string-in id <ids..>`.
pub struct AssetDownload {
    pub program: String,
    pub item_type: String,
    pub asset_types: Vec<String>,
    pub dest: PathBuf,
}

impl AssetDownload {
    pub fn new(settings: &DownloadSettings, dest: &Path) -> Self {
        AssetDownload {
            program: settings.program.clone(),
            item_type: settings.item_type.clone(),
            asset_types: settings.asset_types.clone(),
            dest: dest.to_path_buf(),
        }
    }

    /// Arguments passed to the program for `ids`
    pub fn args(&self, ids: &[String]) -> Vec<String> {
        let mut args = vec![
            "data".to_string(),
            "download".to_string(),
            "--item-type".to_string(),
            self.item_type.clone(),
            "--asset-type".to_string(),
            self.asset_types.join(","),
            "--dest".to_string(),
            self.dest.to_string_lossy().to_string(),
            "--string-in".to_string(),
            "id".to_string(),
        ];
        args.extend(ids.iter().cloned());
        args
    }

    /// Full command line, for logging and dry runs
    pub fn command_line(&self, ids: &[String]) -> String {
        std::iter::once(self.program.clone())
            .chain(self.args(ids))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run the download; nothing is spawned when `ids` is empty
    pub fn run(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            info!("no scenes to download");
            return Ok(());
        }

        std::fs::create_dir_all(&self.dest)
            .with_context(|| format!("Failed to create download directory: {:?}", self.dest))?;

        info!(command = %self.command_line(ids), "downloading assets");
        let status = Command::new(&self.program)
            .args(self.args(ids))
            .status()
            .with_context(|| {
                format!(
                    "Failed to execute {}. Make sure it is installed and in PATH",
                    self.program
                )
            })?;

        if !status.success() {
            return Err(CropScoutError::DownloadFailed {
                program: self.program.clone(),
                status: status.to_string(),
            }
            .into());
        }

        info!(scenes = ids.len(), dest = ?self.dest, "download complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn download(program: &str) -> AssetDownload {
        let settings = DownloadSettings {
            program: program.to_string(),
            ..DownloadSettings::default()
        };
        AssetDownload::new(&settings, Path::new("out/scenes"))
    }

    #[test]
    fn test_command_line() {
        let ids = vec!["20200402_074122_1035".to_string(), "20200410_073311_0f4e".to_string()];
        assert_eq!(
            download("planet").command_line(&ids),
            "planet data download --item-type PSScene \
             --asset-type ortho_analytic_4b,ortho_analytic_4b_xml --dest out/scenes \
             --string-in id 20200402_074122_1035 20200410_073311_0f4e"
        );
    }

    #[test]
    fn test_empty_ids_do_nothing() {
        download("definitely-not-a-real-program").run(&[]).unwrap();
    }

    #[test]
    fn test_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let mut dl = download("definitely-not-a-real-program");
        dl.dest = dir.path().join("scenes");
        assert!(dl.run(&["x".to_string()]).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_program() {
        let dir = tempfile::tempdir().unwrap();
        let mut dl = download("false");
        dl.dest = dir.path().join("scenes");
        let err = dl.run(&["x".to_string()]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CropScoutError>(),
            Some(CropScoutError::DownloadFailed { .. })
        ));
    }
}
