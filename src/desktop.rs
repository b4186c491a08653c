//! Things the catalog asks of the desktop: a folder picker, a save dialog
//! for exports, and "open with the default player".

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;

use rfd::FileDialog;
use tracing::{info, warn};

use crate::error::{CatalogError, Result};

/// Asks the user for a dataset directory. `None` means cancelled.
pub trait DirectoryPicker {
    fn pick_directory(&self) -> Option<PathBuf>;
}

/// Asks the user where to write an export. `None` means cancelled.
pub trait ExportTarget {
    fn pick_export_file(&self, suggested_name: &str) -> Option<PathBuf>;
}

/// Opens a file with whatever the system uses for it
pub trait MediaLauncher {
    fn open(&self, path: &Path) -> Result<()>;
}

/// Native dialogs through `rfd`
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeDialogs;

impl DirectoryPicker for NativeDialogs {
    fn pick_directory(&self) -> Option<PathBuf> {
        FileDialog::new()
            .set_title("Select Folder with Videos")
            .pick_folder()
    }
}

impl ExportTarget for NativeDialogs {
    fn pick_export_file(&self, suggested_name: &str) -> Option<PathBuf> {
        FileDialog::new()
            .set_title("Export Selected Paths")
            .set_file_name(suggested_name)
            .add_filter("Text", &["txt"])
            .save_file()
    }
}

/// Launches the platform opener without waiting for it
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl SystemLauncher {
    fn command(path: &Path) -> Command {
        #[cfg(target_os = "windows")]
        {
            let mut command = Command::new("cmd");
            command.args(["/C", "start", ""]).arg(path);
            command
        }
        #[cfg(target_os = "macos")]
        {
            let mut command = Command::new("open");
            command.arg(path);
            command
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            let mut command = Command::new("xdg-open");
            command.arg(path);
            command
        }
    }
}

impl MediaLauncher for SystemLauncher {
    fn open(&self, path: &Path) -> Result<()> {
        let launch_err = |source: io::Error| CatalogError::Launch {
            path: path.to_path_buf(),
            source: Arc::new(source),
        };

        if !path.exists() {
            return Err(launch_err(io::Error::new(io::ErrorKind::NotFound, "file not found")));
        }

        let mut child = Self::command(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(launch_err)?;

        // Reap the opener so it does not linger as a zombie
        let shown = path.display().to_string();
        let reaper = thread::Builder::new().name("launcher".into()).spawn(move || {
            match child.wait() {
                Ok(status) if !status.success() => warn!("⚠️  Opener for {} exited with {}", shown, status),
                Err(e) => warn!("⚠️  Opener for {} failed: {}", shown, e),
                Ok(_) => {}
            }
        });
        if let Err(e) = reaper {
            warn!("⚠️  Could not watch opener process: {}", e);
        }

        info!("▶️  Opened {}", path.display());
        Ok(())
    }
}
