use std::path::Path;
use std::process::{Child, Command};

use crate::Error;

pub const DEFAULT_VIEWER: &str = "napari --plugin napari-ome-zarr";

/// Environment variable overriding [`DEFAULT_VIEWER`].
pub const VIEWER_ENV: &str = "CZI2ZARR_VIEWER";

/// Split a viewer command line on whitespace and append `path`.
pub fn viewer_command(command: &str, path: &Path) -> crate::Result<Command> {
    let mut parts = command.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| Error::general("empty viewer command"))?;
    let mut cmd = Command::new(program);
    cmd.args(parts).arg(path);
    Ok(cmd)
}

/// Spawn the viewer on `path` without waiting for it to exit.
pub fn launch_viewer(command: &str, path: impl AsRef<Path>) -> crate::Result<Child> {
    let path = path.as_ref();
    let mut cmd = viewer_command(command, path)?;
    log::info!("opening {} with `{command}`", path.display());
    cmd.spawn().map_err(|source| {
        log::warn!("could not launch viewer `{command}`: {source}");
        Error::Viewer {
            command: command.to_string(),
            source,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_command_line() {
        let cmd = viewer_command(DEFAULT_VIEWER, Path::new("/tmp/a.ome.zarr")).unwrap();
        assert_eq!(cmd.get_program(), "napari");
        let args: Vec<_> = cmd.get_args().collect();
        assert_eq!(args, ["--plugin", "napari-ome-zarr", "/tmp/a.ome.zarr"]);
    }

    #[test]
    fn missing_program_is_a_viewer_error() {
        let err = launch_viewer("czi2zarr-no-such-viewer", "/tmp/x").unwrap_err();
        assert!(matches!(err, Error::Viewer { .. }));
        assert!(viewer_command("  ", Path::new("x")).is_err());
    }
}
