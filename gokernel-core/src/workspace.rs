//! Scratch workspace (C1): a per-kernel temp directory holding the
//! generated module manifest, primary source, compiled binary and socket
//! files. All path helpers are pure; nothing here touches disk except
//! [`Workspace::new`] and [`Workspace::shutdown`].

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::errors::Result;

const MODULE_NAME: &str = "gokernel_cell";

/// Which generated-source filename a cell execution is targeting.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CellMode {
    Normal,
    Test,
    Wasm,
}

pub struct Workspace {
    dir: TempDir,
    preserve_on_error: bool,
}

impl Workspace {
    /// Create a unique per-kernel directory and initialize its module
    /// manifest once.
    pub fn new(preserve_on_error: bool) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("gokernel-").tempdir()?;
        let workspace = Self { dir, preserve_on_error };
        workspace.init_module_manifest()?;
        Ok(workspace)
    }

    fn init_module_manifest(&self) -> Result<()> {
        let manifest = format!("module {MODULE_NAME}\n\ngo 1.22\n");
        std::fs::write(self.root().join("go.mod"), manifest)?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn binary_path(&self) -> PathBuf {
        self.root().join("gokernel_cell.bin")
    }

    pub fn source_path(&self, mode: CellMode) -> PathBuf {
        match mode {
            CellMode::Normal => self.root().join("main.go"),
            CellMode::Test => self.root().join("main_test.go"),
            CellMode::Wasm => self.root().join("main_wasm.go"),
        }
    }

    /// Used when the current cell cannot be parsed but memorized
    /// declarations still need to be visible to the language server: a
    /// second copy of the last known-good source.
    pub fn alternative_path(&self) -> PathBuf {
        self.root().join(".main.alt.go")
    }

    pub fn go_mod_path(&self) -> PathBuf {
        self.root().join("go.mod")
    }

    pub fn go_sum_path(&self) -> PathBuf {
        self.root().join("go.sum")
    }

    pub fn go_work_path(&self) -> PathBuf {
        self.root().join("go.work")
    }

    pub fn fifo_path(&self, execution_id: u64) -> PathBuf {
        self.root().join(format!("rich-{execution_id}.pipe"))
    }

    /// A second FIFO, kernel-to-child, carrying widget messages for
    /// addresses the program has subscribed to (§4.8).
    pub fn widget_fifo_path(&self, execution_id: u64) -> PathBuf {
        self.root().join(format!("widget-{execution_id}.pipe"))
    }

    pub fn lsp_socket_path(&self) -> PathBuf {
        self.root().join("gopls.sock")
    }

    pub fn module_name(&self) -> &'static str {
        MODULE_NAME
    }

    /// Remove the workspace directory, unless the preserve-on-error flag is
    /// set and `had_error` is true (kept around for post-mortem inspection).
    pub fn shutdown(self, had_error: bool) -> Result<()> {
        if had_error && self.preserve_on_error {
            let path = self.dir.into_path();
            tracing::warn!(workspace = %path.display(), "preserving scratch workspace after error");
            return Ok(());
        }
        drop(self.dir);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_go_mod_on_construction() {
        let ws = Workspace::new(false).unwrap();
        assert!(ws.go_mod_path().exists());
        assert!(std::fs::read_to_string(ws.go_mod_path()).unwrap().contains("module gokernel_cell"));
    }

    #[test]
    fn source_path_varies_by_mode() {
        let ws = Workspace::new(false).unwrap();
        assert_ne!(ws.source_path(CellMode::Normal), ws.source_path(CellMode::Test));
        assert_ne!(ws.source_path(CellMode::Test), ws.source_path(CellMode::Wasm));
    }

    #[test]
    fn shutdown_removes_directory_by_default() {
        let ws = Workspace::new(false).unwrap();
        let root = ws.root().to_path_buf();
        ws.shutdown(false).unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn widget_fifo_path_differs_from_rich_content_fifo() {
        let ws = Workspace::new(false).unwrap();
        assert_ne!(ws.fifo_path(1), ws.widget_fifo_path(1));
    }

    #[test]
    fn shutdown_preserves_on_error_when_configured() {
        let ws = Workspace::new(true).unwrap();
        let root = ws.root().to_path_buf();
        ws.shutdown(true).unwrap();
        assert!(root.exists());
        let _ = std::fs::remove_dir_all(root);
    }
}
