//! `--install`: writes a Jupyter kernelspec into the platform kernels
//! directory (§6's "installation surface"), so `jupyter notebook`/`jupyter
//! lab` discover this binary as a kernel without any manual JSON editing.

use std::path::PathBuf;

use serde::Serialize;

use crate::errors::{Error, Result};

const KERNEL_NAME: &str = "gokernel";
const DISPLAY_NAME: &str = "Go (gokernel)";

#[derive(Serialize)]
struct KernelSpec {
    argv: Vec<String>,
    display_name: &'static str,
    language: &'static str,
    env: std::collections::HashMap<String, String>,
}

/// Resolve `<data dir>/jupyter/kernels/gokernel`, the directory a kernel's
/// `kernel.json` lives in.
fn kernels_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| Error::Connection("could not resolve a platform data directory".to_string()))?;
    Ok(data_dir.join("jupyter").join("kernels").join(KERNEL_NAME))
}

/// Write the kernelspec and report the path it landed at, for `--install`'s
/// confirmation message.
pub fn install() -> Result<PathBuf> {
    let dir = kernels_dir()?;
    std::fs::create_dir_all(&dir)?;

    let exe = std::env::current_exe()?;
    let spec = KernelSpec {
        argv: vec![exe.display().to_string(), "-f".to_string(), "{connection_file}".to_string()],
        display_name: DISPLAY_NAME,
        language: "go",
        env: std::collections::HashMap::new(),
    };

    let path = dir.join("kernel.json");
    let body = serde_json::to_string_pretty(&spec)?;
    std::fs::write(&path, body)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_spec_serializes_connection_file_placeholder() {
        let spec = KernelSpec {
            argv: vec!["gokernel".to_string(), "-f".to_string(), "{connection_file}".to_string()],
            display_name: DISPLAY_NAME,
            language: "go",
            env: std::collections::HashMap::new(),
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["argv"][2], "{connection_file}");
        assert_eq!(value["language"], "go");
    }
}
