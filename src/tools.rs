use std::env;
use std::path::Path;
use std::process::Command;

use log::debug;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("required tool not found in PATH: {0}")]
    NotFound(String),
    #[error("{name} failed ({status}): {stderr}")]
    Failed {
        name: String,
        status: String,
        stderr: String,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

const REQUIRED_TOOLS: [&str; 4] = ["apktool", "zipalign", "apksigner", "keytool"];

/// Verifies every external collaborator is reachable before anything in
/// the package is mutated.
pub fn check_available() -> Result<(), ToolError> {
    for tool in REQUIRED_TOOLS {
        if !tool_on_path(tool) {
            return Err(ToolError::NotFound(tool.to_string()));
        }
    }
    Ok(())
}

fn tool_on_path(name: &str) -> bool {
    let Some(path) = env::var_os("PATH") else {
        return false;
    };
    env::split_paths(&path).any(|dir| candidates(name).iter().any(|c| dir.join(c).is_file()))
}

#[cfg(windows)]
fn candidates(name: &str) -> Vec<String> {
    vec![
        format!("{name}.exe"),
        format!("{name}.bat"),
        format!("{name}.cmd"),
        name.to_string(),
    ]
}

#[cfg(not(windows))]
fn candidates(name: &str) -> Vec<String> {
    vec![name.to_string()]
}

/// `-r` keeps resources (and with them the manifest) in their binary form;
/// the manifest edit happens on the raw document, not decoded XML.
pub fn unpack(apk: &Path, out_dir: &Path) -> Result<(), ToolError> {
    run(Command::new("apktool")
        .arg("d")
        .arg(apk)
        .arg("-o")
        .arg(out_dir)
        .arg("-f")
        .arg("-r"))
}

pub fn repack(tree: &Path, out_apk: &Path) -> Result<(), ToolError> {
    run(Command::new("apktool")
        .arg("b")
        .arg(tree)
        .arg("-o")
        .arg(out_apk)
        .arg("-f"))
}

pub fn align(input: &Path, output: &Path) -> Result<(), ToolError> {
    run(Command::new("zipalign")
        .arg("-p")
        .arg("-f")
        .arg("4")
        .arg(input)
        .arg(output))
}

pub fn sign(apk: &Path, keystore: &Path, keystore_pass: &str) -> Result<(), ToolError> {
    run(Command::new("apksigner")
        .arg("sign")
        .arg("--ks")
        .arg(keystore)
        .arg("--ks-pass")
        .arg(format!("pass:{keystore_pass}"))
        .arg(apk))
}

pub fn generate_debug_keystore(
    keystore: &Path,
    alias: &str,
    password: &str,
) -> Result<(), ToolError> {
    if let Some(parent) = keystore.parent() {
        std::fs::create_dir_all(parent)?;
    }
    run(Command::new("keytool")
        .arg("-genkey")
        .arg("-v")
        .arg("-keystore")
        .arg(keystore)
        .arg("-alias")
        .arg(alias)
        .arg("-keyalg")
        .arg("RSA")
        .arg("-keysize")
        .arg("2048")
        .arg("-validity")
        .arg("10000")
        .arg("-storepass")
        .arg(password)
        .arg("-keypass")
        .arg(password)
        .arg("-dname")
        .arg("CN=Android Debug,O=Android,C=US"))
}

fn run(command: &mut Command) -> Result<(), ToolError> {
    let name = command.get_program().to_string_lossy().into_owned();
    debug!("running {name} {:?}", command.get_args());
    let output = command.output()?;
    if !output.status.success() {
        return Err(ToolError::Failed {
            name,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(())
}
