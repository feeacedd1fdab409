use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use thiserror::Error;

use crate::config::{DuplicatePolicy, GadgetConfig, PatchConfig};
use crate::elf::{SoEditor, SoPatchError};
use crate::locate;
use crate::manifest::{ManifestEditor, ManifestError};
use crate::stage::{self, GADGET_SONAME};
use crate::tools::{self, ToolError};

#[derive(Debug, Error)]
pub enum PatchError {
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("required input not found: {0:?}")]
    MissingInput(PathBuf),
    #[error("failed to patch {abi} module {module:?}: {source}")]
    So {
        abi: String,
        module: PathBuf,
        source: SoPatchError,
    },
    #[error("{abi} module {module:?} already depends on {GADGET_SONAME}")]
    DuplicateDependency { abi: String, module: PathBuf },
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
pub struct PatchedArch {
    pub abi: String,
    pub module: PathBuf,
    /// false when the dependency was already present and policy said skip
    pub injected: bool,
}

#[derive(Debug, Default)]
pub struct PatchSummary {
    pub patched: Vec<PatchedArch>,
    pub skipped: Vec<String>,
    pub manifest_updated: bool,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub summary: PatchSummary,
    pub artifact: PathBuf,
}

/// Patches an unpacked package tree in place: every architecture directory
/// gets the dependency edit and the staged gadget, then the manifest is
/// checked once. Any fatal error stops the run; directories already
/// processed keep their changes, later ones stay untouched.
pub fn patch_tree(root: &Path, config: &PatchConfig) -> Result<PatchSummary, PatchError> {
    let mut summary = PatchSummary::default();
    let gadget_config = GadgetConfig::listen(&config.listen_address, config.listen_port);

    let lib_root = root.join("lib");
    if lib_root.is_dir() {
        for arch_dir in locate::arch_dirs(&lib_root)? {
            let abi = arch_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let Some(module) = locate::select_primary_module(&arch_dir)? else {
                info!("{abi}: no native modules, skipping");
                summary.skipped.push(abi);
                continue;
            };

            info!("{abi}: injecting into {}", module.display());
            let injected = inject_dependency(&module, &abi, config.duplicate_policy)?;
            stage::stage_gadget(&arch_dir, &config.gadget, &gadget_config)?;
            summary.patched.push(PatchedArch {
                abi,
                module,
                injected,
            });
        }
    } else {
        info!("package has no native libraries directory");
    }

    summary.manifest_updated = enforce_manifest(&root.join("AndroidManifest.xml"))?;
    Ok(summary)
}

fn inject_dependency(
    module: &Path,
    abi: &str,
    policy: DuplicatePolicy,
) -> Result<bool, PatchError> {
    // the whole image is read before any write so a parse failure can
    // never truncate the module
    let data = fs::read(module)?;
    let so_error = |source| PatchError::So {
        abi: abi.to_string(),
        module: module.to_path_buf(),
        source,
    };

    let mut editor = SoEditor::from_data(&data).map_err(so_error)?;
    if editor.needed().iter().any(|name| *name == GADGET_SONAME) {
        match policy {
            DuplicatePolicy::Reject => {
                return Err(PatchError::DuplicateDependency {
                    abi: abi.to_string(),
                    module: module.to_path_buf(),
                })
            }
            DuplicatePolicy::Skip => {
                warn!("{abi}: module already depends on {GADGET_SONAME}, leaving it as-is");
                return Ok(false);
            }
            DuplicatePolicy::Allow => {}
        }
    }

    editor.add_needed(GADGET_SONAME);
    let patched = editor.build().map_err(so_error)?;
    fs::write(module, patched)?;
    Ok(true)
}

fn enforce_manifest(manifest_path: &Path) -> Result<bool, PatchError> {
    if !manifest_path.is_file() {
        return Err(PatchError::MissingInput(manifest_path.to_path_buf()));
    }
    let data = fs::read(manifest_path)?;
    let mut editor = ManifestEditor::from_data(&data)?;
    let changed = editor.ensure_extract_native_libs()?;
    if changed {
        info!("setting extractNativeLibs=\"true\" in the manifest");
        fs::write(manifest_path, editor.to_data())?;
    }
    Ok(changed)
}

/// Full run: prerequisite checks, unpack, patch, repack, align, sign.
pub fn run(config: &PatchConfig) -> Result<RunOutcome, PatchError> {
    tools::check_available()?;
    for input in [&config.apk, &config.gadget] {
        if !input.is_file() {
            return Err(PatchError::MissingInput(input.clone()));
        }
    }

    if config.unpacked_dir.exists() {
        fs::remove_dir_all(&config.unpacked_dir)?;
    }
    fs::create_dir_all(&config.output_dir)?;

    info!("unpacking {:?}", config.apk);
    tools::unpack(&config.apk, &config.unpacked_dir)?;

    let summary = patch_tree(&config.unpacked_dir, config)?;

    let repacked = config.output_dir.join("repacked.apk");
    info!("repacking into {repacked:?}");
    tools::repack(&config.unpacked_dir, &repacked)?;

    let aligned = config.output_dir.join("repacked-aligned.apk");
    tools::align(&repacked, &aligned)?;

    if !config.keystore.is_file() {
        info!("generating debug keystore at {:?}", config.keystore);
        tools::generate_debug_keystore(
            &config.keystore,
            &config.keystore_alias,
            &config.keystore_pass,
        )?;
    }
    info!("signing {aligned:?}");
    tools::sign(&aligned, &config.keystore, &config.keystore_pass)?;

    Ok(RunOutcome {
        summary,
        artifact: aligned,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GadgetConfig;
    use crate::manifest::ManifestEditor;
    use crate::stage::GADGET_CONFIG_NAME;
    use crate::testutil::{build_so, minimal_manifest};
    use goblin::elf::Elf;

    fn test_config(root: &Path, policy: DuplicatePolicy) -> PatchConfig {
        PatchConfig {
            apk: root.join("unused.apk"),
            gadget: root.join("gadget.so"),
            unpacked_dir: root.join("unpacked"),
            output_dir: root.join("out"),
            keystore: root.join("debug.keystore"),
            keystore_alias: "mykey".to_string(),
            keystore_pass: "password".to_string(),
            listen_address: "0.0.0.0".to_string(),
            listen_port: 27042,
            duplicate_policy: policy,
        }
    }

    fn write_tree(root: &Path, arches: &[(&str, &str)]) {
        fs::write(root.join("AndroidManifest.xml"), minimal_manifest(None)).unwrap();
        fs::write(root.join("gadget.so"), b"opaque gadget payload").unwrap();
        for (abi, module) in arches {
            let dir = root.join("lib").join(abi);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(module), build_so(&["libc.so"])).unwrap();
        }
    }

    fn needed_count(path: &Path) -> usize {
        let data = fs::read(path).unwrap();
        let elf = Elf::parse(&data).unwrap();
        elf.libraries
            .iter()
            .filter(|&&l| l == GADGET_SONAME)
            .count()
    }

    #[test]
    fn patches_every_architecture_and_the_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write_tree(
            root,
            &[("arm64-v8a", "libmain.so"), ("armeabi-v7a", "libnative-lib.so")],
        );
        let config = test_config(root, DuplicatePolicy::Skip);

        let summary = patch_tree(root, &config).unwrap();
        assert_eq!(summary.patched.len(), 2);
        assert!(summary.skipped.is_empty());
        assert!(summary.manifest_updated);
        assert!(summary.patched.iter().all(|p| p.injected));

        for abi in ["arm64-v8a", "armeabi-v7a"] {
            let dir = root.join("lib").join(abi);
            assert!(dir.join(GADGET_SONAME).is_file());
            let staged: GadgetConfig =
                serde_json::from_slice(&fs::read(dir.join(GADGET_CONFIG_NAME)).unwrap()).unwrap();
            assert_eq!(staged, GadgetConfig::listen("0.0.0.0", 27042));
        }
        assert_eq!(needed_count(&summary.patched[0].module), 1);
        assert_eq!(needed_count(&summary.patched[1].module), 1);

        let manifest = fs::read(root.join("AndroidManifest.xml")).unwrap();
        let editor = ManifestEditor::from_data(&manifest).unwrap();
        assert_eq!(editor.extract_native_libs(), Some(true));
    }

    #[test]
    fn second_run_is_idempotent_under_skip_policy() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write_tree(root, &[("arm64-v8a", "libmain.so")]);
        let config = test_config(root, DuplicatePolicy::Skip);

        patch_tree(root, &config).unwrap();
        let second = patch_tree(root, &config).unwrap();

        assert!(!second.manifest_updated);
        assert_eq!(second.patched.len(), 1);
        assert!(!second.patched[0].injected);
        assert_eq!(needed_count(&second.patched[0].module), 1);
    }

    #[test]
    fn duplicate_policy_reject_aborts_the_rerun() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write_tree(root, &[("arm64-v8a", "libmain.so")]);

        patch_tree(root, &test_config(root, DuplicatePolicy::Skip)).unwrap();
        let err = patch_tree(root, &test_config(root, DuplicatePolicy::Reject)).unwrap_err();
        assert!(matches!(err, PatchError::DuplicateDependency { .. }));
    }

    #[test]
    fn duplicate_policy_allow_appends_again() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write_tree(root, &[("arm64-v8a", "libmain.so")]);

        patch_tree(root, &test_config(root, DuplicatePolicy::Skip)).unwrap();
        let second = patch_tree(root, &test_config(root, DuplicatePolicy::Allow)).unwrap();
        assert_eq!(needed_count(&second.patched[0].module), 2);
    }

    #[test]
    fn architecture_without_modules_is_skipped_not_failed() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write_tree(root, &[("arm64-v8a", "libmain.so")]);
        fs::create_dir_all(root.join("lib/x86")).unwrap();

        let summary = patch_tree(root, &test_config(root, DuplicatePolicy::Skip)).unwrap();
        assert_eq!(summary.skipped, vec!["x86".to_string()]);
        assert!(summary.manifest_updated);
        // nothing was written into the empty directory
        assert_eq!(fs::read_dir(root.join("lib/x86")).unwrap().count(), 0);
    }

    #[test]
    fn corrupt_module_aborts_and_leaves_earlier_arch_patched() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        // armeabi-v7a sorts before x86, so the valid module goes first
        write_tree(root, &[("armeabi-v7a", "libmain.so")]);
        let corrupt_dir = root.join("lib/x86");
        fs::create_dir_all(&corrupt_dir).unwrap();
        fs::write(corrupt_dir.join("libmain.so"), b"not an elf at all").unwrap();
        let manifest_before = fs::read(root.join("AndroidManifest.xml")).unwrap();

        let err = patch_tree(root, &test_config(root, DuplicatePolicy::Skip)).unwrap_err();
        match err {
            PatchError::So { abi, .. } => assert_eq!(abi, "x86"),
            other => panic!("unexpected error: {other:?}"),
        }

        // the earlier architecture keeps its changes
        assert_eq!(needed_count(&root.join("lib/armeabi-v7a/libmain.so")), 1);
        // the corrupt module and the manifest are untouched
        assert_eq!(
            fs::read(corrupt_dir.join("libmain.so")).unwrap(),
            b"not an elf at all"
        );
        assert_eq!(
            fs::read(root.join("AndroidManifest.xml")).unwrap(),
            manifest_before
        );
    }

    #[test]
    fn tree_without_native_libraries_still_fixes_the_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::write(root.join("AndroidManifest.xml"), minimal_manifest(Some(false))).unwrap();
        fs::write(root.join("gadget.so"), b"payload").unwrap();

        let summary = patch_tree(root, &test_config(root, DuplicatePolicy::Skip)).unwrap();
        assert!(summary.patched.is_empty());
        assert!(summary.manifest_updated);
    }
}
