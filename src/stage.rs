use std::fs;
use std::io;
use std::path::Path;

use log::debug;

use crate::config::GadgetConfig;

/// Name the injected dependency resolves to through the linker's ordinary
/// library search, so both must match `SoEditor::add_needed`'s argument.
pub const GADGET_SONAME: &str = "libfrida-gadget.so";
/// Same-stem companion file the gadget auto-discovers at load time.
pub const GADGET_CONFIG_NAME: &str = "libfrida-gadget.config.so";

/// Copies the gadget into `arch_dir` under its fixed internal name and
/// writes the companion configuration next to it. Both writes overwrite
/// whatever a previous run left behind.
pub fn stage_gadget(arch_dir: &Path, gadget: &Path, config: &GadgetConfig) -> io::Result<()> {
    let gadget_dest = arch_dir.join(GADGET_SONAME);
    fs::copy(gadget, &gadget_dest)?;
    debug!("staged gadget at {}", gadget_dest.display());

    let config_dest = arch_dir.join(GADGET_CONFIG_NAME);
    let blob = serde_json::to_vec_pretty(config).map_err(io::Error::from)?;
    fs::write(&config_dest, blob)?;
    debug!("wrote gadget config at {}", config_dest.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_gadget_and_config() {
        let tmp = tempfile::tempdir().unwrap();
        let gadget = tmp.path().join("gadget.so");
        fs::write(&gadget, b"opaque payload").unwrap();
        let arch = tmp.path().join("arm64-v8a");
        fs::create_dir(&arch).unwrap();

        let config = GadgetConfig::listen("0.0.0.0", 27042);
        stage_gadget(&arch, &gadget, &config).unwrap();

        assert_eq!(fs::read(arch.join(GADGET_SONAME)).unwrap(), b"opaque payload");

        let written: GadgetConfig =
            serde_json::from_slice(&fs::read(arch.join(GADGET_CONFIG_NAME)).unwrap()).unwrap();
        assert_eq!(written, config);
        assert_eq!(written.interaction.kind, "listen");
        assert_eq!(written.interaction.on_load, "resume");
    }

    #[test]
    fn restaging_overwrites_previous_artifacts() {
        let tmp = tempfile::tempdir().unwrap();
        let arch = tmp.path().join("armeabi-v7a");
        fs::create_dir(&arch).unwrap();
        fs::write(arch.join(GADGET_SONAME), b"stale").unwrap();
        fs::write(arch.join(GADGET_CONFIG_NAME), b"stale").unwrap();

        let gadget = tmp.path().join("gadget.so");
        fs::write(&gadget, b"fresh").unwrap();
        stage_gadget(&arch, &gadget, &GadgetConfig::listen("127.0.0.1", 1234)).unwrap();

        assert_eq!(fs::read(arch.join(GADGET_SONAME)).unwrap(), b"fresh");
        let written: GadgetConfig =
            serde_json::from_slice(&fs::read(arch.join(GADGET_CONFIG_NAME)).unwrap()).unwrap();
        assert_eq!(written.interaction.address, "127.0.0.1");
        assert_eq!(written.interaction.port, 1234);
    }
}
