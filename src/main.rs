use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use gadget_injector::config::{DuplicatePolicy, PatchConfig};
use gadget_injector::pipeline;

#[derive(Parser, Debug)]
#[command(author, version, about = "Patch an APK so it loads a Frida gadget at process start", long_about = None)]
struct Args {
    /// APK to patch
    #[arg(short, long)]
    apk: PathBuf,

    /// Gadget shared library to inject
    #[arg(short, long)]
    gadget: PathBuf,

    /// Directory for the unpacked package tree
    #[arg(long, default_value = "unpacked")]
    work_dir: PathBuf,

    /// Directory for the repacked artifacts
    #[arg(short, long, default_value = "repacked")]
    output: PathBuf,

    /// Keystore used for signing; generated when absent
    #[arg(long, default_value = "debug.keystore")]
    keystore: PathBuf,

    #[arg(long, default_value = "mykey")]
    keystore_alias: String,

    #[arg(long, default_value = "password")]
    keystore_pass: String,

    /// Address the gadget listens on for a controller
    #[arg(long, default_value = "0.0.0.0")]
    listen_address: String,

    #[arg(long, default_value_t = 27042)]
    listen_port: u16,

    /// What to do when a module already depends on the gadget
    #[arg(long, value_enum, default_value = "skip")]
    on_duplicate: DuplicatePolicy,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = PatchConfig {
        apk: args.apk,
        gadget: args.gadget,
        unpacked_dir: args.work_dir,
        output_dir: args.output,
        keystore: args.keystore,
        keystore_alias: args.keystore_alias,
        keystore_pass: args.keystore_pass,
        listen_address: args.listen_address,
        listen_port: args.listen_port,
        duplicate_policy: args.on_duplicate,
    };

    let outcome = pipeline::run(&config).context("patching failed")?;

    for arch in &outcome.summary.patched {
        if arch.injected {
            println!("{}: patched {}", arch.abi, arch.module.display());
        } else {
            println!("{}: already patched", arch.abi);
        }
    }
    for abi in &outcome.summary.skipped {
        println!("{abi}: skipped, no native modules");
    }
    println!("output: {}", outcome.artifact.display());
    Ok(())
}
