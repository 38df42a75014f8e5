use chrono::Utc;
use std::env;
use std::fs::{metadata, File};
use std::io::Write;
use std::path::Path;

fn deliver_api_version(cargo_toml: &Path) -> String {
    std::fs::read_to_string(cargo_toml)
        .ok()
        .and_then(|content| content.parse::<toml::Table>().ok())
        .and_then(|table| {
            table
                .get("package")?
                .get("metadata")?
                .get("deliver_api_version")?
                .as_integer()
        })
        .map(|version| version.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn git_hash() -> String {
    std::process::Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|hash| hash.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=Cargo.toml");
    println!("cargo:rerun-if-changed=.git/HEAD");

    let out_dir = env::var_os("OUT_DIR").unwrap();
    let dest_path = Path::new(&out_dir).join("version.rs");
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    let cargo_toml_path = Path::new(&manifest_dir).join("Cargo.toml");

    // regenerate only when Cargo.toml changed since the last run
    if let (Ok(generated), Ok(manifest)) = (metadata(&dest_path), metadata(&cargo_toml_path)) {
        if let (Ok(generated), Ok(manifest)) = (generated.modified(), manifest.modified()) {
            if manifest <= generated {
                return;
            }
        }
    }

    let build_time = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
    let mut f = File::create(&dest_path).unwrap();
    writeln!(
        &mut f,
        r###"pub const DELIVER_API_VERSION: &str = "{}";
pub const BUILD_TIME: &str = "{}";
pub const GIT_HASH: &str = "{}";"###,
        deliver_api_version(&cargo_toml_path),
        build_time,
        git_hash()
    )
    .unwrap();
}
