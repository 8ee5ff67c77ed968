use std::env;

fn main() {
    // Version string shown by the CLI and sent as user agent
    let version = env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".to_string());
    println!("cargo:rustc-env=BUTTERFLY_VERSION={}", version);

    println!("cargo:rerun-if-changed=src/");
    println!("cargo:rerun-if-changed=data/");
    println!("cargo:rerun-if-changed=Cargo.toml");
}
