//! Generate `include/nethandler.h` for C hosts.

use std::env;
use std::path::PathBuf;

fn main() {
    let crate_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string()));
    let out = crate_dir.join("include").join("nethandler.h");
    println!("cargo:rerun-if-changed=src/lib.rs");
    println!("cargo:rerun-if-changed=src/types.rs");

    // The callback table and request are only reachable through function
    // pointers, so name them explicitly.
    let result = cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_language(cbindgen::Language::C)
        .with_include_guard("NETHANDLER_H")
        .include_item("NhHostEngine")
        .include_item("NhRequest")
        .include_item("NhHeader")
        .generate();

    match result {
        Ok(bindings) => {
            if let Some(dir) = out.parent() {
                if let Err(e) = std::fs::create_dir_all(dir) {
                    println!("cargo:warning=cannot create {}: {e}", dir.display());
                    return;
                }
            }
            bindings.write_to_file(&out);
        }
        Err(e) => println!("cargo:warning=header generation skipped: {e}"),
    }
}
