//! Generate `include/fetch_ffi.h` from the `extern "C"` surface.

use std::env;
use std::path::PathBuf;

fn main() {
    let crate_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string()));
    let include = crate_dir.join("include");
    if let Err(err) = std::fs::create_dir_all(&include) {
        println!("cargo:warning=cannot create {}: {err}", include.display());
        return;
    }
    let header = include.join("fetch_ffi.h");

    println!("cargo:rerun-if-changed=src/lib.rs");
    println!("cargo:rerun-if-changed=src/types.rs");

    match cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_language(cbindgen::Language::C)
        .with_include_guard("FETCH_FFI_H")
        .generate()
    {
        Ok(bindings) => {
            bindings.write_to_file(header);
        }
        // Best effort: the library builds without a header.
        Err(err) => println!("cargo:warning=cbindgen failed: {err}"),
    }
}
