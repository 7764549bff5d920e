fn main() {
    let crate_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap();
    let out = format!("{}/include/mw_wallet.h", crate_dir);
    std::fs::create_dir_all(format!("{}/include", crate_dir)).unwrap();
    println!("cargo:rerun-if-changed=src/lib.rs");
    cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_language(cbindgen::Language::C)
        .with_include_guard("MW_WALLET_H")
        .with_no_includes()
        .with_sys_include("stdbool.h")
        .with_sys_include("stdint.h")
        .generate()
        .expect("cbindgen")
        .write_to_file(out);
}
