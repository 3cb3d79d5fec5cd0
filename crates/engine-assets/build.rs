// build.rs for engine-assets
//
// Handles the optional `bundled` feature: when active, copies the engine's
// static asset archive (pointed to by `PPTX2PDF_BUNDLE_ARCHIVE`) into Cargo's
// output directory and generates a tiny Rust source file that embeds the
// bytes with `include_bytes!`.
//
// The archive is unpacked into the static root on first use instead of being
// shipped next to the binary.

use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-env-changed=PPTX2PDF_BUNDLE_ARCHIVE");
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_BUNDLED");

    if std::env::var("CARGO_FEATURE_BUNDLED").is_err() {
        return;
    }

    // ── Locate the source archive ─────────────────────────────────────────
    let archive_src = match std::env::var("PPTX2PDF_BUNDLE_ARCHIVE") {
        Ok(p) if !p.is_empty() => PathBuf::from(p),
        _ => {
            panic!(
                "\n\
                 ┌─────────────────────────────────────────────────────────┐\n\
                 │  engine-assets: `bundled` feature activated but         │\n\
                 │  `PPTX2PDF_BUNDLE_ARCHIVE` is not set.                  │\n\
                 │                                                         │\n\
                 │  Set it to a gzip-compressed tar of the engine assets   │\n\
                 │  (index.html, the .wasm module and its JS glue):        │\n\
                 │                                                         │\n\
                 │  PPTX2PDF_BUNDLE_ARCHIVE=path/to/static.tar.gz          │\n\
                 └─────────────────────────────────────────────────────────┘\n"
            )
        }
    };

    if !archive_src.exists() {
        panic!(
            "engine-assets: PPTX2PDF_BUNDLE_ARCHIVE points to a file that does not exist: {}",
            archive_src.display()
        );
    }

    // ── Copy into OUT_DIR with a fixed name ───────────────────────────────
    let out_dir = PathBuf::from(std::env::var("OUT_DIR").expect("OUT_DIR not set"));
    let archive_dest = out_dir.join("bundled_static.tar.gz");

    std::fs::copy(&archive_src, &archive_dest).unwrap_or_else(|e| {
        panic!(
            "engine-assets: failed to copy {} → {}: {}",
            archive_src.display(),
            archive_dest.display(),
            e
        )
    });

    // `include_bytes!` needs a literal path at the expansion site, so the
    // invocation lives in a generated file pulled in with `include!()`.
    let bundled_rs = out_dir.join("bundled.rs");
    let code = r#"
/// The engine asset archive embedded at compile time.
pub static ARCHIVE_BYTES: &[u8] = include_bytes!("bundled_static.tar.gz");
"#;
    std::fs::write(&bundled_rs, code).unwrap_or_else(|e| {
        panic!(
            "engine-assets: failed to write {}: {}",
            bundled_rs.display(),
            e
        )
    });

    println!("cargo:rerun-if-changed={}", archive_src.display());
}
