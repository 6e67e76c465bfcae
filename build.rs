use std::env;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

/// Number of distinct virtual trampolines baked into the library.
/// One byte of identity space; identity 0 is reserved for "no override".
const TRAMPOLINES: u32 = 255;

fn main() {
    let mut table = String::new();

    writeln!(table, "// @generated by build.rs").unwrap();
    writeln!(table, "/// Number of distinct virtual trampolines").unwrap();
    writeln!(table, "pub const TRAMPOLINE_COUNT: usize = {};", TRAMPOLINES).unwrap();
    writeln!(
        table,
        "pub(crate) static TRAMPOLINES: [crate::host::abi::ClassCallVirtual; TRAMPOLINE_COUNT] = ["
    )
    .unwrap();
    for id in 1..=TRAMPOLINES {
        writeln!(table, "    virtual_trampoline::<{}>,", id).unwrap();
    }
    writeln!(table, "];").unwrap();

    let out_path = PathBuf::from(env::var("OUT_DIR").unwrap());
    fs::write(out_path.join("trampolines.rs"), table).unwrap();

    println!("cargo:rerun-if-changed=build.rs");
}
