fn main() {
    // ── macOS: embed Info.plist so CoreBluetooth grants Bluetooth access ──────
    //
    // CBCentralManager reports "unauthorized" and never scans unless the
    // running binary carries an Info.plist with NSBluetoothAlwaysUsageDescription.
    // A CLI has no bundle, so the plist goes into the `__TEXT,__info_plist`
    // section of the Mach-O image via the linker's `-sectcreate` flag.
    //
    // `CARGO_CFG_TARGET_OS` is the *target* OS, so cross builds work too.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("macos") {
        let dir = std::env::var("CARGO_MANIFEST_DIR")
            .expect("CARGO_MANIFEST_DIR must be set by Cargo");

        let plist = format!("{dir}/Info.plist");

        // One linker argument per line:
        //   ld … -sectcreate __TEXT __info_plist /path/to/Info.plist …
        for arg in ["-sectcreate", "__TEXT", "__info_plist", plist.as_str()] {
            println!("cargo:rustc-link-arg={arg}");
        }

        println!("cargo:rerun-if-changed=Info.plist");
    }
}
