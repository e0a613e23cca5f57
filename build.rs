use std::env;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if env::var_os("PROTOC").is_none() {
        env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    let proto_files = ["./proto/device_monitor.proto"];
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR not set"));

    tonic_build::configure()
        .out_dir(out_dir)
        .compile_protos(&proto_files, &["./proto"])?;

    for proto_file in &proto_files {
        println!("cargo:rerun-if-changed={proto_file}");
    }

    Ok(())
}
