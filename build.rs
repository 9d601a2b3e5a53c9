//! Compile the gRPC contract into server and client stubs.
//!
//! `protox` parses the `.proto` in-process, so builds do not depend on a
//! system `protoc` binary.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    const PROTO: &str = "proto/pdf2images/v1/pdf2images.proto";

    println!("cargo:rerun-if-changed={PROTO}");

    let descriptors = protox::compile([PROTO], ["proto"])?;
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_fds(descriptors)?;

    Ok(())
}
