fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Storage and encoder contracts are consumed as clients by the relay and
    // served by the in-process doubles in dtvault-core's test helpers, so both
    // sides are generated.
    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(
            &[
                "proto/dtvault/types.proto",
                "proto/dtvault/storage.proto",
                "proto/dtvault/encoder.proto",
            ],
            &["proto"],
        )?;

    println!("cargo:rerun-if-changed=proto/dtvault/types.proto");
    println!("cargo:rerun-if-changed=proto/dtvault/storage.proto");
    println!("cargo:rerun-if-changed=proto/dtvault/encoder.proto");

    Ok(())
}
