fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::configure()
        .build_server(false)
        .type_attribute(
            "build.bazel.remote.execution.v2.Digest",
            "#[derive(Eq, Hash, PartialOrd, Ord)]",
        )
        .compile(
            &[
                "proto/build/bazel/remote/execution/v2/remote_execution.proto",
                "proto/google/bytestream/bytestream.proto",
                "proto/google/longrunning/operations.proto",
            ],
            &["proto"],
        )?;
    println!("cargo:rerun-if-changed=proto");
    Ok(())
}
