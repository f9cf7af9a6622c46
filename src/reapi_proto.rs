//! Generated REAPI protobuf/gRPC bindings.
//!
//! `build.rs` compiles `proto/` (a trimmed, vendored copy of
//! github.com/bazelbuild/remote-apis) via `tonic_build`; this module just
//! nests the generated code under the same package path the wire format
//! uses, the way `protos.h` aliases `proto::` onto the generated C++
//! namespace in the source.

pub mod build {
    pub mod bazel {
        pub mod remote {
            pub mod execution {
                pub mod v2 {
                    tonic::include_proto!("build.bazel.remote.execution.v2");
                }
            }
        }
        pub mod semver {
            tonic::include_proto!("build.bazel.semver");
        }
    }
}

pub mod google {
    pub mod bytestream {
        tonic::include_proto!("google.bytestream");
    }
    pub mod longrunning {
        tonic::include_proto!("google.longrunning");
    }
    pub mod rpc {
        tonic::include_proto!("google.rpc");
    }
}
