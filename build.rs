fn main() {
    let protoc = protoc_bin_vendored::protoc_bin_path().expect("vendored protoc not found");
    std::env::set_var("PROTOC", protoc);

    tonic_build::configure()
        .build_server(false)
        .build_client(true)
        .compile_protos(
            &["proto/state_service.proto", "proto/token_service.proto"],
            &["proto"],
        )
        .expect("failed to compile daemon protos");
}
