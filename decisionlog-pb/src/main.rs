fn main() {
    // gRPC client for shipping batches to the collector
    build_client();

    // gRPC server for the collector side of the protocol
    build_server();

    // protobuf objects for the records being shipped
    build_objects();
}

fn build_client() {
    tonic_build::configure()
        .build_client(true)
        .build_server(false)
        .out_dir("src/clients")
        .compile_protos(&["proto/collector/v1/collector.proto"], &["proto"])
        .expect("failed to compile collector client protos");
}

fn build_server() {
    tonic_build::configure()
        .build_client(false)
        .build_server(true)
        .out_dir("src/servers")
        .compile_protos(&["proto/collector/v1/collector.proto"], &["proto"])
        .expect("failed to compile collector server protos");
}

fn build_objects() {
    let mut config = prost_build::Config::new();
    config
        .out_dir("src/objects")
        // Decision records are packed into google.protobuf.Any, which needs the type url
        .enable_type_names();
    config
        .compile_protos(&["proto/decision/v1/decision.proto"], &["proto"])
        .expect("failed to compile decision protos");
}
