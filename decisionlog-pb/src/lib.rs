/// gRPC clients and also protobuf objects for gRPC.
pub mod clients;

/// gRPC servers, used by collectors (and by tests standing in for one).
pub mod servers;

/// protobuf objects for concrete types
pub mod objects;
