//! Generated gRPC bindings for the gateway surface.

tonic::include_proto!("lumen.v1");
