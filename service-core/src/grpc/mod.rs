//! gRPC surface helpers: error mapping between `AppError` and `tonic::Status`.

pub mod error;

pub use error::{GrpcResult, IntoStatus};

pub use tonic::{Code, Status};
