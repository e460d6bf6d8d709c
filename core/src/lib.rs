//! Wire protocol for custom metrics: data points and the batch message that carries them.

mod data_point;
mod error;
mod message;
pub mod util_time;

pub use data_point::{
    validate_name,
    DataPoint,
    MetricValue,
};
pub use error::{
    Error,
    Result,
};
pub use message::{
    BatchMessage,
    PROTO_VERSION,
};
