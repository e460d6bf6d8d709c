use crate::{
    util_time,
    DataPoint,
    Error,
    Result,
};
use serde::Serialize;

pub const PROTO_VERSION: u32 = 1;

/// One or more data points as they are posted to the ingestion endpoint.
///
/// ```json
/// {"timestamp": 1325462400, "proto_version": 1, "data": [{"name": "foo", "value": 1, "collected_at": 1325462400}]}
/// ```
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct BatchMessage {
    /// Message creation time in epoch seconds.
    timestamp: i64,
    proto_version: u32,
    data: Vec<DataPoint>,
}

impl BatchMessage {
    pub fn new(data_points: Vec<DataPoint>) -> Result<Self> {
        if data_points.is_empty() {
            return Err(Error::EmptyBatch);
        }
        Ok(Self::with_points(data_points))
    }

    pub fn single(data_point: DataPoint) -> Self {
        Self::with_points(vec![data_point])
    }

    fn with_points(data: Vec<DataPoint>) -> Self {
        Self {
            timestamp: util_time::now().timestamp(),
            proto_version: PROTO_VERSION,
            data,
        }
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn data_points(&self) -> &[DataPoint] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
