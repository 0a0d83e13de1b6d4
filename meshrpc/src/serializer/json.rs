use anyhow::{
    Error,
    Result,
};

use crate::{
    message::message::Frame,
    serializer::serializer::Serializer,
};

/// A serializer implemented for JavaScript Object Notation.
#[derive(Debug, Default)]
pub struct JsonSerializer {}

impl Serializer for JsonSerializer {
    fn serialize(&self, frame: &Frame) -> Result<Vec<u8>> {
        serde_json::to_vec(frame).map_err(Error::new)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Frame> {
        Ok(serde_json::from_slice(bytes).map_err(Error::new)?)
    }
}
