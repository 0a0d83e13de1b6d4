use anyhow::{
    Error,
    Result,
};

use crate::{
    message::message::Frame,
    serializer::serializer::Serializer,
};

/// A serializer implemented for MessagePack, the binary wire format.
#[derive(Debug, Default)]
pub struct MessagePackSerializer {}

impl Serializer for MessagePackSerializer {
    fn serialize(&self, frame: &Frame) -> Result<Vec<u8>> {
        // Frames are keyed maps on the wire, so field names must survive
        // serialization for the receiving side to distinguish them.
        rmp_serde::to_vec_named(frame).map_err(Error::new)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Frame> {
        Ok(rmp_serde::from_slice(bytes).map_err(Error::new)?)
    }
}

#[cfg(test)]
mod message_pack_test {
    use crate::{
        core::{
            id::RequestId,
            types::{
                Dictionary,
                Value,
            },
        },
        message::{
            common::{
                ping_frame,
                request_frame,
                response_frame,
            },
            message::{
                RequestBody,
                RequestPayload,
            },
        },
        serializer::{
            message_pack::MessagePackSerializer,
            serializer::Serializer,
        },
    };

    #[test]
    fn envelope_round_trips_through_binary_format() {
        let serializer = MessagePackSerializer::default();
        let frame = request_frame(
            RequestId::generate(),
            RequestBody::Payload(
                RequestPayload::with_args(
                    "divide",
                    Vec::from_iter([Value::Integer(2), Value::Integer(3)]),
                    Dictionary::default(),
                )
                .into_dictionary(),
            ),
            true,
        );
        let bytes = serializer.serialize(&frame).unwrap();
        pretty_assertions::assert_eq!(serializer.deserialize(&bytes).unwrap(), frame);
    }

    #[test]
    fn response_and_liveness_frames_round_trip() {
        let serializer = MessagePackSerializer::default();
        for frame in [
            response_frame(RequestId::generate(), Value::Float(2.0 / 3.0)),
            ping_frame(),
        ] {
            let bytes = serializer.serialize(&frame).unwrap();
            pretty_assertions::assert_eq!(serializer.deserialize(&bytes).unwrap(), frame);
        }
    }
}
