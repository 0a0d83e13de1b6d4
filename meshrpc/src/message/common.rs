use crate::{
    core::{
        id::RequestId,
        types::{
            Dictionary,
            Value,
        },
    },
    message::message::{
        CURSOR_START,
        EnvelopeFrame,
        Frame,
        PingFrame,
        PongFrame,
        RequestAction,
        RequestBody,
        ResponseAction,
        WsAction,
    },
};

pub fn request_frame(request_id: RequestId, body: RequestBody, response_expected: bool) -> Frame {
    Frame::Envelope(EnvelopeFrame {
        ws_action: WsAction::Request(RequestAction {
            request_id,
            request: body,
            response_expected,
        }),
    })
}

pub fn response_frame(request_id: RequestId, response: Value) -> Frame {
    Frame::Envelope(EnvelopeFrame {
        ws_action: WsAction::Response(ResponseAction {
            request_id,
            response,
        }),
    })
}

pub fn error_body(error: &anyhow::Error) -> Value {
    Value::Dictionary(Dictionary::from_iter([(
        "error".to_owned(),
        Value::String(error.to_string()),
    )]))
}

pub fn cursor_start_body(request_id: RequestId) -> Value {
    Value::Dictionary(Dictionary::from_iter([(
        CURSOR_START.to_owned(),
        Value::String(request_id.to_string()),
    )]))
}

pub fn ping_frame() -> Frame {
    Frame::Ping(PingFrame::default())
}

pub fn pong_frame() -> Frame {
    Frame::Pong(PongFrame::default())
}

/// Extracts the error message from an `{"error": ...}` response body.
pub fn error_in_body(value: &Value) -> Option<&str> {
    match value.dictionary() {
        Some(dictionary) if dictionary.len() == 1 => {
            dictionary.get("error").and_then(Value::string)
        }
        _ => None,
    }
}

/// Extracts the cursor id from a `{"CURSOR_START": ...}` response body.
pub fn cursor_start_in_body(value: &Value) -> Option<&str> {
    value
        .dictionary()
        .and_then(|dictionary| dictionary.get(CURSOR_START))
        .and_then(Value::string)
}
