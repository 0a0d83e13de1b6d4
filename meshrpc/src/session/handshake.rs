use std::time::Duration;

use anyhow::{
    Error,
    Result,
};
use futures_util::{
    SinkExt,
    StreamExt,
};
use log::{
    debug,
    warn,
};
use tokio::time::timeout;
use uuid::Uuid;

use crate::{
    auth::token::SetupClaims,
    core::{
        error::TokenError,
        stream::FrameStream,
    },
    message::message::{
        Frame,
        SetupErrorFrame,
        SetupFrame,
        SetupOkFrame,
    },
    serializer::serializer::SerializerType,
};

/// How long either side waits for the other's half of the setup exchange.
const SETUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs the initiator's half of the setup handshake.
///
/// Sends the signed claim token, waits for the accepter's verdict, and
/// returns the stream rewrapped with the negotiated serializer, plus the
/// accepter's node id. The handshake itself always travels as JSON text.
pub async fn initiate(
    mut stream: FrameStream,
    claims: &SetupClaims,
    secret: &str,
) -> Result<(FrameStream, Uuid)> {
    let token = claims.into_token(secret)?;
    stream.send(Frame::Setup(SetupFrame { setup: token })).await?;
    let reply = timeout(SETUP_TIMEOUT, stream.next())
        .await
        .map_err(|_| Error::msg("timed out waiting for setup response"))?;
    match reply {
        Some(Ok(Frame::SetupOk(ok))) => {
            debug!("setup accepted by node {}", ok.server_id);
            Ok((stream.with_serializer(claims.serialization), ok.server_id))
        }
        Some(Ok(Frame::SetupError(err))) => {
            Err(Error::new(TokenError::BadSignature).context(err.error))
        }
        Some(Ok(frame)) => Err(Error::msg(format!(
            "expected setup response, received {} frame",
            frame.frame_name()
        ))),
        Some(Err(err)) => Err(err),
        None => Err(Error::msg("connection closed during setup")),
    }
}

/// Runs the accepter's half of the setup handshake.
///
/// Verifies the initiator's claim token against the shared secret. On
/// failure an error frame is sent and the connection is closed; on success
/// the ok frame carries this node's id, and the returned stream uses the
/// serializer the initiator chose.
pub async fn accept(
    mut stream: FrameStream,
    secret: &str,
    node_id: Uuid,
) -> Result<(FrameStream, SetupClaims)> {
    let frame = timeout(SETUP_TIMEOUT, stream.next())
        .await
        .map_err(|_| Error::msg("timed out waiting for setup frame"))?;
    let token = match frame {
        Some(Ok(Frame::Setup(setup))) => setup.setup,
        Some(Ok(frame)) => {
            return Err(Error::msg(format!(
                "expected setup frame, received {} frame",
                frame.frame_name()
            )));
        }
        Some(Err(err)) => return Err(err),
        None => return Err(Error::msg("connection closed during setup")),
    };
    let claims = match SetupClaims::from_token(secret, &token) {
        Ok(claims) => claims,
        Err(err) => {
            warn!("rejecting connection: {err:#}");
            stream
                .send(Frame::SetupError(SetupErrorFrame {
                    error: "unable to decode auth, server_secret may not match with server"
                        .to_owned(),
                }))
                .await
                .ok();
            stream.close().await.ok();
            return Err(err);
        }
    };
    stream
        .send(Frame::SetupOk(SetupOkFrame::new(node_id)))
        .await?;
    Ok((stream.with_serializer(claims.serialization), claims))
}

/// The serializer in effect before the setup exchange completes.
pub fn handshake_serializer() -> SerializerType {
    SerializerType::Json
}
