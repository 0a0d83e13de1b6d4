/// The role of a session, chosen by the connection initiator and echoed in
/// the setup claims.
///
/// A session holds exactly one role for its lifetime. The role governs which
/// procedures each side advertises to the other during catalog refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerRole {
    /// A plain client mirroring one namespace of a server.
    Proxy,
    /// A server connecting upward to a parent server.
    Server,
    /// The accepting side's view of a downstream [`PeerRole::Server`] peer.
    ServerProxy,
}

impl PeerRole {
    /// The role name used on the wire.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Proxy => "PROXY",
            Self::Server => "SERVER",
            Self::ServerProxy => "SERVER_PROXY",
        }
    }
}

impl TryFrom<&str> for PeerRole {
    type Error = &'static str;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "PROXY" => Ok(Self::Proxy),
            "SERVER" => Ok(Self::Server),
            "SERVER_PROXY" => Ok(Self::ServerProxy),
            _ => Err("unsupported peer role"),
        }
    }
}
