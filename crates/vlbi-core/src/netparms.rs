//! Network parameters: protocol, MTU, blocksize, buffering, ACK period and
//! the host/port/suffix endpoint list.

use std::fmt;

pub const DEFAULT_IPD_NS: i64 = 0;
pub const DEFAULT_PORT: u16 = 2630;
pub const DEFAULT_MTU: u32 = 1500;
pub const DEFAULT_N_MTU: u32 = 1;
pub const DEFAULT_NBLOCK: u32 = 8;
pub const DEFAULT_BLOCKSIZE: u32 = 128 * 1024;
pub const DEFAULT_SOCKBUF: i32 = 4 * 1024 * 1024;
pub const DEFAULT_ACK_PERIOD: u32 = 100;
/// Bare minimum to carry an IP+UDP header at all; the constraint solver
/// is what catches an MTU that's too small for a *particular* protocol's
/// own framing (e.g. `udps`'s extra sequence-number header) on top of this.
const MIN_MTU: u32 = 28;

/// One of the wire protocols jive5ab's `net_protocol` understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetProtocol {
    /// Plain TCP/IPv4.
    Tcp,
    /// TCP with client/server roles reversed.
    Rtcp,
    /// Plain UDP/IPv4, no sequence numbers.
    Udp,
    /// UDP with an 8-byte big-endian sequence number prepended to each
    /// datagram ("smart"/sequencenumber protocol).
    Udps,
    /// Legacy alias for raw, unsequenced UDP.
    Pudp,
    /// UDT over UDP.
    Udt,
    /// UNIX domain stream socket.
    Unix,
}

impl NetProtocol {
    pub fn parse(s: &str) -> Result<NetProtocol, NetParmsError> {
        use NetProtocol::*;
        match s.to_ascii_lowercase().as_str() {
            "" => Ok(Tcp),
            "tcp" => Ok(Tcp),
            "rtcp" => Ok(Rtcp),
            "udp" => Ok(Udp),
            "udps" => Ok(Udps),
            "pudp" => Ok(Pudp),
            "udt" => Ok(Udt),
            "unix" => Ok(Unix),
            other => Err(NetParmsError::UnknownProtocol(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NetProtocol::Tcp => "tcp",
            NetProtocol::Rtcp => "rtcp",
            NetProtocol::Udp => "udp",
            NetProtocol::Udps => "udps",
            NetProtocol::Pudp => "pudp",
            NetProtocol::Udt => "udt",
            NetProtocol::Unix => "unix",
        }
    }

    pub fn is_udp_family(&self) -> bool {
        matches!(self, NetProtocol::Udp | NetProtocol::Udps | NetProtocol::Pudp)
    }

    /// Per-datagram protocol-internal header jive5ab's own framing adds on
    /// top of the UDP header (8 bytes for the `udps` sequence number).
    pub fn internal_header_bytes(&self) -> u32 {
        match self {
            NetProtocol::Udps => 8,
            _ => 0,
        }
    }
}

impl fmt::Display for NetProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One network endpoint entry: host, port, and an optional recording-chunk
/// name suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPortSuffix {
    pub host: String,
    pub port: u16,
    pub suffix: Option<String>,
}

impl HostPortSuffix {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        HostPortSuffix {
            host: host.into(),
            port,
            suffix: None,
        }
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }
}

impl fmt::Display for HostPortSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.is_empty() {
            write!(f, "{}", self.port)?;
        } else {
            write!(f, "{}@{}", self.host, self.port)?;
        }
        if let Some(s) = &self.suffix {
            write!(f, "={s}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetParmsError {
    MtuTooSmall(u32),
    PortOutOfRange,
    UnknownProtocol(String),
}

impl fmt::Display for NetParmsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetParmsError::MtuTooSmall(m) => write!(f, "mtu {m} is below the minimum {MIN_MTU}"),
            NetParmsError::PortOutOfRange => write!(f, "port out of range"),
            NetParmsError::UnknownProtocol(p) => write!(f, "unknown protocol '{p}'"),
        }
    }
}

impl std::error::Error for NetParmsError {}

/// `{rcvbufsize, sndbufsize, protocol, mtu, blocksize, nblock,
/// interpacketdelay_ns, theoretical_ipd_ns, ackPeriod, host/port/suffix
/// list}`.
#[derive(Debug, Clone)]
pub struct NetParms {
    pub rcvbufsize: i32,
    pub sndbufsize: i32,
    protocol: NetProtocol,
    mtu: u32,
    blocksize: u32,
    pub nblock: u32,
    pub interpacketdelay_ns: i64,
    pub theoretical_ipd_ns: i64,
    pub ack_period: u32,
    endpoints: Vec<HostPortSuffix>,
    port: u16,
}

impl Default for NetParms {
    fn default() -> Self {
        NetParms {
            rcvbufsize: DEFAULT_SOCKBUF,
            sndbufsize: DEFAULT_SOCKBUF,
            protocol: NetProtocol::Tcp,
            mtu: DEFAULT_MTU,
            blocksize: DEFAULT_BLOCKSIZE,
            nblock: DEFAULT_NBLOCK,
            interpacketdelay_ns: DEFAULT_IPD_NS,
            theoretical_ipd_ns: DEFAULT_IPD_NS,
            ack_period: DEFAULT_ACK_PERIOD,
            endpoints: vec![HostPortSuffix::new("", DEFAULT_PORT)],
            port: DEFAULT_PORT,
        }
    }
}

impl NetParms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn protocol(&self) -> NetProtocol {
        self.protocol
    }

    /// Empty string resets to the default protocol.
    pub fn set_protocol(&mut self, p: &str) -> Result<(), NetParmsError> {
        self.protocol = NetProtocol::parse(p)?;
        Ok(())
    }

    pub fn mtu(&self) -> u32 {
        self.mtu
    }

    /// `0` resets to [`DEFAULT_MTU`].
    pub fn set_mtu(&mut self, m: u32) -> Result<(), NetParmsError> {
        let m = if m == 0 { DEFAULT_MTU } else { m };
        if m < MIN_MTU {
            return Err(NetParmsError::MtuTooSmall(m));
        }
        self.mtu = m;
        Ok(())
    }

    pub fn blocksize(&self) -> u32 {
        self.blocksize
    }

    /// `0` resets to [`DEFAULT_BLOCKSIZE`].
    pub fn set_blocksize(&mut self, bs: u32) {
        self.blocksize = if bs == 0 { DEFAULT_BLOCKSIZE } else { bs };
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `0` resets to [`DEFAULT_PORT`].
    pub fn set_port(&mut self, p: u16) {
        self.port = if p == 0 { DEFAULT_PORT } else { p };
        if let Some(first) = self.endpoints.first_mut() {
            first.port = self.port;
        } else {
            self.endpoints.push(HostPortSuffix::new("", self.port));
        }
    }

    pub fn endpoints(&self) -> &[HostPortSuffix] {
        &self.endpoints
    }

    pub fn set_endpoints(&mut self, endpoints: Vec<HostPortSuffix>) {
        if let Some(first) = endpoints.first() {
            self.port = first.port;
        }
        self.endpoints = endpoints;
    }

    /// Cyclically advances the endpoint list (used by the multifd reader
    /// when it pops the next endpoint to bind).
    pub fn rotate(&mut self) {
        if !self.endpoints.is_empty() {
            self.endpoints.rotate_left(1);
        }
    }

    /// `0` resets to [`DEFAULT_ACK_PERIOD`].
    pub fn set_ack_period(&mut self, period: u32) {
        self.ack_period = if period == 0 {
            DEFAULT_ACK_PERIOD
        } else {
            period
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let np = NetParms::default();
        assert_eq!(np.protocol(), NetProtocol::Tcp);
        assert_eq!(np.mtu(), DEFAULT_MTU);
        assert_eq!(np.blocksize(), DEFAULT_BLOCKSIZE);
        assert_eq!(np.port(), DEFAULT_PORT);
        assert_eq!(np.ack_period, DEFAULT_ACK_PERIOD);
    }

    #[test]
    fn zero_resets_to_default() {
        let mut np = NetParms::default();
        np.set_mtu(9000).unwrap();
        np.set_mtu(0).unwrap();
        assert_eq!(np.mtu(), DEFAULT_MTU);

        np.set_port(3000);
        np.set_port(0);
        assert_eq!(np.port(), DEFAULT_PORT);
    }

    #[test]
    fn mtu_below_minimum_is_rejected() {
        let mut np = NetParms::default();
        assert!(np.set_mtu(16).is_err());
    }

    #[test]
    fn rotate_cycles_the_endpoint_list() {
        let mut np = NetParms::default();
        np.set_endpoints(vec![
            HostPortSuffix::new("", 2630),
            HostPortSuffix::new("host2", 2631).with_suffix("ds2"),
            HostPortSuffix::new("", 2632).with_suffix("ds3"),
        ]);
        let first_before = np.endpoints()[0].clone();
        np.rotate();
        assert_eq!(np.endpoints()[np.endpoints().len() - 1], first_before);
    }

    #[test]
    fn endpoint_display_matches_net_port_query_format() {
        let hps = HostPortSuffix::new("host2", 2631).with_suffix("ds2");
        assert_eq!(hps.to_string(), "host2@2631=ds2");
        let plain = HostPortSuffix::new("", 2632).with_suffix("ds3");
        assert_eq!(plain.to_string(), "2632=ds3");
    }
}
