//! The constraint solver: picks compatible read-size / write-size /
//! blocksize / MTU / payload sizes from a data format, an optional
//! compression solution, and `netparms`.

use crate::netparms::NetParms;

/// Minimal description of the data format being transferred: enough for
/// the solver to reason about sizes. The specific bit layout of each
/// format (VDIF, Mark4, VLBA, Mark5B, ...) is an external, out-of-scope
/// concern (§1); the solver only needs the numbers below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataFormat {
    pub ntrack: u32,
    pub framesize: u32,
    pub payloadsize: u32,
    pub trackbitrate: u64,
}

impl DataFormat {
    /// A format-less transfer (e.g. `net2file`): the solver falls back to
    /// defaults rather than failing.
    pub fn none() -> Self {
        DataFormat::default()
    }

    pub fn is_unset(&self) -> bool {
        self.ntrack == 0 || self.trackbitrate == 0
    }
}

/// How much a compression step changes the size of each unit of data, if
/// one is installed in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionSolution {
    /// Bytes read from the producer for each `compressed_size` bytes
    /// produced downstream.
    pub uncompressed_size: u32,
    pub compressed_size: u32,
}

impl CompressionSolution {
    pub fn none() -> Option<Self> {
        None
    }
}

/// The solver's output: `read_size`, `write_size`, `blocksize`,
/// `framesize`, `payloadsize`, `n_mtu`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sizes {
    pub read_size: u32,
    pub write_size: u32,
    pub blocksize: u32,
    pub framesize: u32,
    pub payloadsize: u32,
    pub n_mtu: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverError {
    /// No integer solution exists for the given inputs; per §9, ambiguous
    /// legacy combinations must fail here rather than guess.
    NoSolution,
    MtuTooSmallForProtocol,
}

impl std::fmt::Display for SolverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolverError::NoSolution => write!(f, "no integer solution exists for these inputs"),
            SolverError::MtuTooSmallForProtocol => {
                write!(f, "mtu too small to carry any payload for this protocol")
            }
        }
    }
}

impl std::error::Error for SolverError {}

const IP_HEADER_BYTES: u32 = 20;
const UDP_HEADER_BYTES: u32 = 8;
const TCP_HEADER_BYTES: u32 = 20;

/// Per-datagram payload after IP/transport/protocol-internal headers are
/// subtracted from the MTU, truncated down to a multiple of 8.
fn udp_payload_per_datagram(np: &NetParms) -> Result<u32, SolverError> {
    let mtu = np.mtu();
    let overhead = IP_HEADER_BYTES + UDP_HEADER_BYTES + np.protocol().internal_header_bytes();
    if mtu <= overhead {
        return Err(SolverError::MtuTooSmallForProtocol);
    }
    Ok((mtu - overhead) / 8 * 8)
}

/// Computes [`Sizes`] for a data format, optional compression solution and
/// netparms, per §4.4's rules.
pub fn solve(
    format: &DataFormat,
    compression: Option<CompressionSolution>,
    np: &NetParms,
) -> Result<Sizes, SolverError> {
    let write_size: u32;
    let n_mtu;

    if np.protocol().is_udp_family() {
        let payload = udp_payload_per_datagram(np)?;
        write_size = payload;
        n_mtu = 1;
    } else {
        // Stream protocols (tcp/rtcp/unix) and UDT don't fragment at the
        // MTU boundary themselves; write_size tracks the format's natural
        // unit, falling back to a sensible default when no format is set.
        write_size = if format.is_unset() {
            np.blocksize().min(crate::netparms::DEFAULT_BLOCKSIZE)
        } else if format.payloadsize != 0 {
            format.payloadsize
        } else {
            format.framesize
        };
        n_mtu = crate::netparms::DEFAULT_N_MTU;
    }

    if write_size == 0 {
        return Err(SolverError::NoSolution);
    }

    let read_size = match compression {
        Some(c) => {
            if c.compressed_size == 0 || write_size % c.compressed_size != 0 {
                return Err(SolverError::NoSolution);
            }
            let ratio = write_size / c.compressed_size;
            c.uncompressed_size
                .checked_mul(ratio)
                .ok_or(SolverError::NoSolution)?
        }
        None => write_size,
    };

    if read_size == 0 {
        return Err(SolverError::NoSolution);
    }

    let requested = np.blocksize();
    let unit_lcm = lcm(read_size, write_size);
    let nblock_unit = unit_lcm.max(1);
    let blocksize = ceil_multiple(requested.max(nblock_unit), nblock_unit);

    if blocksize % read_size != 0 || blocksize % write_size != 0 {
        return Err(SolverError::NoSolution);
    }

    let framesize = if format.framesize != 0 {
        format.framesize
    } else {
        write_size
    };
    let payloadsize = if format.payloadsize != 0 {
        format.payloadsize
    } else {
        write_size
    };

    Ok(Sizes {
        read_size,
        write_size,
        blocksize,
        framesize,
        payloadsize,
        n_mtu,
    })
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn lcm(a: u32, b: u32) -> u32 {
    a / gcd(a, b) * b
}

fn ceil_multiple(value: u32, unit: u32) -> u32 {
    if unit == 0 {
        return value;
    }
    value.div_ceil(unit) * unit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netparms::NetParms;

    #[test]
    fn udps_write_size_is_mtu_minus_overhead_rounded_to_8() {
        let mut np = NetParms::default();
        np.set_protocol("udps").unwrap();
        np.set_mtu(1500).unwrap();
        let sizes = solve(&DataFormat::none(), None, &np).unwrap();
        // 1500 - 20(ip) - 8(udp) - 8(seqnr) = 1464, already a multiple of 8
        assert_eq!(sizes.write_size, 1464);
        assert_eq!(sizes.n_mtu, 1);
    }

    #[test]
    fn blocksize_is_a_multiple_of_both_read_and_write_size() {
        let mut np = NetParms::default();
        np.set_protocol("udps").unwrap();
        np.set_mtu(1500).unwrap();
        np.set_blocksize(100_000);
        let sizes = solve(&DataFormat::none(), None, &np).unwrap();
        assert_eq!(sizes.blocksize % sizes.write_size, 0);
        assert_eq!(sizes.blocksize % sizes.read_size, 0);
    }

    #[test]
    fn compression_makes_read_size_exceed_write_size() {
        let mut np = NetParms::default();
        np.set_protocol("udps").unwrap();
        np.set_mtu(1500).unwrap();
        let compression = CompressionSolution {
            uncompressed_size: 2,
            compressed_size: 1,
        };
        let sizes = solve(&DataFormat::none(), Some(compression), &np).unwrap();
        assert!(sizes.read_size > sizes.write_size);
        assert_eq!(sizes.read_size, sizes.write_size * 2);
    }

    #[test]
    fn mtu_too_small_for_protocol_overhead_fails() {
        // 32 clears NetParms::MIN_MTU (28) but still doesn't leave room for
        // udps's ip(20) + udp(8) + seqnr(8) = 36 bytes of overhead.
        let mut np = NetParms::default();
        np.set_protocol("udps").unwrap();
        np.set_mtu(32).unwrap();
        let err = solve(&DataFormat::none(), None, &np).unwrap_err();
        assert_eq!(err, SolverError::MtuTooSmallForProtocol);
    }

    #[test]
    fn write_size_never_exceeds_mtu_minus_overhead() {
        for mtu in [576u32, 1500, 4000, 9000] {
            let mut np = NetParms::default();
            np.set_protocol("udps").unwrap();
            np.set_mtu(mtu).unwrap();
            let sizes = solve(&DataFormat::none(), None, &np).unwrap();
            let overhead = IP_HEADER_BYTES + UDP_HEADER_BYTES + 8;
            assert!(sizes.write_size <= mtu - overhead);
        }
    }

    #[test]
    fn tcp_with_a_data_format_uses_its_payloadsize() {
        let np = NetParms::default();
        let format = DataFormat {
            ntrack: 32,
            framesize: 10016,
            payloadsize: 10000,
            trackbitrate: 32_000_000,
        };
        let sizes = solve(&format, None, &np).unwrap();
        assert_eq!(sizes.write_size, 10000);
        assert_eq!(sizes.framesize, 10016);
    }
}
