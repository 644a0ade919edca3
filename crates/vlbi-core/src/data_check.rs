//! `data_check_type`/`scan_check_type`: the result of inspecting a block of
//! recorded data to recover its format and position.
//!
//! The actual per-format bit-banging (VDIF/Mark4/VLBA/Mark5B header
//! parsing) is out of scope (§1) — an external collaborator. This module
//! specifies the result shape and the trait boundary a concrete prober
//! plugs into.

use crate::block::Block;
use crate::time::HighResTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormatKind {
    Vdif,
    Mark4,
    Vlba,
    Mark5B,
    Unknown,
}

/// Per-frame VDIF metadata, present only when `format == Vdif`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VdifFrameInfo {
    pub thread_id: u16,
    pub frame_length: u32,
    pub edv: u8,
}

/// Result of inspecting one data block: inferred format, geometry, and
/// decoded time.
#[derive(Debug, Clone, PartialEq)]
pub struct DataCheckResult {
    pub format: DataFormatKind,
    pub ntrack: u32,
    pub trackbitrate: u64,
    pub time: Option<HighResTime>,
    pub byte_offset: u64,
    pub vdif: Option<VdifFrameInfo>,
    pub frame_number: u32,
    pub is_partial: bool,
}

impl DataCheckResult {
    pub fn unknown() -> Self {
        DataCheckResult {
            format: DataFormatKind::Unknown,
            ntrack: 0,
            trackbitrate: 0,
            time: None,
            byte_offset: 0,
            vdif: None,
            frame_number: 0,
            is_partial: false,
        }
    }
}

/// Result of a `scan_check`: a `DataCheckResult` plus the span (in bytes)
/// the scan covered to find it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanCheckResult {
    pub check: DataCheckResult,
    pub scanned_bytes: u64,
}

/// The opaque format prober the core consumes from — the out-of-scope
/// per-format detection logic lives behind this trait so the core never
/// needs to know a Mark4 header from a VDIF one.
pub trait FormatProbe: Send + Sync {
    fn data_check(&self, data: &Block, byte_offset: u64) -> DataCheckResult;

    fn scan_check(&self, data: &Block, byte_offset: u64) -> ScanCheckResult {
        ScanCheckResult {
            check: self.data_check(data, byte_offset),
            scanned_bytes: data.len() as u64,
        }
    }
}

/// A `FormatProbe` that never recognizes anything; useful as a default
/// when no real prober has been wired in (e.g. in tests).
pub struct NullProbe;

impl FormatProbe for NullProbe {
    fn data_check(&self, _data: &Block, byte_offset: u64) -> DataCheckResult {
        DataCheckResult {
            byte_offset,
            ..DataCheckResult::unknown()
        }
    }
}
