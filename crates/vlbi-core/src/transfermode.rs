//! The `transfer_type` state machine and its submode bitset.
//!
//! `TransferMode` is the runtime's one piece of truth about "what is
//! currently happening"; every gating predicate the command dispatcher
//! relies on (`fromio`, `toio`, `fromdisk`, `todisk`, `fromnet`, `tonet`,
//! `streamstorbusy`, `diskunavail`) partitions this enum.

use std::fmt;

/// ~40 symbolic values, one per distinct chain pattern, plus `NoTransfer`.
/// `record` is an alias for `In2Disk`, `play` for `Disk2Out` in the
/// original command vocabulary; both map to the same variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferMode {
    NoTransfer,
    Disk2Net,
    Disk2Out,
    Disk2File,
    In2Net,
    In2Disk,
    In2Fork,
    In2File,
    Net2Out,
    Net2Disk,
    Net2Fork,
    Net2File,
    Net2Check,
    Net2Sfxc,
    Net2SfxcFork,
    Fill2Net,
    Fill2File,
    Fill2Out,
    Spill2Net,
    Spid2Net,
    Spin2Net,
    Spin2File,
    Splet2Net,
    Splet2File,
    Spill2File,
    Spid2File,
    Spif2File,
    Spif2Net,
    File2Check,
    File2Mem,
    File2Disk,
    File2Net,
    In2Mem,
    In2MemFork,
    Mem2Net,
    Mem2File,
    Mem2Sfxc,
    Mem2Time,
    Net2Mem,
    Condition,
}

impl TransferMode {
    /// Case-insensitive parse; unrecognized input returns `NoTransfer`,
    /// mirroring `string2transfermode`.
    pub fn parse(s: &str) -> TransferMode {
        use TransferMode::*;
        match s.to_ascii_lowercase().as_str() {
            "disk2net" => Disk2Net,
            "disk2out" | "play" => Disk2Out,
            "disk2file" => Disk2File,
            "in2net" => In2Net,
            "in2disk" | "record" => In2Disk,
            "in2fork" => In2Fork,
            "in2file" => In2File,
            "net2out" => Net2Out,
            "net2disk" => Net2Disk,
            "net2fork" => Net2Fork,
            "net2file" => Net2File,
            "net2check" => Net2Check,
            "net2sfxc" => Net2Sfxc,
            "net2sfxcfork" => Net2SfxcFork,
            "fill2net" => Fill2Net,
            "fill2file" => Fill2File,
            "fill2out" => Fill2Out,
            "spill2net" => Spill2Net,
            "spid2net" => Spid2Net,
            "spin2net" => Spin2Net,
            "spin2file" => Spin2File,
            "splet2net" => Splet2Net,
            "splet2file" => Splet2File,
            "spill2file" => Spill2File,
            "spid2file" => Spid2File,
            "spif2file" => Spif2File,
            "spif2net" => Spif2Net,
            "file2check" => File2Check,
            "file2mem" => File2Mem,
            "file2disk" => File2Disk,
            "file2net" => File2Net,
            "in2mem" => In2Mem,
            "in2memfork" => In2MemFork,
            "mem2net" => Mem2Net,
            "mem2file" => Mem2File,
            "mem2sfxc" => Mem2Sfxc,
            "mem2time" => Mem2Time,
            "net2mem" => Net2Mem,
            "condition" => Condition,
            _ => NoTransfer,
        }
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use TransferMode::*;
        let s = match self {
            NoTransfer => "no_transfer",
            Disk2Net => "disk2net",
            Disk2Out => "disk2out",
            Disk2File => "disk2file",
            In2Net => "in2net",
            In2Disk => "in2disk",
            In2Fork => "in2fork",
            In2File => "in2file",
            Net2Out => "net2out",
            Net2Disk => "net2disk",
            Net2Fork => "net2fork",
            Net2File => "net2file",
            Net2Check => "net2check",
            Net2Sfxc => "net2sfxc",
            Net2SfxcFork => "net2sfxcfork",
            Fill2Net => "fill2net",
            Fill2File => "fill2file",
            Fill2Out => "fill2out",
            Spill2Net => "spill2net",
            Spid2Net => "spid2net",
            Spin2Net => "spin2net",
            Spin2File => "spin2file",
            Splet2Net => "splet2net",
            Splet2File => "splet2file",
            Spill2File => "spill2file",
            Spid2File => "spid2file",
            Spif2File => "spif2file",
            Spif2Net => "spif2net",
            File2Check => "file2check",
            File2Mem => "file2mem",
            File2Disk => "file2disk",
            File2Net => "file2net",
            In2Mem => "in2mem",
            In2MemFork => "in2memfork",
            Mem2Net => "mem2net",
            Mem2File => "mem2file",
            Mem2Sfxc => "mem2sfxc",
            Mem2Time => "mem2time",
            Net2Mem => "net2mem",
            Condition => "condition",
        };
        f.write_str(s)
    }
}

/// Source is "io" (in2*): the real-time hardware input board.
pub fn fromio(tt: TransferMode) -> bool {
    use TransferMode::*;
    matches!(tt, In2Net | In2Disk | In2Fork | In2File | In2Mem | In2MemFork)
}

/// Destination is "io" (*2out): the real-time hardware output board.
pub fn toio(tt: TransferMode) -> bool {
    use TransferMode::*;
    matches!(tt, Disk2Out | Fill2Out)
}

/// Source is the StreamStor disk pack.
pub fn fromdisk(tt: TransferMode) -> bool {
    use TransferMode::*;
    matches!(
        tt,
        Disk2Net | Disk2Out | Disk2File | Spid2Net | Spid2File
    )
}

/// Destination is the StreamStor disk pack.
pub fn todisk(tt: TransferMode) -> bool {
    use TransferMode::*;
    matches!(tt, In2Disk | Net2Disk | File2Disk)
}

/// Source is a network reader.
pub fn fromnet(tt: TransferMode) -> bool {
    use TransferMode::*;
    matches!(
        tt,
        Net2Out
            | Net2Disk
            | Net2Fork
            | Net2File
            | Net2Check
            | Net2Sfxc
            | Net2SfxcFork
            | Net2Mem
            | Splet2Net
            | Splet2File
    )
}

/// Destination is a network writer.
pub fn tonet(tt: TransferMode) -> bool {
    use TransferMode::*;
    matches!(
        tt,
        Disk2Net
            | In2Net
            | In2Fork
            | Fill2Net
            | Spill2Net
            | Spid2Net
            | Spin2Net
            | Splet2Net
            | Spif2Net
            | File2Net
            | Mem2Net
    )
}

/// Source is the pattern-filler (no real hardware input).
pub fn fromfill(tt: TransferMode) -> bool {
    use TransferMode::*;
    matches!(
        tt,
        Fill2Net | Fill2File | Fill2Out | Spill2Net | Spill2File
    )
}

/// This transfer keeps the StreamStor device busy end to end (no other
/// transfer, nor most queries that touch the device, may start).
pub fn streamstorbusy(tt: TransferMode) -> bool {
    fromdisk(tt) || todisk(tt) || matches!(tt, Condition)
}

/// The disk pack is unavailable for a fresh record/play while this
/// transfer is active (superset of `streamstorbusy`: conditioning and
/// disk-to-disk business keep it busy too).
pub fn diskunavail(tt: TransferMode) -> bool {
    streamstorbusy(tt)
}

/// One of the four `submode_flag` bits from the original `transfer_submode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubmodeFlag {
    Pause,
    Run,
    Wait,
    Connected,
}

/// A small bitset over [`SubmodeFlag`]; mirrors `transfer_submode`'s
/// map-backed flag set (only the four known flags can ever be represented).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferSubmode(u8);

impl SubmodeFlag {
    fn bit(self) -> u8 {
        match self {
            SubmodeFlag::Pause => 0b0001,
            SubmodeFlag::Run => 0b0010,
            SubmodeFlag::Wait => 0b0100,
            SubmodeFlag::Connected => 0b1000,
        }
    }
}

impl TransferSubmode {
    pub fn new() -> Self {
        TransferSubmode(0)
    }

    pub fn set(mut self, f: SubmodeFlag) -> Self {
        self.0 |= f.bit();
        self
    }

    pub fn clr(mut self, f: SubmodeFlag) -> Self {
        self.0 &= !f.bit();
        self
    }

    pub fn clr_all(mut self) -> Self {
        self.0 = 0;
        self
    }

    pub fn is_set(&self, f: SubmodeFlag) -> bool {
        self.0 & f.bit() != 0
    }
}

impl fmt::Display for TransferSubmode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<")?;
        for flag in [
            SubmodeFlag::Pause,
            SubmodeFlag::Run,
            SubmodeFlag::Wait,
            SubmodeFlag::Connected,
        ] {
            if self.is_set(flag) {
                let name = match flag {
                    SubmodeFlag::Pause => "PAUSE",
                    SubmodeFlag::Run => "RUN",
                    SubmodeFlag::Wait => "WAIT",
                    SubmodeFlag::Connected => "CONNECTED",
                };
                write!(f, "{name},")?;
            }
        }
        write!(f, ">")
    }
}
