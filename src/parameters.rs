use std::fmt;
use std::str::FromStr;

use crate::error::RocError;
use crate::pci::CardId;

/// Default DMA page size: 8 KiB.
pub const DEFAULT_DMA_PAGE_SIZE: usize = 8 * 1024;

/// Pattern emitted by the on-card data generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorPattern {
    Constant,
    Incremental,
    Alternating,
    Flying0,
    Flying1,
    Random,
}

impl FromStr for GeneratorPattern {
    type Err = RocError;

    fn from_str(s: &str) -> Result<Self, RocError> {
        match s {
            "CONSTANT" => Ok(Self::Constant),
            "INCREMENTAL" => Ok(Self::Incremental),
            "ALTERNATING" => Ok(Self::Alternating),
            "FLYING0" => Ok(Self::Flying0),
            "FLYING1" => Ok(Self::Flying1),
            "RANDOM" => Ok(Self::Random),
            _ => Err(RocError::Parameter("unrecognized generator pattern")),
        }
    }
}

/// Routing of generated data back through the link stages for self-test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopbackMode {
    None,
    Internal,
    Siu,
    Diu,
    Rorc,
}

impl FromStr for LoopbackMode {
    type Err = RocError;

    fn from_str(s: &str) -> Result<Self, RocError> {
        match s {
            "NONE" => Ok(Self::None),
            "INTERNAL" => Ok(Self::Internal),
            "SIU" => Ok(Self::Siu),
            "DIU" => Ok(Self::Diu),
            "RORC" => Ok(Self::Rorc),
            _ => Err(RocError::Parameter("unrecognized loopback mode")),
        }
    }
}

impl fmt::Display for LoopbackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "NONE"),
            Self::Internal => write!(f, "INTERNAL"),
            Self::Siu => write!(f, "SIU"),
            Self::Diu => write!(f, "DIU"),
            Self::Rorc => write!(f, "RORC"),
        }
    }
}

/// How deep a channel reset reaches. Higher levels imply the lower ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResetLevel {
    Nothing,
    Internal,
    InternalDiuSiu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadoutMode {
    Continuous,
    Triggered,
}

/// Where the client's DMA buffer comes from.
pub enum BufferParameters {
    /// Caller-owned memory; must stay mapped for the channel's lifetime.
    Memory { ptr: *mut u8, size: usize },
    /// A file to create/map as the buffer (hugetlbfs or /dev/shm path).
    File { path: String, size: usize },
    /// No buffer; only valid for channels that never touch host memory.
    Null,
}

/// Construction-time channel parameters.
///
/// `card_id` and `channel_number` are required; everything else has the
/// defaults listed in the field docs.
pub struct Parameters {
    pub card_id: CardId,
    pub channel_number: u32,
    /// DMA page size in bytes. The C-RORC accepts only 8 KiB.
    pub dma_page_size: usize,
    /// Use the on-card data generator as the data source.
    pub generator_enabled: bool,
    pub generator_pattern: GeneratorPattern,
    pub generator_loopback: LoopbackMode,
    /// Event size produced by the generator; defaults to one DMA page.
    pub generator_data_size: usize,
    pub readout_mode: ReadoutMode,
    /// Issue RDYRX/EOBTR trigger commands when the generator is off.
    pub rdyrx_enabled: bool,
    pub reset_level: ResetLevel,
    pub buffer: BufferParameters,
}

impl Parameters {
    pub fn new(card_id: CardId, channel_number: u32) -> Self {
        Self {
            card_id,
            channel_number,
            dma_page_size: DEFAULT_DMA_PAGE_SIZE,
            generator_enabled: true,
            generator_pattern: GeneratorPattern::Incremental,
            generator_loopback: LoopbackMode::Internal,
            generator_data_size: DEFAULT_DMA_PAGE_SIZE,
            readout_mode: ReadoutMode::Continuous,
            rdyrx_enabled: false,
            reset_level: ResetLevel::Internal,
            buffer: BufferParameters::Null,
        }
    }
}

/// Channel options as collaborators pass them on the command line
/// (`--cp-*` keys). Sizes are converted to bytes here so nothing
/// downstream deals in KiB/MiB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelOptions {
    pub dma_page_size: usize,
    pub buffer_size: usize,
    pub generator_enabled: bool,
    pub generator_loopback: LoopbackMode,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            dma_page_size: DEFAULT_DMA_PAGE_SIZE,
            buffer_size: 2 * 1024 * 1024,
            generator_enabled: true,
            generator_loopback: LoopbackMode::Internal,
        }
    }
}

impl ChannelOptions {
    /// Parse `--cp-dma-pagesize=<KiB>`, `--cp-dma-bufmb=<MiB>`,
    /// `--cp-gen-enable=<bool>`, `--cp-gen-loopb=<mode>` from an argument
    /// list. Unknown arguments are ignored (they belong to other option
    /// groups of the same command line).
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Result<Self, RocError> {
        let mut options = Self::default();
        for arg in args {
            let arg = arg.as_ref();
            let Some((key, value)) = arg.split_once('=') else {
                continue;
            };
            match key {
                "--cp-dma-pagesize" => {
                    let kib: usize = value
                        .parse()
                        .map_err(|_| RocError::Parameter("bad --cp-dma-pagesize value"))?;
                    options.dma_page_size = kib * 1024;
                }
                "--cp-dma-bufmb" => {
                    let mib: usize = value
                        .parse()
                        .map_err(|_| RocError::Parameter("bad --cp-dma-bufmb value"))?;
                    options.buffer_size = mib * 1024 * 1024;
                }
                "--cp-gen-enable" => {
                    options.generator_enabled = match value {
                        "true" | "1" => true,
                        "false" | "0" => false,
                        _ => return Err(RocError::Parameter("bad --cp-gen-enable value")),
                    };
                }
                "--cp-gen-loopb" => {
                    options.generator_loopback = value.parse()?;
                }
                _ => {}
            }
        }
        Ok(options)
    }
}
