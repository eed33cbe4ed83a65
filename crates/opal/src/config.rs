//! Recognised configuration options and their decoding.

use std::path::PathBuf;

use clap::Parser;

use crate::geometry::Organisation;
use crate::replacement::ReplacementPolicy;

/// When the host copy of a region is refreshed from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum WritePolicy {
    /// Every read-buffer call refreshes the host region immediately.
    #[default]
    #[value(name = "write_through")]
    WriteThrough,
    /// Reads are elided; the host region is refreshed on explicit write-back.
    #[value(name = "write_back")]
    WriteBack,
}

impl WritePolicy {
    pub fn is_write_back(self) -> bool {
        matches!(self, Self::WriteBack)
    }
}

/// Decimal separator used for the ratio fields of the profile log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DecimalSeparator {
    #[default]
    Point,
    Comma,
}

impl DecimalSeparator {
    pub fn char(self) -> char {
        match self {
            Self::Point => '.',
            Self::Comma => ',',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OrganisationArg {
    #[value(name = "direct_mapping", alias = "d")]
    DirectMapping,
    #[value(name = "set_associative", alias = "s")]
    SetAssociative,
    #[value(name = "fully_associative", alias = "f")]
    FullyAssociative,
}

impl From<OrganisationArg> for Organisation {
    fn from(arg: OrganisationArg) -> Self {
        match arg {
            OrganisationArg::DirectMapping => Self::DirectMapped,
            OrganisationArg::SetAssociative => Self::SetAssociative,
            OrganisationArg::FullyAssociative => Self::FullyAssociative,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum PolicyArg {
    Lru,
    Fifo,
    Random,
    Smallest,
}

impl From<PolicyArg> for ReplacementPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Lru => Self::Lru,
            PolicyArg::Fifo => Self::Fifo,
            PolicyArg::Random => Self::Random,
            PolicyArg::Smallest => Self::Smallest,
        }
    }
}

/// Command-line options recognised by cache-enabled applications.
#[derive(Debug, Parser)]
#[command(name = "opal")]
#[command(about = "Transfer-eliding buffer cache configuration", long_about = None)]
pub struct CacheOptions {
    /// Cache organisation
    #[arg(short, long, value_enum)]
    organisation: OrganisationArg,

    /// Replacement policy (ignored under direct mapping)
    #[arg(short = 'r', long = "replacement-policy", value_enum, default_value = "lru")]
    replacement_policy: PolicyArg,

    /// Total number of lines (fully/set associative) or requested set count (direct)
    #[arg(short, long)]
    cache_size: usize,

    /// Requested set count (set-associative only); rounded up to a prime
    #[arg(short, long)]
    sets: Option<usize>,

    /// Write policy
    #[arg(short, long, value_enum, default_value = "write_through")]
    write_policy: WritePolicy,

    /// Append-only profile log destination
    #[arg(long, default_value = "log.txt")]
    profile_log: PathBuf,

    /// Decimal separator for ratio fields in the profile log
    #[arg(long, value_enum, default_value = "point")]
    decimal_separator: DecimalSeparator,
}

/// Validated cache configuration. Geometry checks happen at construction,
/// where the organisation and size are resolved together.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub organisation: Organisation,
    pub replacement_policy: ReplacementPolicy,
    pub cache_size: usize,
    /// Requested number of sets. The resolved set count is the smallest
    /// suitable prime at or above this; the per-set width follows from
    /// `cache_size`.
    pub requested_sets: Option<usize>,
    pub write_policy: WritePolicy,
    pub profile_log: PathBuf,
    pub decimal_separator: DecimalSeparator,
}

impl CacheConfig {
    pub fn new(organisation: Organisation, replacement_policy: ReplacementPolicy, cache_size: usize) -> Self {
        Self {
            organisation,
            replacement_policy,
            cache_size,
            requested_sets: None,
            write_policy: WritePolicy::default(),
            profile_log: PathBuf::from("log.txt"),
            decimal_separator: DecimalSeparator::default(),
        }
    }

    pub fn with_sets(mut self, sets: usize) -> Self {
        self.requested_sets = Some(sets);
        self
    }

    pub fn with_write_policy(mut self, policy: WritePolicy) -> Self {
        self.write_policy = policy;
        self
    }

    pub fn with_profile_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.profile_log = path.into();
        self
    }

    pub fn with_decimal_separator(mut self, separator: DecimalSeparator) -> Self {
        self.decimal_separator = separator;
        self
    }
}

impl From<CacheOptions> for CacheConfig {
    fn from(options: CacheOptions) -> Self {
        Self {
            organisation: options.organisation.into(),
            replacement_policy: options.replacement_policy.into(),
            cache_size: options.cache_size,
            requested_sets: options.sets,
            write_policy: options.write_policy,
            profile_log: options.profile_log,
            decimal_separator: options.decimal_separator,
        }
    }
}
