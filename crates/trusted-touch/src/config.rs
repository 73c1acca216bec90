//! Session configuration from board properties.
//!
//! Board properties are whatever the platform layer reads from its firmware
//! description (device tree, board table). They arrive here already split into
//! typed fields; this module validates them and builds the
//! [`ResourceDescriptor`] both machines use.

use platform::{
    DescriptorError, InterruptId, IoRegion, RegionList, ResourceDescriptor, ResourceTag,
    DEFAULT_RESET_PULSE_US, MAX_IO_REGIONS,
};

/// Whether trusted touch is enabled on this board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TouchMode {
    /// Feature disabled; every session request returns `Unsupported`.
    #[default]
    Disabled,
    /// Handover between primary and trusted domain.
    Vm,
}

impl TouchMode {
    /// Parse the board's mode property. Only `"vm_mode"` enables the feature.
    #[must_use]
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("vm_mode") => Self::Vm,
            _ => Self::Disabled,
        }
    }
}

/// Which domain this instance runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Environment {
    /// Primary domain: runs the owner machine.
    Primary,
    /// Trusted domain: runs the borrower machine.
    Trusted,
}

impl Environment {
    /// Parse `"pvm"` / `"tvm"`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "pvm" => Some(Self::Primary),
            "tvm" => Some(Self::Trusted),
            _ => None,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror_no_std::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// The environment property is missing or not `pvm`/`tvm`.
    #[error("unknown trusted touch environment")]
    UnknownEnvironment,
    /// The touch type is neither `primary` nor `secondary`.
    #[error("unknown trusted touch type")]
    UnknownTouchType,
    /// No interrupt id was configured.
    #[error("missing trusted touch interrupt")]
    MissingInterrupt,
    /// The io-base and io-size lists differ in length.
    #[error("io base/size lists differ in length ({bases} vs {sizes})")]
    RegionListMismatch {
        /// Number of bases.
        bases: usize,
        /// Number of sizes.
        sizes: usize,
    },
    /// The regions do not form a valid descriptor.
    #[error("invalid resource descriptor: {0}")]
    Descriptor(#[from] DescriptorError),
}

/// Raw board properties for one touch controller.
#[derive(Debug, Clone, Copy, Default)]
pub struct Properties<'a> {
    /// Mode property (`"vm_mode"` enables the feature).
    pub touch_mode: Option<&'a str>,
    /// Environment (`"pvm"` or `"tvm"`).
    pub environment: Option<&'a str>,
    /// Resource set (`"primary"` or `"secondary"`); absent means primary.
    pub touch_type: Option<&'a str>,
    /// Base addresses of the IO regions.
    pub io_bases: &'a [u64],
    /// Sizes of the IO regions, index-aligned with `io_bases`.
    pub io_sizes: &'a [u64],
    /// Interrupt id of the controller line.
    pub irq: Option<u32>,
    /// Reset pulse width in microseconds.
    pub reset_pulse_us: Option<u32>,
}

/// Validated configuration of one protocol instance.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SessionConfig {
    /// Whether the feature is enabled.
    pub mode: TouchMode,
    /// Which machine this domain runs.
    pub environment: Environment,
    /// The resources moved by a session.
    pub descriptor: ResourceDescriptor,
    /// Controller reset pulse width in microseconds.
    pub reset_pulse_us: u32,
}

impl SessionConfig {
    /// Build a configuration directly from a descriptor.
    #[must_use]
    pub fn new(mode: TouchMode, environment: Environment, descriptor: ResourceDescriptor) -> Self {
        Self {
            mode,
            environment,
            descriptor,
            reset_pulse_us: DEFAULT_RESET_PULSE_US,
        }
    }

    /// Resource set governed by this instance.
    #[must_use]
    pub fn tag(&self) -> ResourceTag {
        self.descriptor.tag()
    }

    /// Returns `true` when trusted touch is enabled.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.mode == TouchMode::Vm
    }

    /// Validate board properties and build the configuration.
    pub fn from_properties(props: &Properties<'_>) -> Result<Self, ConfigError> {
        let mode = TouchMode::parse(props.touch_mode);
        let environment = props
            .environment
            .and_then(Environment::parse)
            .ok_or(ConfigError::UnknownEnvironment)?;

        let tag = match props.touch_type {
            None => {
                warn!("no trusted touch type configured, using primary");
                ResourceTag::Primary
            }
            Some(value) => ResourceTag::parse(value).ok_or(ConfigError::UnknownTouchType)?,
        };

        let irq = props.irq.map(InterruptId).ok_or(ConfigError::MissingInterrupt)?;

        if props.io_bases.len() != props.io_sizes.len() {
            return Err(ConfigError::RegionListMismatch {
                bases: props.io_bases.len(),
                sizes: props.io_sizes.len(),
            });
        }
        if props.io_bases.len() > MAX_IO_REGIONS {
            return Err(DescriptorError::TooManyRegions.into());
        }
        let mut regions = RegionList::new();
        for (base, size) in props.io_bases.iter().zip(props.io_sizes) {
            regions
                .push(IoRegion::new(*base, *size))
                .map_err(|_| DescriptorError::TooManyRegions)?;
        }
        let descriptor = ResourceDescriptor::new(tag, &regions, irq)?;

        info!(
            "trusted touch {}: {} region(s), {}",
            tag,
            descriptor.regions().len(),
            irq
        );

        Ok(Self {
            mode,
            environment,
            descriptor,
            reset_pulse_us: props.reset_pulse_us.unwrap_or(DEFAULT_RESET_PULSE_US),
        })
    }
}
