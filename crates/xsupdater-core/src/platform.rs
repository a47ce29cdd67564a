use std::fmt;

use crate::error::UpdateError;

/// First release that distributes updates as `.iso` images instead of
/// single-file `.xsupdate` patches.
const IMAGE_UPDATE_SINCE: (u32, u32) = (7, 1);

/// Software identity reported by the connected host.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SoftwareVersion {
    pub product_brand: String,
    pub product_version: String,
    pub build_number: String,
}

impl SoftwareVersion {
    /// Major and minor components of `product_version`. A missing minor
    /// component reads as zero.
    pub fn major_minor(&self) -> Result<(u32, u32), UpdateError> {
        let mut parts = self.product_version.trim().split('.');
        let major = parts
            .next()
            .and_then(|part| part.parse::<u32>().ok())
            .ok_or_else(|| {
                UpdateError::UnsupportedPlatform(format!(
                    "product version '{}' has no numeric major component",
                    self.product_version
                ))
            })?;
        let minor = match parts.next() {
            Some(part) => part.parse::<u32>().map_err(|_| {
                UpdateError::UnsupportedPlatform(format!(
                    "product version '{}' has a non-numeric minor component",
                    self.product_version
                ))
            })?,
            None => 0,
        };
        Ok((major, minor))
    }
}

impl fmt::Display for SoftwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.product_brand, self.product_version)?;
        if !self.build_number.is_empty() {
            write!(f, " (build {})", self.build_number)?;
        }
        Ok(())
    }
}

/// Management-plane generation, which fixes the artifact extension and the
/// registry the pool records applied artifacts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatchFormat {
    LegacyPatch,
    ImageUpdate,
}

impl PatchFormat {
    pub fn detect(version: &SoftwareVersion) -> Result<Self, UpdateError> {
        if version.major_minor()? >= IMAGE_UPDATE_SINCE {
            Ok(Self::ImageUpdate)
        } else {
            Ok(Self::LegacyPatch)
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LegacyPatch => "patch",
            Self::ImageUpdate => "update",
        }
    }

    pub fn cache_extension(self) -> &'static str {
        match self {
            Self::LegacyPatch => ".xsupdate",
            Self::ImageUpdate => ".iso",
        }
    }

    /// XenAPI class holding applied artifacts of this generation.
    pub fn registry_class(self) -> &'static str {
        match self {
            Self::LegacyPatch => "pool_patch",
            Self::ImageUpdate => "pool_update",
        }
    }

    pub fn artifact_file_name(self, name: &str) -> String {
        format!("{name}{}", self.cache_extension())
    }
}

/// Criterion picking the `<version>` node of the catalog that applies to
/// the connected host. Fixed for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSelector {
    BuildNumber(String),
    ProductVersion(String),
}

impl VersionSelector {
    /// Build numbers changed format in 7.2 and are not populated in the
    /// catalog for image-based releases, so those match on product version.
    pub fn for_host(version: &SoftwareVersion, format: PatchFormat) -> Self {
        match format {
            PatchFormat::LegacyPatch => Self::BuildNumber(version.build_number.clone()),
            PatchFormat::ImageUpdate => Self::ProductVersion(version.product_version.clone()),
        }
    }

    pub fn attribute(&self) -> &'static str {
        match self {
            Self::BuildNumber(_) => "build-number",
            Self::ProductVersion(_) => "value",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Self::BuildNumber(value) | Self::ProductVersion(value) => value,
        }
    }
}

impl fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.attribute(), self.value())
    }
}

/// Per-run platform facts derived once from the host's software identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub format: PatchFormat,
    pub selector: VersionSelector,
}

impl Platform {
    pub fn detect(version: &SoftwareVersion) -> Result<Self, UpdateError> {
        let format = PatchFormat::detect(version)?;
        Ok(Self {
            format,
            selector: VersionSelector::for_host(version, format),
        })
    }
}
