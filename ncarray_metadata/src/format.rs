use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::MetadataError;

/// The storage format of a dataset or sub-array file.
#[derive(Serialize, Deserialize, Clone, Copy, Eq, PartialEq, Hash, Debug, Display, Default)]
pub enum FileFormat {
    /// A plain file with groups.
    #[serde(rename = "NETCDF4")]
    #[display("NETCDF4")]
    #[default]
    Netcdf4,
    /// A plain file without groups.
    #[serde(rename = "NETCDF3_CLASSIC")]
    #[display("NETCDF3_CLASSIC")]
    Netcdf3Classic,
    /// A partitioned dataset with groups.
    #[serde(rename = "CFA4")]
    #[display("CFA4")]
    Cfa4,
    /// A partitioned dataset without groups.
    #[serde(rename = "CFA3")]
    #[display("CFA3")]
    Cfa3,
}

impl FileFormat {
    /// Returns true if the format is partitioned.
    #[must_use]
    pub const fn is_cfa(self) -> bool {
        matches!(self, Self::Cfa4 | Self::Cfa3)
    }

    /// Returns true if the format supports groups.
    #[must_use]
    pub const fn supports_groups(self) -> bool {
        matches!(self, Self::Netcdf4 | Self::Cfa4)
    }

    /// The format of the sub-array files of a partitioned dataset.
    #[must_use]
    pub const fn subarray_format(self) -> Self {
        match self {
            Self::Netcdf4 | Self::Cfa4 => Self::Netcdf4,
            Self::Netcdf3Classic | Self::Cfa3 => Self::Netcdf3Classic,
        }
    }
}

impl std::str::FromStr for FileFormat {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NETCDF4" => Ok(Self::Netcdf4),
            "NETCDF3_CLASSIC" => Ok(Self::Netcdf3Classic),
            "CFA4" => Ok(Self::Cfa4),
            "CFA3" => Ok(Self::Cfa3),
            _ => Err(MetadataError::InvalidAttribute {
                name: "format".to_string(),
                reason: format!("unknown file format {s}"),
            }),
        }
    }
}

/// The version of the CFA conventions used to encode partition matrices.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Display)]
pub enum CfaVersion {
    /// Version 0.4: a JSON attribute on the field variable.
    #[display("0.4")]
    V0_4,
    /// Version 0.5: a companion group of array attributes.
    #[display("0.5")]
    V0_5,
}

const CFA_TOKEN_PREFIX: &str = "CFA-";

impl CfaVersion {
    /// The default version for a dataset `format`.
    ///
    /// Formats without groups cannot hold the companion groups of [`CfaVersion::V0_5`].
    #[must_use]
    pub const fn default_for(format: FileFormat) -> Self {
        if format.supports_groups() {
            Self::V0_5
        } else {
            Self::V0_4
        }
    }

    /// Parse a version number, such as `0.5`.
    ///
    /// # Errors
    /// Returns [`MetadataError::UnsupportedVersion`] if the version is not supported.
    pub fn parse(version: &str) -> Result<Self, MetadataError> {
        match version {
            "0.4" => Ok(Self::V0_4),
            "0.5" => Ok(Self::V0_5),
            _ => Err(MetadataError::UnsupportedVersion(version.to_string())),
        }
    }

    /// The `CFA-<version>` conventions token.
    #[must_use]
    pub fn token(self) -> String {
        format!("{CFA_TOKEN_PREFIX}{self}")
    }

    /// Find the CFA version in a `Conventions` attribute, such as `CF-1.8 CFA-0.4`.
    ///
    /// Returns [`None`] if there is no `CFA-` token.
    ///
    /// # Errors
    /// Returns [`MetadataError::UnsupportedVersion`] if the token names an unsupported version.
    pub fn from_conventions(conventions: &str) -> Result<Option<Self>, MetadataError> {
        conventions
            .split(|c: char| c.is_whitespace() || c == ',')
            .find_map(|token| token.strip_prefix(CFA_TOKEN_PREFIX))
            .map(Self::parse)
            .transpose()
    }

    /// Add the `CFA-<version>` token to a `Conventions` attribute, replacing any existing CFA token.
    #[must_use]
    pub fn append_to_conventions(self, conventions: Option<&str>) -> String {
        let mut tokens = conventions
            .unwrap_or_default()
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|token| !token.is_empty() && !token.starts_with(CFA_TOKEN_PREFIX))
            .map(str::to_string)
            .collect::<Vec<_>>();
        tokens.push(self.token());
        tokens.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_format() {
        assert_eq!(serde_json::to_string(&FileFormat::Netcdf3Classic).unwrap(), r#""NETCDF3_CLASSIC""#);
        assert_eq!("CFA4".parse::<FileFormat>().unwrap(), FileFormat::Cfa4);
        assert!("HDF5".parse::<FileFormat>().is_err());
        assert!(FileFormat::Cfa3.is_cfa());
        assert!(!FileFormat::Cfa3.supports_groups());
        assert_eq!(FileFormat::Cfa3.subarray_format(), FileFormat::Netcdf3Classic);
    }

    #[test]
    fn cfa_version_conventions() {
        assert_eq!(
            CfaVersion::from_conventions("CF-1.8 CFA-0.4").unwrap(),
            Some(CfaVersion::V0_4)
        );
        assert_eq!(
            CfaVersion::from_conventions("CF-1.8,CFA-0.5").unwrap(),
            Some(CfaVersion::V0_5)
        );
        assert_eq!(CfaVersion::from_conventions("CF-1.8").unwrap(), None);
        assert!(matches!(
            CfaVersion::from_conventions("CFA-0.6"),
            Err(MetadataError::UnsupportedVersion(version)) if version == "0.6"
        ));
        assert_eq!(
            CfaVersion::V0_5.append_to_conventions(Some("CF-1.8 CFA-0.4")),
            "CF-1.8 CFA-0.5"
        );
        assert_eq!(CfaVersion::V0_4.append_to_conventions(None), "CFA-0.4");
        assert_eq!(CfaVersion::default_for(FileFormat::Cfa3), CfaVersion::V0_4);
    }
}
