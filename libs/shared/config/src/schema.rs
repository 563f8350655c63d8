use tracing::warn;

/// Which EMR-related columns the deployed database schema carries. The
/// Mindbody client link and `emr_appointment_id` exist in every version.
///
/// Resolved once at startup from `EMR_SCHEMA_VERSION` so writers can branch on
/// a plain flag instead of probing the database on every write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaCapabilities {
    pub version: u32,
    pub nextech_patient_link: bool,
    pub modmed_patient_link: bool,
    pub credential_validation_columns: bool,
}

impl SchemaCapabilities {
    pub const LATEST_VERSION: u32 = 3;

    pub fn latest() -> Self {
        Self::for_version(Self::LATEST_VERSION)
    }

    pub fn for_version(version: u32) -> Self {
        let version = match version {
            1..=Self::LATEST_VERSION => version,
            other => {
                warn!(
                    "Unknown EMR schema version {}, falling back to {}",
                    other,
                    Self::LATEST_VERSION
                );
                Self::LATEST_VERSION
            }
        };

        Self {
            version,
            nextech_patient_link: version >= 2,
            credential_validation_columns: version >= 2,
            modmed_patient_link: version >= 3,
        }
    }
}

impl Default for SchemaCapabilities {
    fn default() -> Self {
        Self::latest()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_one_only_has_mindbody_links() {
        let caps = SchemaCapabilities::for_version(1);
        assert!(!caps.nextech_patient_link);
        assert!(!caps.modmed_patient_link);
        assert!(!caps.credential_validation_columns);
    }

    #[test]
    fn test_version_two_adds_nextech() {
        let caps = SchemaCapabilities::for_version(2);
        assert!(caps.nextech_patient_link);
        assert!(caps.credential_validation_columns);
        assert!(!caps.modmed_patient_link);
    }

    #[test]
    fn test_unknown_version_falls_back_to_latest() {
        assert_eq!(SchemaCapabilities::for_version(0), SchemaCapabilities::latest());
        assert_eq!(SchemaCapabilities::for_version(42).version, 3);
    }
}
