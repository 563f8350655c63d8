use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::emr::EmrProvider;

/// Per-practice EMR booking configuration. Stored defaults take precedence over
/// values resolved from the remote system.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PracticeEmrSettings {
    pub practice_id: Uuid,
    pub provider: Option<EmrProvider>,
    pub default_provider_id: Option<String>,
    pub default_location_id: Option<String>,
    pub default_appointment_type_id: Option<String>,
}
