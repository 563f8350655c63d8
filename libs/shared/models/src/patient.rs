use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::emr::EmrProvider;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub practice_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,

    // One slot per provider; set at most once.
    #[serde(default)]
    pub mindbody_client_id: Option<String>,
    #[serde(default)]
    pub nextech_patient_id: Option<String>,
    #[serde(default)]
    pub modmed_patient_id: Option<String>,
}

impl Patient {
    pub fn external_id(&self, provider: EmrProvider) -> Option<&str> {
        match provider {
            EmrProvider::Mindbody => self.mindbody_client_id.as_deref(),
            EmrProvider::Nextech => self.nextech_patient_id.as_deref(),
            EmrProvider::Modmed => self.modmed_patient_id.as_deref(),
            EmrProvider::Patientnow => None,
        }
    }

    /// Column holding the remote identifier for `provider`, if the model has one.
    pub fn external_id_column(provider: EmrProvider) -> Option<&'static str> {
        match provider {
            EmrProvider::Mindbody => Some("mindbody_client_id"),
            EmrProvider::Nextech => Some("nextech_patient_id"),
            EmrProvider::Modmed => Some("modmed_patient_id"),
            EmrProvider::Patientnow => None,
        }
    }

    pub fn external_id_slot(&mut self, provider: EmrProvider) -> Option<&mut Option<String>> {
        match provider {
            EmrProvider::Mindbody => Some(&mut self.mindbody_client_id),
            EmrProvider::Nextech => Some(&mut self.nextech_patient_id),
            EmrProvider::Modmed => Some(&mut self.modmed_patient_id),
            EmrProvider::Patientnow => None,
        }
    }
}
