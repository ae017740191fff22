// src/kyc/types.rs

use serde::{Deserialize, Serialize};

/// A whitelist entry as submitted to the KYC store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KycRecord {
    pub address: Option<String>,
    pub referred_by: Option<String>,
    pub referral_key: Option<String>,
    pub status: Option<String>,
}

/// Current version of the [`KycResult`] wire shape.
pub const KYC_RESULT_VERSION: u32 = 2;

fn result_version() -> u32 {
    KYC_RESULT_VERSION
}

/// Read model answered to callers asking about one address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KycResult {
    #[serde(default = "result_version")]
    pub version: u32,
    pub address: String,
    pub referral_count: u64,
    /// Raw status code, as found in the sheet.
    pub status: String,
    pub referral: Option<String>,
    pub message: String,
}

impl KycResult {
    pub fn from_record(address: &str, record: &KycRecord, referral_count: u64) -> Self {
        let status = record.status.clone().unwrap_or_default();
        let message = if status.trim().is_empty() {
            "no status recorded".to_string()
        } else {
            format!("status {}", status)
        };
        Self {
            version: KYC_RESULT_VERSION,
            address: address.to_string(),
            referral_count,
            status,
            referral: record.referred_by.clone(),
            message,
        }
    }
}
