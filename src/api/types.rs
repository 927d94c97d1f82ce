//! API request and response types.
//!
//! Field names follow MIP-003, which mixes snake_case and camelCase.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::JobInput;
use crate::jobs::{JobStatus, PaymentStatus};
use crate::pricing::Amount;

/// Request to start a new job.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StartJobRequest {
    /// Job input; a missing object counts as no addresses
    #[serde(default)]
    pub input: JobInput,

    /// Optional purchaser-chosen identifier (derived from the input if absent)
    #[serde(default)]
    pub identifier_from_purchaser: Option<String>,
}

/// Response after a job was registered and a payment request created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartJobResponse {
    pub status: String,

    pub job_id: Uuid,

    #[serde(rename = "blockchainIdentifier")]
    pub blockchain_identifier: String,

    #[serde(rename = "payByTime")]
    pub pay_by_time: String,

    #[serde(rename = "submitResultTime")]
    pub submit_result_time: String,

    #[serde(rename = "unlockTime")]
    pub unlock_time: String,

    #[serde(rename = "externalDisputeUnlockTime")]
    pub external_dispute_unlock_time: String,

    #[serde(rename = "agentIdentifier")]
    pub agent_identifier: String,

    #[serde(rename = "sellerVkey")]
    pub seller_vkey: String,

    #[serde(rename = "identifierFromPurchaser")]
    pub identifier_from_purchaser: String,

    #[serde(rename = "Amounts")]
    pub amounts: Vec<Amount>,

    #[serde(rename = "inputHash")]
    pub input_hash: String,
}

/// Query string of `GET /status`.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusQuery {
    pub job_id: Option<String>,
}

/// Job status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub payment_status: PaymentStatus,
    /// Agent output, once completed
    pub result: Option<String>,
    /// Failure reason, once failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Availability response.
#[derive(Debug, Clone, Serialize)]
pub struct AvailabilityResponse {
    pub status: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

/// A single field of the input schema.
#[derive(Debug, Clone, Serialize)]
pub struct InputField {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub data: InputFieldData,
    pub validations: Vec<InputValidation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InputFieldData {
    pub description: String,
    pub placeholder: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InputValidation {
    pub validation: String,
    pub value: String,
}

/// Input schema response.
#[derive(Debug, Clone, Serialize)]
pub struct InputSchemaResponse {
    pub input_data: Vec<InputField>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service version
    pub version: String,

    /// Name of the agent executing jobs
    pub agent: String,

    /// Whether jobs survive a restart
    pub store_persistent: bool,
}
