//! MIP-003 job endpoints.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use uuid::Uuid;

use super::error::ApiError;
use super::routes::AppState;
use super::types::*;
use crate::jobs::NewJob;
use crate::payment::PaymentRequest;
use crate::util::{is_cardano_address, purchaser_identifier, sha256_hex, PURCHASER_IDENTIFIER_LEN};

/// Register a job and the payment request the purchaser must fulfil.
pub async fn start_job(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<StartJobRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<StartJobResponse>), ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let input = req.input.normalized();
    if input.addresses.is_empty() {
        return Err(ApiError::BadRequest(
            "At least one address must be provided".to_string(),
        ));
    }
    if input.addresses.len() > state.config.max_addresses_per_job {
        return Err(ApiError::BadRequest(format!(
            "At most {} addresses may be provided",
            state.config.max_addresses_per_job
        )));
    }
    if let Some(invalid) = input.addresses.iter().find(|a| !is_cardano_address(a)) {
        return Err(ApiError::BadRequest(format!(
            "Not a Cardano address: {}",
            invalid
        )));
    }

    let input_data = input.to_input_data();
    let identifier_from_purchaser = match req.identifier_from_purchaser.as_deref().map(str::trim) {
        Some(id) if id.is_empty() || id.chars().count() > PURCHASER_IDENTIFIER_LEN => {
            return Err(ApiError::BadRequest(format!(
                "identifier_from_purchaser must be 1 to {} characters",
                PURCHASER_IDENTIFIER_LEN
            )));
        }
        Some(id) => id.to_string(),
        None => purchaser_identifier(&input_data),
    };

    let amounts = state.pricing.price(&input);
    let request = PaymentRequest::new(
        &state.config.payment,
        sha256_hex(&input_data),
        identifier_from_purchaser.clone(),
        Utc::now(),
    )
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    let payment = state
        .payments
        .create_payment_request(&request)
        .await
        .map_err(|e| {
            tracing::error!("Payment request failed: {}", e);
            ApiError::PaymentService(format!("Payment service error: {}", e))
        })?;

    let job = state
        .store
        .create_job(NewJob {
            input,
            input_hash: payment.input_hash.clone(),
            identifier_from_purchaser: identifier_from_purchaser.clone(),
            blockchain_identifier: payment.blockchain_identifier.clone(),
            amounts: amounts.clone(),
            pay_by_time: request.pay_by_time,
        })
        .await
        .map_err(ApiError::Internal)?;

    tracing::info!(
        "Job {} awaiting payment {} ({} addresses)",
        job.id,
        job.blockchain_identifier,
        job.input.addresses.len()
    );

    Ok((
        StatusCode::CREATED,
        Json(StartJobResponse {
            status: "success".to_string(),
            job_id: job.id,
            blockchain_identifier: payment.blockchain_identifier,
            pay_by_time: payment.pay_by_time,
            submit_result_time: payment.submit_result_time,
            unlock_time: payment.unlock_time,
            external_dispute_unlock_time: payment.external_dispute_unlock_time,
            agent_identifier: state.config.payment.agent_identifier.clone(),
            seller_vkey: state.config.payment.seller_vkey.clone(),
            identifier_from_purchaser,
            amounts,
            input_hash: payment.input_hash,
        }),
    ))
}

/// Report the status (and result, once available) of a job.
pub async fn job_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job_id = query
        .job_id
        .as_deref()
        .and_then(|s| Uuid::parse_str(s.trim()).ok())
        .ok_or(ApiError::InvalidJobId)?;

    let job = state
        .store
        .get_job(job_id)
        .await
        .map_err(ApiError::Internal)?
        .ok_or(ApiError::JobNotFound)?;

    Ok(Json(JobStatusResponse {
        job_id: job.id,
        status: job.status,
        payment_status: job.payment_status,
        result: job.result,
        message: job.error,
    }))
}

/// Whether the agent accepts jobs.
pub async fn availability(State(state): State<Arc<AppState>>) -> Json<AvailabilityResponse> {
    Json(AvailabilityResponse {
        status: "available".to_string(),
        kind: "masumi-agent".to_string(),
        message: format!("{} is ready to accept jobs", state.agent.name()),
    })
}

/// Describe the input `start_job` expects.
pub async fn input_schema(State(state): State<Arc<AppState>>) -> Json<InputSchemaResponse> {
    Json(InputSchemaResponse {
        input_data: vec![InputField {
            id: "addresses".to_string(),
            kind: "string[]".to_string(),
            name: "Cardano addresses".to_string(),
            data: InputFieldData {
                description: "Addresses whose holdings should be reported".to_string(),
                placeholder: "addr1...".to_string(),
            },
            validations: vec![
                InputValidation {
                    validation: "min".to_string(),
                    value: "1".to_string(),
                },
                InputValidation {
                    validation: "max".to_string(),
                    value: state.config.max_addresses_per_job.to_string(),
                },
            ],
        }],
    })
}
