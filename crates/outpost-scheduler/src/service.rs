//! The exposed operations and their response envelope.
//!
//! Every call returns an [`ApiResponse`], which serializes to
//! `{ "success": true, "data": ..., "message"?: ... }` or
//! `{ "success": false, "code": ..., "message": ..., "details"?: ... }`.
//! Transport (HTTP routing, auth) lives outside this crate;
//! [`ErrorCode::http_status`] gives the status a front-end should use.

use std::sync::Arc;

use outpost_core::fixed::fixed64_to_f64;
use outpost_core::id::{LocationId, OwnerId, QueueItemId};
use outpost_core::queue::{CancelReason, GroupKey, QueueItem, QueueKind, QueueStatus};
use outpost_core::store::StoreError;
use serde::Serialize;
use serde_json::{Value, json};
use slotmap::{Key, KeyData};
use tracing::error;

use crate::admission::{AdmissionController, AdmissionError, DecisionOutcome, SubmitRequest};
use crate::cancel::{CancelError, CancelOutcome, cancel_item};
use crate::context::SchedulerContext;

// ---------------------------------------------------------------------------
// Error codes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidRequest,
    NotFound,
    PrerequisiteNotMet,
    AlreadyInProgress,
    InternalError,
}

impl ErrorCode {
    pub fn http_status(self) -> u16 {
        match self {
            ErrorCode::InvalidRequest => 400,
            ErrorCode::NotFound => 404,
            ErrorCode::AlreadyInProgress => 409,
            ErrorCode::PrerequisiteNotMet => 422,
            ErrorCode::InternalError => 500,
        }
    }
}

impl From<&AdmissionError> for ErrorCode {
    fn from(e: &AdmissionError) -> Self {
        match e {
            AdmissionError::UnknownItem(_)
            | AdmissionError::InvalidTarget { .. }
            | AdmissionError::NotOwner { .. } => ErrorCode::InvalidRequest,
            AdmissionError::UnknownLocation(_) => ErrorCode::NotFound,
            AdmissionError::PrerequisiteNotMet { .. } => ErrorCode::PrerequisiteNotMet,
            AdmissionError::AlreadyInProgress { .. } => ErrorCode::AlreadyInProgress,
            AdmissionError::Store(_) | AdmissionError::World(_) | AdmissionError::Energy(_) => {
                ErrorCode::InternalError
            }
        }
    }
}

impl From<&CancelError> for ErrorCode {
    fn from(e: &CancelError) -> Self {
        match e {
            CancelError::NotFound(_) => ErrorCode::NotFound,
            CancelError::Finalizing(_) => ErrorCode::InvalidRequest,
            CancelError::Refund(_) | CancelError::Store(_) => ErrorCode::InternalError,
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiSuccess<T> {
    pub success: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiFailure {
    pub success: bool,
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ApiResponse<T> {
    Success(ApiSuccess<T>),
    Failure(ApiFailure),
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        ApiResponse::Success(ApiSuccess {
            success: true,
            data,
            message: None,
        })
    }

    pub fn ok_with_message(data: T, message: impl Into<String>) -> Self {
        ApiResponse::Success(ApiSuccess {
            success: true,
            data,
            message: Some(message.into()),
        })
    }

    pub fn fail(code: ErrorCode, message: impl Into<String>, details: Option<Value>) -> Self {
        ApiResponse::Failure(ApiFailure {
            success: false,
            code,
            message: message.into(),
            details,
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ApiResponse::Success(_))
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            ApiResponse::Success(s) => Some(&s.data),
            ApiResponse::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&ApiFailure> {
        match self {
            ApiResponse::Success(_) => None,
            ApiResponse::Failure(f) => Some(f),
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            ApiResponse::Success(_) => 200,
            ApiResponse::Failure(f) => f.code.http_status(),
        }
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// External form of a queue item id.
pub fn item_id_to_u64(id: QueueItemId) -> u64 {
    id.data().as_ffi()
}

pub fn item_id_from_u64(raw: u64) -> QueueItemId {
    QueueItemId::from(KeyData::from_ffi(raw))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemView {
    pub id: u64,
    pub identity_key: String,
    pub queue_kind: QueueKind,
    pub status: QueueStatus,
    pub owner_id: u64,
    pub location_id: u64,
    pub item_key: String,
    pub target: u32,
    pub cost: u64,
    pub cost_charged: bool,
    pub energy_delta: f64,
    pub created_at: u64,
    pub scheduled_start: Option<u64>,
    pub scheduled_completion: Option<u64>,
    pub refunded: Option<u64>,
    pub cancel_reason: Option<String>,
    pub finished_at: Option<u64>,
}

impl From<&QueueItem> for ItemView {
    fn from(item: &QueueItem) -> Self {
        Self {
            id: item_id_to_u64(item.id),
            identity_key: item.identity_key.as_str().to_string(),
            queue_kind: item.kind,
            status: item.status,
            owner_id: item.owner.0,
            location_id: item.location.0,
            item_key: item.item_key.as_str().to_string(),
            target: item.target,
            cost: item.cost,
            cost_charged: item.cost_charged,
            energy_delta: fixed64_to_f64(item.energy_delta),
            created_at: item.created_at.as_millis(),
            scheduled_start: item.scheduled_start.map(|t| t.as_millis()),
            scheduled_completion: item.scheduled_completion.map(|t| t.as_millis()),
            refunded: item.refunded,
            cancel_reason: item.cancel_reason.as_ref().map(|r| match r {
                CancelReason::Requested => "requested".to_string(),
                CancelReason::EffectFailed(reason) => format!("effect_failed: {reason}"),
            }),
            finished_at: item.finished_at.map(|t| t.as_millis()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionView {
    pub outcome: DecisionOutcome,
    pub energy_delta: f64,
    pub produced: f64,
    pub consumed: f64,
    pub balance: f64,
    pub reserved: f64,
    pub projected_balance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitView {
    pub item: ItemView,
    pub decision: DecisionView,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CancelView {
    pub item: ItemView,
    pub refund: u64,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct QueueService {
    ctx: Arc<SchedulerContext>,
}

impl QueueService {
    pub fn new(ctx: Arc<SchedulerContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<SchedulerContext> {
        &self.ctx
    }

    pub fn submit(&self, request: SubmitRequest) -> ApiResponse<SubmitView> {
        match AdmissionController::new(&self.ctx).submit(request) {
            Ok(admission) => {
                let [produced, consumed, balance, reserved, projected_balance] =
                    admission.decision.budget.to_f64();
                let outcome = admission.decision.outcome;
                let view = SubmitView {
                    item: ItemView::from(&admission.item),
                    decision: DecisionView {
                        outcome,
                        energy_delta: fixed64_to_f64(admission.decision.energy_delta),
                        produced,
                        consumed,
                        balance,
                        reserved,
                        projected_balance,
                    },
                };
                match outcome {
                    DecisionOutcome::Activated | DecisionOutcome::ActivatedConcurrently => {
                        ApiResponse::ok(view)
                    }
                    DecisionOutcome::PendingInsufficientFunds => {
                        ApiResponse::ok_with_message(view, "queued until funds are available")
                    }
                    DecisionOutcome::CancelledConcurrently => {
                        ApiResponse::ok_with_message(view, "cancelled before it could start")
                    }
                    _ => ApiResponse::ok_with_message(view, "queued"),
                }
            }
            Err(e) => admission_failure(&e),
        }
    }

    pub fn list(&self, location: LocationId, kind: QueueKind) -> ApiResponse<Vec<ItemView>> {
        let group = GroupKey { location, kind };
        match self.ctx.read(|| self.ctx.store.list_group(group)) {
            Ok(items) => ApiResponse::ok(items.iter().map(ItemView::from).collect()),
            Err(e) => internal(&e),
        }
    }

    pub fn list_by_owner(&self, owner: OwnerId) -> ApiResponse<Vec<ItemView>> {
        match self.ctx.read(|| self.ctx.store.list_owner(owner)) {
            Ok(items) => ApiResponse::ok(items.iter().map(ItemView::from).collect()),
            Err(e) => internal(&e),
        }
    }

    pub fn get(&self, id: u64) -> ApiResponse<ItemView> {
        let item_id = item_id_from_u64(id);
        match self.ctx.read(|| self.ctx.store.get(item_id)) {
            Ok(Some(item)) => ApiResponse::ok(ItemView::from(&item)),
            Ok(None) => ApiResponse::fail(
                ErrorCode::NotFound,
                format!("queue item {id} not found"),
                Some(json!({ "id": id })),
            ),
            Err(e) => internal(&e),
        }
    }

    pub fn cancel(&self, id: u64) -> ApiResponse<CancelView> {
        match cancel_item(&self.ctx, item_id_from_u64(id)) {
            Ok(CancelOutcome::Cancelled { item, refund }) => ApiResponse::ok(CancelView {
                item: ItemView::from(&item),
                refund,
            }),
            Ok(CancelOutcome::AlreadyTerminal { status }) => ApiResponse::fail(
                ErrorCode::InvalidRequest,
                format!("queue item {id} is already {status}"),
                Some(json!({ "id": id, "status": status })),
            ),
            Err(e) => {
                let code = ErrorCode::from(&e);
                if code == ErrorCode::InternalError {
                    error!(target: "outpost::service", error = %e, "cancel.internal_error");
                }
                let details = match &e {
                    CancelError::NotFound(_) | CancelError::Finalizing(_) => {
                        Some(json!({ "id": id }))
                    }
                    _ => None,
                };
                ApiResponse::fail(code, e.to_string(), details)
            }
        }
    }
}

fn admission_failure<T>(e: &AdmissionError) -> ApiResponse<T> {
    let code = ErrorCode::from(e);
    let details = match e {
        AdmissionError::AlreadyInProgress {
            identity_key,
            existing,
        } => Some(json!({
            "identityKey": identity_key.as_str(),
            "existingId": item_id_to_u64(*existing),
        })),
        AdmissionError::PrerequisiteNotMet {
            required,
            level,
            actual,
            ..
        } => Some(json!({
            "required": required.as_str(),
            "level": level,
            "actual": actual,
        })),
        _ => None,
    };
    if code == ErrorCode::InternalError {
        error!(target: "outpost::service", error = %e, "submit.internal_error");
    }
    ApiResponse::fail(code, e.to_string(), details)
}

fn internal<T>(e: &StoreError) -> ApiResponse<T> {
    error!(target: "outpost::service", error = %e, "read.internal_error");
    ApiResponse::fail(ErrorCode::InternalError, e.to_string(), None)
}
