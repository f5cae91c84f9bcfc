//! JSON endpoints for the transfer pack lock. Clients poll these; every call settles overdue
//! takeover requests before answering.

use actix_session::Session;
use actix_web::http::StatusCode;
use actix_web::{get, post, web, HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::http;
use crate::locks::{
    AcquireOutcome, Conflict, DecideOutcome, Decision, LockError, RequestView, StartOutcome,
};
use crate::store::{Lease, ResourceId, UserId};
use crate::utils::time::{date_time_iso_str, seconds_until};
use crate::BackendService;

const DEFAULT_AUDIT_LIMIT: usize = 50;
const MAX_AUDIT_LIMIT: usize = 200;

impl ResponseError for LockError {
    fn status_code(&self) -> StatusCode {
        match self {
            LockError::NotHolder => StatusCode::FORBIDDEN,
            LockError::NotFound => StatusCode::NOT_FOUND,
            LockError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            LockError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (code, message) = match self {
            LockError::NotHolder => ("not_holder", self.to_string()),
            LockError::NotFound => ("not_found", self.to_string()),
            LockError::InvalidRequest(_) => ("invalid_request", self.to_string()),
            LockError::Store(e) => {
                log::error!("Lock store error: {}", e);
                (
                    "store_unavailable",
                    "Lock store unavailable, try again".to_string(),
                )
            }
        };
        HttpResponse::build(self.status_code()).json(json!({
            "error": code,
            "message": message,
        }))
    }
}

/// Transfer ids arrive as numbers from some clients and strings from others.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum RawResourceId {
    Number(u64),
    Text(String),
}

impl RawResourceId {
    fn parse(&self) -> Result<ResourceId, LockError> {
        let parsed = match self {
            RawResourceId::Number(n) => ResourceId::parse(&n.to_string()),
            RawResourceId::Text(s) => ResourceId::parse(s),
        };
        parsed.ok_or_else(|| LockError::InvalidRequest("invalid resource_id".to_string()))
    }
}

fn parse_resource_id(raw: &str) -> Result<ResourceId, LockError> {
    ResourceId::parse(raw)
        .ok_or_else(|| LockError::InvalidRequest("invalid resource_id".to_string()))
}

#[derive(Deserialize)]
pub struct LockRequest {
    pub resource_id: RawResourceId,
    pub client_tag: Option<String>,
}

#[derive(Deserialize)]
pub struct ReleaseRequest {
    pub resource_id: RawResourceId,
    #[serde(default)]
    pub force: bool,
}

#[derive(Deserialize)]
pub struct DecideRequest {
    pub resource_id: RawResourceId,
    pub decision: DecisionParam,
}

#[derive(Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionParam {
    Accept,
    Decline,
}

impl From<DecisionParam> for Decision {
    fn from(param: DecisionParam) -> Self {
        match param {
            DecisionParam::Accept => Decision::Accept,
            DecisionParam::Decline => Decision::Decline,
        }
    }
}

#[derive(Deserialize)]
pub struct ResourceQuery {
    pub resource_id: String,
    pub limit: Option<usize>,
}

#[derive(Serialize)]
struct HolderJson {
    holder_id: UserId,
    holder_name: Option<String>,
    acquired_at: String,
    expires_at: String,
}

async fn holder_json(service: &BackendService, lease: &Lease) -> HolderJson {
    HolderJson {
        holder_id: lease.holder_id,
        holder_name: service.users.display_name(lease.holder_id).await,
        acquired_at: date_time_iso_str(&lease.acquired_at),
        expires_at: date_time_iso_str(&lease.expires_at),
    }
}

#[post("/api/transfer_locks.acquire")]
pub async fn acquire(
    session: Session,
    body: web::Json<LockRequest>,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    let user = http::get_session_user(&session)?;
    let resource_id = body.resource_id.parse()?;
    service.handover.reconcile(&resource_id).await?;
    let outcome = service
        .leases
        .acquire(&resource_id, user.id, body.client_tag.clone())
        .await?;
    let response = match outcome {
        AcquireOutcome::Granted {
            lease,
            already_held,
        } => HttpResponse::Ok().json(json!({
            "result": "granted",
            "lease": lease,
            "already_held": already_held,
        })),
        AcquireOutcome::Conflict(Conflict::KnownHolder(lease)) => {
            HttpResponse::Conflict().json(json!({
                "result": "conflict",
                "holder": holder_json(&service, &lease).await,
            }))
        }
        AcquireOutcome::Conflict(Conflict::UnknownHolder) => {
            HttpResponse::Conflict().json(json!({
                "result": "conflict",
                "holder": null,
            }))
        }
    };
    Ok(response)
}

#[post("/api/transfer_locks.heartbeat")]
pub async fn heartbeat(
    session: Session,
    body: web::Json<LockRequest>,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    let user = http::get_session_user(&session)?;
    let resource_id = body.resource_id.parse()?;
    service.handover.reconcile(&resource_id).await?;
    let lease = service
        .leases
        .heartbeat(&resource_id, user.id, body.client_tag.clone())
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "result": "renewed",
        "lease": lease,
    })))
}

#[post("/api/transfer_locks.release")]
pub async fn release(
    session: Session,
    body: web::Json<ReleaseRequest>,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    let user = http::get_session_user(&session)?;
    let resource_id = body.resource_id.parse()?;
    service.handover.reconcile(&resource_id).await?;
    let released = service
        .leases
        .release(&resource_id, user.id, body.force)
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "released": released })))
}

#[get("/api/transfer_locks.status")]
pub async fn lock_status(
    session: Session,
    query: web::Query<ResourceQuery>,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    let user = http::get_session_user(&session)?;
    let resource_id = parse_resource_id(&query.resource_id)?;
    service.handover.reconcile(&resource_id).await?;
    let response = match service.leases.get(&resource_id).await? {
        Some(lease) => json!({
            "has_lock": lease.holder_id == user.id,
            "is_locked": true,
            "is_locked_by_other": lease.holder_id != user.id,
            "holder_id": lease.holder_id,
            "holder_name": service.users.display_name(lease.holder_id).await,
            "expires_at": date_time_iso_str(&lease.expires_at),
        }),
        None => json!({
            "has_lock": false,
            "is_locked": false,
            "is_locked_by_other": false,
            "holder_id": null,
            "holder_name": null,
            "expires_at": null,
        }),
    };
    Ok(HttpResponse::Ok().json(response))
}

#[post("/api/transfer_locks.request_start")]
pub async fn request_start(
    session: Session,
    body: web::Json<LockRequest>,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    let user = http::get_session_user(&session)?;
    let resource_id = body.resource_id.parse()?;
    let outcome = service
        .handover
        .request_access(&resource_id, user.id, body.client_tag.clone())
        .await?;
    let response = match outcome {
        StartOutcome::AlreadyHolder { lease } => json!({
            "state": "already_holder",
            "lease": lease,
        }),
        StartOutcome::Pending {
            request,
            holder,
            requester_deadline,
            replayed,
        } => json!({
            "state": "pending",
            "request_id": request.id,
            "holder_id": holder.holder_id,
            "holder_name": service.users.display_name(holder.holder_id).await,
            "holder_deadline": date_time_iso_str(&request.decision_deadline),
            "requester_deadline": date_time_iso_str(&requester_deadline),
            "replayed": replayed,
        }),
    };
    Ok(HttpResponse::Ok().json(response))
}

#[post("/api/transfer_locks.request_decide")]
pub async fn request_decide(
    session: Session,
    body: web::Json<DecideRequest>,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    let user = http::get_session_user(&session)?;
    let resource_id = body.resource_id.parse()?;
    let outcome = service
        .handover
        .decide(&resource_id, user.id, body.decision.into())
        .await?;
    let response = match outcome {
        DecideOutcome::Accepted { lease } => json!({
            "state": "accepted",
            "lease": lease,
        }),
        DecideOutcome::Declined => json!({ "state": "declined" }),
        DecideOutcome::AlreadyFinal(status) => json!({
            "state": "already_final",
            "final_status": status,
        }),
    };
    Ok(HttpResponse::Ok().json(response))
}

#[derive(Serialize)]
struct RequestStateJson {
    #[serde(flatten)]
    view: RequestView,
    requester_name: Option<String>,
    holder_name: Option<String>,
}

#[get("/api/transfer_locks.request_state")]
pub async fn request_state(
    session: Session,
    query: web::Query<ResourceQuery>,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    let user = http::get_session_user(&session)?;
    let resource_id = parse_resource_id(&query.resource_id)?;
    let view = service.handover.request_state(&resource_id, user.id).await?;
    let requester_name = match view.requester_id {
        Some(id) => service.users.display_name(id).await,
        None => None,
    };
    let holder_name = match view.holder_id {
        Some(id) => service.users.display_name(id).await,
        None => None,
    };
    Ok(HttpResponse::Ok().json(RequestStateJson {
        view,
        requester_name,
        holder_name,
    }))
}

#[get("/api/transfer_locks.pending_requests")]
pub async fn pending_requests(
    session: Session,
    query: web::Query<ResourceQuery>,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    let user = http::get_session_user(&session)?;
    let resource_id = parse_resource_id(&query.resource_id)?;
    let requests = service
        .handover
        .pending_requests_for_holder(&resource_id, user.id)
        .await?;
    let now = service.leases.now();
    let mut entries = Vec::with_capacity(requests.len());
    for request in requests {
        entries.push(json!({
            "request_id": request.id,
            "requester_id": request.requester_id,
            "requester_name": service.users.display_name(request.requester_id).await,
            "requested_at": date_time_iso_str(&request.requested_at),
            "decision_deadline": date_time_iso_str(&request.decision_deadline),
            "seconds_remaining": seconds_until(&now, &request.decision_deadline),
        }));
    }
    Ok(HttpResponse::Ok().json(json!({ "requests": entries })))
}

#[get("/api/transfer_locks.audit")]
pub async fn audit(
    session: Session,
    query: web::Query<ResourceQuery>,
    service: web::Data<BackendService>,
) -> actix_web::Result<HttpResponse> {
    http::get_session_user(&session)?;
    let resource_id = parse_resource_id(&query.resource_id)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_AUDIT_LIMIT)
        .max(1)
        .min(MAX_AUDIT_LIMIT);
    let events = service
        .audit
        .history(&resource_id, limit)
        .await
        .map_err(LockError::from)?;
    Ok(HttpResponse::Ok().json(json!({ "events": events })))
}
