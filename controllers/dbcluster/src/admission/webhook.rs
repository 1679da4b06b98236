//! Admission webhook handlers
//!
//! `POST /admission/mutate` answers with the defaulting patch,
//! `POST /admission/validate` with the verdict only. Both deny with the
//! rejection reason.

use super::admit;
use crate::metrics::Metrics;
use axum::extract::State;
use axum::Json;
use crds::DbCluster;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Shared state of the webhook endpoints.
#[derive(Debug, Clone)]
pub struct WebhookState {
    pub metrics: Arc<Metrics>,
}

fn request_of(
    body: AdmissionReview<DbCluster>,
) -> Result<AdmissionRequest<DbCluster>, AdmissionReview<DynamicObject>> {
    body.try_into().map_err(|e: kube::core::admission::ConvertAdmissionReviewError| {
        error!(error = %e, "Failed to parse admission request");
        AdmissionResponse::invalid(e.to_string()).into_review()
    })
}

fn object_name(req: &AdmissionRequest<DbCluster>) -> String {
    format!("{}/{}", req.namespace.as_deref().unwrap_or_default(), req.name)
}

/// Handle mutating admission review for DbClusters
pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DbCluster>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req = match request_of(body) {
        Ok(req) => req,
        Err(review) => return Json(review),
    };

    let response = match admit(&req.operation, req.object.as_ref(), req.old_object.as_ref()) {
        Ok(None) => AdmissionResponse::from(&req),
        Ok(Some(patch)) => {
            debug!(object = %object_name(&req), ops = patch.0.len(), "Applying defaults");
            match AdmissionResponse::from(&req).with_patch(patch) {
                Ok(response) => response,
                Err(e) => {
                    error!(object = %object_name(&req), error = %e, "Failed to serialize patch");
                    AdmissionResponse::from(&req).deny(format!("patch serialization error: {}", e))
                }
            }
        }
        Err(rejection) => {
            info!(object = %object_name(&req), reason = %rejection, "Denying DbCluster");
            AdmissionResponse::from(&req).deny(rejection.to_string())
        }
    };
    state.metrics.observe_admission("mutate", response.allowed);
    Json(response.into_review())
}

/// Handle validating admission review for DbClusters
pub async fn validate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DbCluster>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req = match request_of(body) {
        Ok(req) => req,
        Err(review) => return Json(review),
    };

    let response = match admit(&req.operation, req.object.as_ref(), req.old_object.as_ref()) {
        Ok(_) => AdmissionResponse::from(&req),
        Err(rejection) => {
            info!(object = %object_name(&req), reason = %rejection, "Rejecting DbCluster");
            AdmissionResponse::from(&req).deny(rejection.to_string())
        }
    };
    state.metrics.observe_admission("validate", response.allowed);
    Json(response.into_review())
}
