pub mod admin;
pub mod availability;
pub mod conversations;
pub mod health;
pub mod me;
pub mod receipts;
pub mod reviews;
pub mod service_requests;
pub mod technicians;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, patch, post, put},
    Router,
};
use std::sync::Arc;

use crate::app::AppState;
use crate::config::Settings;
use crate::domain::attachments::MAX_FILES_PER_UPLOAD;

/// Room for multipart boundaries and part headers
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build the API router with all routes
pub fn api_router(settings: &Settings) -> Router<Arc<AppState>> {
    let upload_limit = settings.receipt_max_bytes * MAX_FILES_PER_UPLOAD + MULTIPART_OVERHEAD;

    Router::new()
        // Public routes
        .route("/health", get(health::health_check))
        // Protected routes
        .route("/me", get(me::get_me))
        // Technician directory
        .route("/technicians", get(technicians::list_technicians))
        .route(
            "/technicians/:technician_id/availability",
            get(availability::get_availability),
        )
        .route("/technician/availability", put(availability::set_availability))
        .route("/technicians/:technician_id/review", put(reviews::upsert_review))
        .route("/technicians/:technician_id/reviews", get(reviews::list_reviews))
        .route(
            "/technicians/:technician_id/reviews/summary",
            get(reviews::review_summary),
        )
        // Conversations and messages
        .route(
            "/conversations",
            post(conversations::start_conversation).get(conversations::list_conversations),
        )
        .route(
            "/conversations/:conversation_id/messages",
            get(conversations::list_messages).post(conversations::send_message),
        )
        .route(
            "/conversations/:conversation_id/typing",
            post(conversations::typing),
        )
        .route(
            "/conversations/:conversation_id/read",
            post(conversations::mark_read),
        )
        .route(
            "/conversations/:conversation_id/events",
            get(conversations::conversation_events),
        )
        .route(
            "/conversations/:conversation_id/service-requests",
            get(service_requests::list_conversation_requests),
        )
        .route("/messages/unread-count", get(conversations::unread_count))
        // Service requests
        .route(
            "/customer/service-requests",
            post(service_requests::create_customer_request),
        )
        .route(
            "/service-requests",
            get(service_requests::list_service_requests),
        )
        .route(
            "/service-requests/:id",
            get(service_requests::get_service_request),
        )
        .route(
            "/service-requests/:id/edit-details",
            patch(service_requests::edit_details),
        )
        .route(
            "/service-requests/:id/approve",
            patch(service_requests::approve),
        )
        .route(
            "/service-requests/:id/cancel",
            patch(service_requests::cancel),
        )
        .route(
            "/service-requests/:id/receipt",
            patch(service_requests::update_receipt),
        )
        .route(
            "/service-requests/:id/status",
            patch(service_requests::update_status),
        )
        .route(
            "/service-requests/:id/complete",
            patch(service_requests::complete),
        )
        .route(
            "/service-requests/:id/customer-payment",
            patch(service_requests::record_customer_payment),
        )
        .route(
            "/service-requests/:id/booking-fee/pay",
            post(service_requests::pay_booking_fee),
        )
        .route(
            "/service-requests/:id/receipts",
            post(receipts::upload_receipts)
                .delete(receipts::remove_receipt)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/storage/receipts/:id/:file_name",
            get(receipts::download_receipt),
        )
        // Admin
        .route(
            "/admin/service-requests",
            get(admin::list_service_requests),
        )
        .route(
            "/admin/service-requests/:id/booking-fee/mark-received",
            post(admin::mark_booking_fee_received),
        )
        .route(
            "/admin/booking-fees/outstanding",
            get(admin::outstanding_booking_fees),
        )
}
