//! Service request workflow engine
//!
//! A repair job moves through:
//!
//! ```text
//! pending -> awaiting_quote_approval -> confirmed -> in_progress -> completed
//!     \______________________\______________\____________\-> cancelled
//! ```
//!
//! Booking-fee and customer-payment sub-states ride alongside. All rules live
//! here as pure functions over [`ServiceRequest`]; handlers load a row, call
//! one operation with the caller's [`Principal`], and persist the result.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::attachments::{self, ReceiptAttachment, MAX_FILES_PER_UPLOAD};
use super::errors::{WorkflowError, WorkflowResult};
use super::principal::{Principal, Role};
use super::receipts::{
    money, receipt_total, validate_priced_items, validate_requested_items, BookingFeeTable,
    ComplexityTier, LineItem, LineItemInput,
};

/// Payment method recorded when an admin confirms a fee without naming one
pub const ADMIN_MANUAL_METHOD: &str = "admin_manual";

const MAX_NOTES_LEN: usize = 2000;
const MAX_METHOD_LEN: usize = 50;
const MAX_REFERENCE_LEN: usize = 120;

// ============================================================================
// Status types
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ServiceRequestStatus {
    Pending,
    AwaitingQuoteApproval,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
}

impl ServiceRequestStatus {
    /// Statuses that count toward the one-active-request-per-conversation rule
    pub const ACTIVE: [ServiceRequestStatus; 4] = [
        ServiceRequestStatus::Pending,
        ServiceRequestStatus::AwaitingQuoteApproval,
        ServiceRequestStatus::Confirmed,
        ServiceRequestStatus::InProgress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::AwaitingQuoteApproval => "awaiting_quote_approval",
            Self::Confirmed => "confirmed",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "awaiting_quote_approval" => Some(Self::AwaitingQuoteApproval),
            "confirmed" => Some(Self::Confirmed),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for ServiceRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BookingFeeStatus {
    #[default]
    Unpaid,
    Paid,
}

impl BookingFeeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unpaid => "unpaid",
            Self::Paid => "paid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unpaid" => Some(Self::Unpaid),
            "paid" => Some(Self::Paid),
            _ => None,
        }
    }
}

/// What the customer has paid the technician for the job itself
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CustomerPaymentStatus {
    #[default]
    Unpaid,
    Paid,
    Partial,
}

impl CustomerPaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unpaid => "unpaid",
            Self::Paid => "paid",
            Self::Partial => "partial",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unpaid" => Some(Self::Unpaid),
            "paid" => Some(Self::Paid),
            "partial" => Some(Self::Partial),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CustomerPaymentMethod {
    Cash,
    OnlineGateway,
    Other,
}

impl CustomerPaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::OnlineGateway => "online_gateway",
            Self::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cash" => Some(Self::Cash),
            "online_gateway" => Some(Self::OnlineGateway),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

// ============================================================================
// Transition table
// ============================================================================

/// Status-changing actions understood by [`next_status`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowAction {
    /// Technician prices (or re-prices) the job
    SubmitQuote,
    /// Customer accepts the quote
    Approve,
    /// Technician's generic status update
    SetStatus(ServiceRequestStatus),
    /// Technician marks the job done
    Complete,
    /// Customer withdraws before work is confirmed
    Cancel,
    /// Customer payment recorded as fully paid
    CustomerPaid,
}

impl WorkflowAction {
    fn verb(&self) -> &'static str {
        match self {
            Self::SubmitQuote => "quote",
            Self::Approve => "approve",
            Self::SetStatus(_) => "update",
            Self::Complete => "complete",
            Self::Cancel => "cancel",
            Self::CustomerPaid => "record payment on",
        }
    }
}

/// Resolve the status an action leads to from `current`.
pub fn next_status(
    current: ServiceRequestStatus,
    action: WorkflowAction,
) -> WorkflowResult<ServiceRequestStatus> {
    use ServiceRequestStatus::*;

    let next = match (action, current) {
        (WorkflowAction::SubmitQuote, Pending | AwaitingQuoteApproval) => AwaitingQuoteApproval,
        (WorkflowAction::Approve, AwaitingQuoteApproval) => Confirmed,
        (WorkflowAction::SetStatus(target), _) if !is_manual_target(target) => {
            return Err(WorkflowError::invalid(
                "status",
                format!("Status cannot be set to {} directly", target),
            ))
        }
        (WorkflowAction::SetStatus(target), Pending | Confirmed | InProgress | Completed) => target,
        (WorkflowAction::Complete, Confirmed | InProgress | Completed) => Completed,
        (WorkflowAction::Cancel, Pending | AwaitingQuoteApproval) => Cancelled,
        (WorkflowAction::CustomerPaid, Pending) => Confirmed,
        (WorkflowAction::CustomerPaid, other) => other,
        (action, from) => {
            return Err(WorkflowError::InvalidTransition {
                from,
                action: action.verb(),
            })
        }
    };

    Ok(next)
}

fn is_manual_target(status: ServiceRequestStatus) -> bool {
    use ServiceRequestStatus::*;
    matches!(status, Pending | Confirmed | InProgress | Cancelled)
}

// ============================================================================
// Inputs
// ============================================================================

/// The conversation a new request is opened in
#[derive(Debug, Clone, Copy)]
pub struct ConversationParties {
    pub conversation_id: Uuid,
    pub customer_id: Uuid,
    pub technician_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateServiceRequestInput {
    pub conversation_id: Uuid,
    #[serde(default)]
    pub items: Vec<LineItemInput>,
    #[serde(default)]
    pub customer_notes: Option<String>,
    #[serde(default)]
    pub service_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EditDetailsInput {
    #[serde(default)]
    pub items: Vec<LineItemInput>,
    #[serde(default)]
    pub booking_fee_complexity: Option<ComplexityTier>,
    #[serde(default)]
    pub technician_notes: Option<String>,
    #[serde(default)]
    pub receipt_notes: Option<String>,
    #[serde(default)]
    pub service_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateReceiptInput {
    #[serde(default)]
    pub items: Vec<LineItemInput>,
    #[serde(default)]
    pub receipt_notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateStatusInput {
    pub status: ServiceRequestStatus,
    #[serde(default)]
    pub technician_notes: Option<String>,
    #[serde(default)]
    pub service_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomerPaymentInput {
    pub customer_payment_status: CustomerPaymentStatus,
    #[serde(default)]
    pub customer_payment_method: Option<CustomerPaymentMethod>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookingFeePaymentInput {
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
}

// ============================================================================
// Entity
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRequest {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub customer_id: Uuid,
    pub technician_id: Uuid,
    pub status: ServiceRequestStatus,
    pub items: Vec<LineItem>,
    pub receipt_total: Decimal,
    pub amount: Decimal,
    pub vat_amount: Decimal,
    pub booking_fee_complexity: Option<ComplexityTier>,
    pub booking_fee_total: Option<Decimal>,
    pub booking_fee_status: BookingFeeStatus,
    pub booking_fee_paid_at: Option<DateTime<Utc>>,
    pub booking_fee_payment_method: Option<String>,
    pub booking_fee_reference: Option<String>,
    pub customer_payment_status: CustomerPaymentStatus,
    pub customer_payment_method: Option<CustomerPaymentMethod>,
    pub receipt_attachments: Vec<ReceiptAttachment>,
    pub customer_notes: Option<String>,
    pub technician_notes: Option<String>,
    pub receipt_notes: Option<String>,
    pub service_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ServiceRequest {
    /// Customer opens a new request in a conversation.
    ///
    /// `has_active_request` comes from the store; the partial unique index
    /// remains the final guard against concurrent creation.
    pub fn open(
        principal: &Principal,
        parties: ConversationParties,
        input: CreateServiceRequestInput,
        has_active_request: bool,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Self> {
        if principal.role != Role::Customer || principal.id != parties.customer_id {
            return Err(WorkflowError::Forbidden(
                "Only the customer of this conversation can request a service".to_string(),
            ));
        }
        if has_active_request {
            return Err(WorkflowError::ActiveRequestExists);
        }

        let items = validate_requested_items(&input.items)?;
        let total = receipt_total(&items);

        Ok(Self {
            id: Uuid::new_v4(),
            conversation_id: parties.conversation_id,
            customer_id: parties.customer_id,
            technician_id: parties.technician_id,
            status: ServiceRequestStatus::Pending,
            items,
            receipt_total: total,
            amount: total,
            vat_amount: money(Decimal::ZERO),
            booking_fee_complexity: None,
            booking_fee_total: None,
            booking_fee_status: BookingFeeStatus::Unpaid,
            booking_fee_paid_at: None,
            booking_fee_payment_method: None,
            booking_fee_reference: None,
            customer_payment_status: CustomerPaymentStatus::Unpaid,
            customer_payment_method: None,
            receipt_attachments: Vec::new(),
            customer_notes: clean_notes("customer_notes", input.customer_notes)?,
            technician_notes: None,
            receipt_notes: None,
            service_date: input.service_date,
            created_at: now,
            updated_at: now,
            completed_at: None,
        })
    }

    // ------------------------------------------------------------------------
    // Authorization
    // ------------------------------------------------------------------------

    pub fn is_customer(&self, principal: &Principal) -> bool {
        principal.role == Role::Customer && principal.id == self.customer_id
    }

    pub fn is_technician(&self, principal: &Principal) -> bool {
        principal.role == Role::Technician && principal.id == self.technician_id
    }

    pub fn is_participant(&self, principal: &Principal) -> bool {
        self.is_customer(principal) || self.is_technician(principal)
    }

    fn require_customer(&self, principal: &Principal) -> WorkflowResult<()> {
        if self.is_customer(principal) {
            Ok(())
        } else {
            Err(WorkflowError::Forbidden(
                "Only the customer of this service request can do this".to_string(),
            ))
        }
    }

    fn require_technician(&self, principal: &Principal) -> WorkflowResult<()> {
        if self.is_technician(principal) {
            Ok(())
        } else {
            Err(WorkflowError::Forbidden(
                "Only the assigned technician can do this".to_string(),
            ))
        }
    }

    /// Participants and admins may view a request
    pub fn ensure_visible_to(&self, principal: &Principal) -> WorkflowResult<()> {
        if principal.is_admin() || self.is_participant(principal) {
            Ok(())
        } else {
            Err(WorkflowError::Forbidden(
                "You don't have access to this service request".to_string(),
            ))
        }
    }

    // ------------------------------------------------------------------------
    // Quote flow
    // ------------------------------------------------------------------------

    /// Technician prices the job; moves to `awaiting_quote_approval`.
    ///
    /// A request confirmed by customer payment before it was ever quoted can
    /// still be priced once. It keeps its status so the booking fee can be
    /// settled and the job completed.
    pub fn edit_details(
        &mut self,
        principal: &Principal,
        input: EditDetailsInput,
        fees: &BookingFeeTable,
        now: DateTime<Utc>,
    ) -> WorkflowResult<()> {
        use ServiceRequestStatus::*;

        self.require_technician(principal)?;
        let next = match self.status {
            Confirmed | InProgress if self.booking_fee_total.is_none() => self.status,
            current => next_status(current, WorkflowAction::SubmitQuote)?,
        };

        let items = validate_priced_items(&input.items)?;
        let total = receipt_total(&items);
        if total <= Decimal::ZERO {
            return Err(WorkflowError::NonPositiveTotal);
        }
        let complexity = input.booking_fee_complexity.ok_or_else(|| {
            WorkflowError::invalid("booking_fee_complexity", "A complexity tier is required")
        })?;
        let booking_fee = fees.fee_for(complexity);
        // A settled fee covers exactly the amount that was quoted
        if self.booking_fee_status == BookingFeeStatus::Paid
            && self.booking_fee_total != Some(booking_fee)
        {
            return Err(WorkflowError::BookingFeeAlreadyPaid);
        }
        let technician_notes = clean_notes("technician_notes", input.technician_notes)?;
        let receipt_notes = clean_notes("receipt_notes", input.receipt_notes)?;

        self.set_items(items);
        self.booking_fee_complexity = Some(complexity);
        self.booking_fee_total = Some(booking_fee);
        if technician_notes.is_some() {
            self.technician_notes = technician_notes;
        }
        if receipt_notes.is_some() {
            self.receipt_notes = receipt_notes;
        }
        if input.service_date.is_some() {
            self.service_date = input.service_date;
        }
        self.transition_to(next, now);
        Ok(())
    }

    /// Customer accepts the quote. The booking fee stays unpaid until a
    /// technician or admin records it.
    pub fn approve(&mut self, principal: &Principal, now: DateTime<Utc>) -> WorkflowResult<()> {
        self.require_customer(principal)?;
        let next = next_status(self.status, WorkflowAction::Approve)?;
        self.transition_to(next, now);
        Ok(())
    }

    /// Customer withdraws a request that has not been confirmed yet.
    pub fn cancel(&mut self, principal: &Principal, now: DateTime<Utc>) -> WorkflowResult<()> {
        self.require_customer(principal)?;
        let next = next_status(self.status, WorkflowAction::Cancel)?;
        self.transition_to(next, now);
        Ok(())
    }

    /// Technician replaces the final receipt once work is confirmed.
    pub fn update_receipt(
        &mut self,
        principal: &Principal,
        input: UpdateReceiptInput,
        now: DateTime<Utc>,
    ) -> WorkflowResult<()> {
        use ServiceRequestStatus::*;

        self.require_technician(principal)?;
        if !matches!(self.status, Confirmed | InProgress | Completed) {
            return Err(WorkflowError::InvalidTransition {
                from: self.status,
                action: "update the receipt of",
            });
        }

        let items = validate_priced_items(&input.items)?;
        let receipt_notes = clean_notes("receipt_notes", input.receipt_notes)?;

        self.set_items(items);
        if receipt_notes.is_some() {
            self.receipt_notes = receipt_notes;
        }
        self.updated_at = now;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------------

    /// Technician's generic status update used by manual flows.
    pub fn update_status(
        &mut self,
        principal: &Principal,
        input: UpdateStatusInput,
        now: DateTime<Utc>,
    ) -> WorkflowResult<()> {
        self.require_technician(principal)?;
        let next = next_status(self.status, WorkflowAction::SetStatus(input.status))?;
        let technician_notes = clean_notes("technician_notes", input.technician_notes)?;

        if technician_notes.is_some() {
            self.technician_notes = technician_notes;
        }
        if input.service_date.is_some() {
            self.service_date = input.service_date;
        }
        self.transition_to(next, now);
        Ok(())
    }

    /// Technician marks the job complete. Requires a paid booking fee.
    pub fn complete(&mut self, principal: &Principal, now: DateTime<Utc>) -> WorkflowResult<()> {
        self.require_technician(principal)?;
        let next = next_status(self.status, WorkflowAction::Complete)?;
        if self.booking_fee_status != BookingFeeStatus::Paid {
            return Err(WorkflowError::BookingFeeUnpaid);
        }
        self.transition_to(next, now);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Payments
    // ------------------------------------------------------------------------

    /// Technician reports having paid the platform booking fee.
    pub fn pay_booking_fee(
        &mut self,
        principal: &Principal,
        input: BookingFeePaymentInput,
        now: DateTime<Utc>,
    ) -> WorkflowResult<()> {
        self.require_technician(principal)?;
        let method = clean_short("method", input.method, MAX_METHOD_LEN)?
            .ok_or_else(|| WorkflowError::invalid("method", "A payment method is required"))?;
        let reference = clean_short("reference", input.reference, MAX_REFERENCE_LEN)?;
        self.mark_booking_fee_paid(method, reference, now)
    }

    /// Admin confirms the booking fee was received out of band.
    pub fn mark_booking_fee_received(
        &mut self,
        principal: &Principal,
        input: BookingFeePaymentInput,
        now: DateTime<Utc>,
    ) -> WorkflowResult<()> {
        if !principal.is_admin() {
            return Err(WorkflowError::Forbidden(
                "Only admins can confirm booking fee receipt".to_string(),
            ));
        }
        let method = clean_short("method", input.method, MAX_METHOD_LEN)?
            .unwrap_or_else(|| ADMIN_MANUAL_METHOD.to_string());
        let reference = clean_short("reference", input.reference, MAX_REFERENCE_LEN)?;
        self.mark_booking_fee_paid(method, reference, now)
    }

    fn mark_booking_fee_paid(
        &mut self,
        method: String,
        reference: Option<String>,
        now: DateTime<Utc>,
    ) -> WorkflowResult<()> {
        if self.booking_fee_total.is_none() {
            return Err(WorkflowError::BookingFeeNotQuoted);
        }
        if self.booking_fee_status == BookingFeeStatus::Paid {
            return Err(WorkflowError::BookingFeeAlreadyPaid);
        }
        self.booking_fee_status = BookingFeeStatus::Paid;
        self.booking_fee_paid_at = Some(now);
        self.booking_fee_payment_method = Some(method);
        self.booking_fee_reference = reference;
        self.updated_at = now;
        Ok(())
    }

    /// Technician records what the customer has paid for the job.
    ///
    /// A full payment on a `pending` request confirms it.
    pub fn record_customer_payment(
        &mut self,
        principal: &Principal,
        input: CustomerPaymentInput,
        now: DateTime<Utc>,
    ) -> WorkflowResult<()> {
        self.require_technician(principal)?;

        if input.customer_payment_status == CustomerPaymentStatus::Paid {
            let next = next_status(self.status, WorkflowAction::CustomerPaid)?;
            self.transition_to(next, now);
        }
        self.customer_payment_status = input.customer_payment_status;
        if input.customer_payment_method.is_some() {
            self.customer_payment_method = input.customer_payment_method;
        }
        self.updated_at = now;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Receipt attachments
    // ------------------------------------------------------------------------

    /// Check that `principal` may upload `count` files before anything is stored.
    pub fn ensure_can_upload(&self, principal: &Principal, count: usize) -> WorkflowResult<()> {
        if !principal.is_admin() && !self.is_participant(principal) {
            return Err(WorkflowError::Forbidden(
                "You are not part of this service request".to_string(),
            ));
        }
        if count == 0 {
            return Err(WorkflowError::invalid(
                "receipts",
                "At least one receipt file is required",
            ));
        }
        if count > MAX_FILES_PER_UPLOAD {
            return Err(WorkflowError::TooManyAttachments {
                max: MAX_FILES_PER_UPLOAD,
            });
        }
        Ok(())
    }

    pub fn add_receipts(
        &mut self,
        principal: &Principal,
        paths: Vec<String>,
        now: DateTime<Utc>,
    ) -> WorkflowResult<()> {
        self.ensure_can_upload(principal, paths.len())?;
        self.receipt_attachments.extend(
            paths
                .into_iter()
                .map(|path| ReceiptAttachment::new(path, principal, now)),
        );
        self.updated_at = now;
        Ok(())
    }

    /// The attachment stored at `path`, if `principal` may see this request
    pub fn find_receipt(
        &self,
        principal: &Principal,
        path: &str,
    ) -> WorkflowResult<&ReceiptAttachment> {
        self.ensure_visible_to(principal)?;
        self.receipt_attachments
            .iter()
            .find(|attachment| attachment.matches_path(path))
            .ok_or_else(|| WorkflowError::NotFound("Receipt attachment not found".to_string()))
    }

    /// Remove the attachment stored at `path`, returning it so the caller can
    /// delete the underlying file.
    pub fn remove_receipt(
        &mut self,
        principal: &Principal,
        path: &str,
        now: DateTime<Utc>,
    ) -> WorkflowResult<ReceiptAttachment> {
        if !principal.is_admin() && !self.is_participant(principal) {
            return Err(WorkflowError::Forbidden(
                "You are not part of this service request".to_string(),
            ));
        }
        let index = self
            .receipt_attachments
            .iter()
            .position(|attachment| attachment.matches_path(path))
            .ok_or_else(|| WorkflowError::NotFound("Receipt attachment not found".to_string()))?;

        attachments::ensure_can_remove(
            principal,
            self.is_participant(principal),
            &self.receipt_attachments[index],
        )?;

        let removed = self.receipt_attachments.remove(index);
        self.updated_at = now;
        Ok(removed)
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn set_items(&mut self, items: Vec<LineItem>) {
        let total = receipt_total(&items);
        self.items = items;
        self.receipt_total = total;
        self.amount = total;
    }

    fn transition_to(&mut self, next: ServiceRequestStatus, now: DateTime<Utc>) {
        if next == ServiceRequestStatus::Completed {
            self.completed_at = Some(now);
        } else {
            self.completed_at = None;
        }
        self.status = next;
        self.updated_at = now;
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Receipt attachment as returned to clients
#[derive(Debug, Clone, Serialize)]
pub struct AttachmentResponse {
    pub path: String,
    pub url: Option<String>,
    pub uploaded_by_type: Role,
    pub uploaded_by_id: Option<Uuid>,
    pub uploaded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LineItemResponse {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

/// Service request with customer and technician names joined in
#[derive(Debug, Clone, Serialize)]
pub struct ServiceRequestResponse {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub technician_id: Uuid,
    pub technician_name: String,
    pub status: ServiceRequestStatus,
    pub items: Vec<LineItemResponse>,
    pub receipt_total: Decimal,
    pub amount: Decimal,
    pub vat_amount: Decimal,
    pub booking_fee_complexity: Option<ComplexityTier>,
    pub booking_fee_total: Option<Decimal>,
    pub booking_fee_status: BookingFeeStatus,
    pub booking_fee_paid_at: Option<DateTime<Utc>>,
    pub booking_fee_payment_method: Option<String>,
    pub booking_fee_reference: Option<String>,
    pub customer_payment_status: CustomerPaymentStatus,
    pub customer_payment_method: Option<CustomerPaymentMethod>,
    pub receipt_attachments: Vec<AttachmentResponse>,
    pub customer_notes: Option<String>,
    pub technician_notes: Option<String>,
    pub receipt_notes: Option<String>,
    pub service_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ServiceRequestResponse {
    /// `public_url` turns a stored attachment path into a client URL.
    pub fn new(
        sr: ServiceRequest,
        customer_name: String,
        technician_name: String,
        public_url: impl Fn(&str) -> Option<String>,
    ) -> Self {
        Self {
            id: sr.id,
            conversation_id: sr.conversation_id,
            customer_id: sr.customer_id,
            customer_name,
            technician_id: sr.technician_id,
            technician_name,
            status: sr.status,
            items: sr
                .items
                .into_iter()
                .map(|item| LineItemResponse {
                    line_total: item.line_total(),
                    description: item.description,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                })
                .collect(),
            receipt_total: sr.receipt_total,
            amount: sr.amount,
            vat_amount: sr.vat_amount,
            booking_fee_complexity: sr.booking_fee_complexity,
            booking_fee_total: sr.booking_fee_total,
            booking_fee_status: sr.booking_fee_status,
            booking_fee_paid_at: sr.booking_fee_paid_at,
            booking_fee_payment_method: sr.booking_fee_payment_method,
            booking_fee_reference: sr.booking_fee_reference,
            customer_payment_status: sr.customer_payment_status,
            customer_payment_method: sr.customer_payment_method,
            receipt_attachments: sr
                .receipt_attachments
                .into_iter()
                .map(|a| AttachmentResponse {
                    url: public_url(&a.path),
                    uploaded_by_type: a.effective_uploader_role(),
                    uploaded_by_id: a.uploaded_by_id,
                    uploaded_at: a.uploaded_at,
                    path: a.path,
                })
                .collect(),
            customer_notes: sr.customer_notes,
            technician_notes: sr.technician_notes,
            receipt_notes: sr.receipt_notes,
            service_date: sr.service_date,
            created_at: sr.created_at,
            updated_at: sr.updated_at,
            completed_at: sr.completed_at,
        }
    }
}

/// Query string shared by the listing endpoints
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceRequestFilter {
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub per_page: Option<u32>,
    #[serde(default)]
    pub status: Option<ServiceRequestStatus>,
    #[serde(default)]
    pub payment_status: Option<CustomerPaymentStatus>,
    #[serde(default)]
    pub outstanding_fees: Option<bool>,
    #[serde(default)]
    pub technician_id: Option<Uuid>,
}

/// Outstanding booking fees owed by one technician
#[derive(Debug, Clone, Serialize)]
pub struct OutstandingFeeSummary {
    pub technician_id: Uuid,
    pub technician_name: String,
    pub request_count: i64,
    pub total_outstanding: Decimal,
}

fn clean_notes(field: &str, notes: Option<String>) -> WorkflowResult<Option<String>> {
    clean_short(field, notes, MAX_NOTES_LEN)
}

fn clean_short(field: &str, value: Option<String>, max: usize) -> WorkflowResult<Option<String>> {
    let Some(value) = value else {
        return Ok(None);
    };
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.chars().count() > max {
        return Err(WorkflowError::invalid(
            field,
            format!("{} may not exceed {} characters", field, max),
        ));
    }
    Ok(Some(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    struct Fixture {
        customer: Principal,
        technician: Principal,
        admin: Principal,
        parties: ConversationParties,
    }

    fn fixture() -> Fixture {
        let customer = Principal::customer(Uuid::new_v4());
        let technician = Principal::technician(Uuid::new_v4());
        Fixture {
            customer,
            technician,
            admin: Principal::admin(Uuid::new_v4()),
            parties: ConversationParties {
                conversation_id: Uuid::new_v4(),
                customer_id: customer.id,
                technician_id: technician.id,
            },
        }
    }

    fn requested(description: &str, quantity: i64) -> LineItemInput {
        LineItemInput {
            description: Some(description.to_string()),
            quantity: Some(Decimal::from(quantity)),
            unit_price: None,
        }
    }

    fn priced(description: &str, quantity: i64, unit_price: i64) -> LineItemInput {
        LineItemInput {
            description: Some(description.to_string()),
            quantity: Some(Decimal::from(quantity)),
            unit_price: Some(Decimal::from(unit_price)),
        }
    }

    fn open_request(f: &Fixture) -> ServiceRequest {
        ServiceRequest::open(
            &f.customer,
            f.parties,
            CreateServiceRequestInput {
                conversation_id: f.parties.conversation_id,
                items: vec![requested("Diagnose", 1)],
                customer_notes: Some("Laptop won't boot".into()),
                service_date: None,
            },
            false,
            Utc::now(),
        )
        .unwrap()
    }

    fn quote(complexity: ComplexityTier, items: Vec<LineItemInput>) -> EditDetailsInput {
        EditDetailsInput {
            items,
            booking_fee_complexity: Some(complexity),
            technician_notes: None,
            receipt_notes: None,
            service_date: None,
        }
    }

    fn status(target: ServiceRequestStatus) -> UpdateStatusInput {
        UpdateStatusInput {
            status: target,
            technician_notes: None,
            service_date: None,
        }
    }

    fn confirmed_request(f: &Fixture) -> ServiceRequest {
        let mut sr = open_request(f);
        let fees = BookingFeeTable::default();
        sr.edit_details(
            &f.technician,
            quote(ComplexityTier::Standard, vec![priced("Diagnose", 1, 50)]),
            &fees,
            Utc::now(),
        )
        .unwrap();
        sr.approve(&f.customer, Utc::now()).unwrap();
        sr
    }

    #[test]
    fn full_quote_to_completion_flow() {
        let f = fixture();
        let fees = BookingFeeTable::default();

        let mut sr = open_request(&f);
        assert_eq!(sr.status, ServiceRequestStatus::Pending);
        assert_eq!(sr.amount, Decimal::ZERO);

        sr.edit_details(
            &f.technician,
            quote(ComplexityTier::Standard, vec![priced("Diagnose", 1, 50)]),
            &fees,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(sr.status, ServiceRequestStatus::AwaitingQuoteApproval);
        assert_eq!(sr.amount.to_string(), "50.00");
        assert_eq!(sr.receipt_total, sr.amount);
        assert_eq!(sr.booking_fee_total.unwrap().to_string(), "20.00");

        sr.approve(&f.customer, Utc::now()).unwrap();
        assert_eq!(sr.status, ServiceRequestStatus::Confirmed);
        assert_eq!(sr.booking_fee_status, BookingFeeStatus::Unpaid);

        sr.mark_booking_fee_received(&f.admin, BookingFeePaymentInput::default(), Utc::now())
            .unwrap();
        assert_eq!(sr.booking_fee_status, BookingFeeStatus::Paid);
        assert_eq!(
            sr.booking_fee_payment_method.as_deref(),
            Some(ADMIN_MANUAL_METHOD)
        );
        assert!(sr.booking_fee_paid_at.is_some());

        sr.update_status(&f.technician, status(ServiceRequestStatus::InProgress), Utc::now())
            .unwrap();
        assert_eq!(sr.status, ServiceRequestStatus::InProgress);
        assert!(sr.completed_at.is_none());

        let done_at = Utc::now();
        sr.complete(&f.technician, done_at).unwrap();
        assert_eq!(sr.status, ServiceRequestStatus::Completed);
        assert_eq!(sr.completed_at, Some(done_at));
    }

    #[test]
    fn completion_requires_paid_booking_fee() {
        let f = fixture();
        let mut sr = confirmed_request(&f);
        sr.update_status(&f.technician, status(ServiceRequestStatus::InProgress), Utc::now())
            .unwrap();

        let err = sr.complete(&f.technician, Utc::now()).unwrap_err();
        assert_eq!(err, WorkflowError::BookingFeeUnpaid);
        assert_eq!(sr.status, ServiceRequestStatus::InProgress);
        assert!(sr.completed_at.is_none());
    }

    #[test]
    fn completion_rejected_from_wrong_status() {
        let f = fixture();
        let mut sr = open_request(&f);
        sr.booking_fee_status = BookingFeeStatus::Paid;
        let err = sr.complete(&f.technician, Utc::now()).unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
        assert_eq!(sr.status, ServiceRequestStatus::Pending);
    }

    #[test]
    fn cannot_open_second_active_request() {
        let f = fixture();
        let err = ServiceRequest::open(
            &f.customer,
            f.parties,
            CreateServiceRequestInput {
                conversation_id: f.parties.conversation_id,
                items: vec![requested("Diagnose", 1)],
                customer_notes: None,
                service_date: None,
            },
            true,
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err, WorkflowError::ActiveRequestExists);
    }

    #[test]
    fn only_the_conversation_customer_can_open() {
        let f = fixture();
        let stranger = Principal::customer(Uuid::new_v4());
        for principal in [stranger, f.technician] {
            let err = ServiceRequest::open(
                &principal,
                f.parties,
                CreateServiceRequestInput {
                    conversation_id: f.parties.conversation_id,
                    items: vec![requested("Diagnose", 1)],
                    customer_notes: None,
                    service_date: None,
                },
                false,
                Utc::now(),
            )
            .unwrap_err();
            assert!(matches!(err, WorkflowError::Forbidden(_)));
        }
    }

    #[test]
    fn quote_requires_positive_total_and_complexity() {
        let f = fixture();
        let fees = BookingFeeTable::default();
        let mut sr = open_request(&f);

        let err = sr
            .edit_details(
                &f.technician,
                quote(ComplexityTier::Simple, vec![priced("Diagnose", 1, 0)]),
                &fees,
                Utc::now(),
            )
            .unwrap_err();
        assert_eq!(err, WorkflowError::NonPositiveTotal);

        let mut no_tier = quote(ComplexityTier::Simple, vec![priced("Diagnose", 1, 30)]);
        no_tier.booking_fee_complexity = None;
        let err = sr
            .edit_details(&f.technician, no_tier, &fees, Utc::now())
            .unwrap_err();
        assert_eq!(err.field(), Some("booking_fee_complexity"));
        assert_eq!(sr.status, ServiceRequestStatus::Pending);
    }

    #[test]
    fn requote_recomputes_total_and_fee() {
        let f = fixture();
        let fees = BookingFeeTable::default();
        let mut sr = open_request(&f);

        sr.edit_details(
            &f.technician,
            quote(ComplexityTier::Simple, vec![priced("Diagnose", 1, 50)]),
            &fees,
            Utc::now(),
        )
        .unwrap();
        sr.edit_details(
            &f.technician,
            quote(
                ComplexityTier::Complex,
                vec![priced("Diagnose", 1, 50), priced("Fan", 2, 15)],
            ),
            &fees,
            Utc::now(),
        )
        .unwrap();

        assert_eq!(sr.status, ServiceRequestStatus::AwaitingQuoteApproval);
        assert_eq!(sr.receipt_total, Decimal::from(80));
        assert_eq!(sr.amount, sr.receipt_total);
        assert_eq!(sr.booking_fee_total, Some(Decimal::from(40)));
    }

    #[test]
    fn requote_cannot_change_a_paid_fee() {
        let f = fixture();
        let fees = BookingFeeTable::default();
        let mut sr = open_request(&f);
        sr.edit_details(
            &f.technician,
            quote(ComplexityTier::Simple, vec![priced("Diagnose", 1, 50)]),
            &fees,
            Utc::now(),
        )
        .unwrap();
        sr.mark_booking_fee_received(&f.admin, BookingFeePaymentInput::default(), Utc::now())
            .unwrap();

        let err = sr
            .edit_details(
                &f.technician,
                quote(ComplexityTier::Complex, vec![priced("Diagnose", 1, 90)]),
                &fees,
                Utc::now(),
            )
            .unwrap_err();
        assert_eq!(err, WorkflowError::BookingFeeAlreadyPaid);
        assert_eq!(sr.booking_fee_total, Some(Decimal::from(10)));
        assert_eq!(sr.booking_fee_complexity, Some(ComplexityTier::Simple));
        assert_eq!(sr.receipt_total, Decimal::from(50));

        // Same tier keeps the paid fee valid, so re-pricing the work is fine
        sr.edit_details(
            &f.technician,
            quote(ComplexityTier::Simple, vec![priced("Diagnose", 1, 70)]),
            &fees,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(sr.receipt_total, Decimal::from(70));
        assert_eq!(sr.booking_fee_status, BookingFeeStatus::Paid);
    }

    #[test]
    fn quote_rejected_once_confirmed() {
        let f = fixture();
        let mut sr = confirmed_request(&f);
        let err = sr
            .edit_details(
                &f.technician,
                quote(ComplexityTier::Simple, vec![priced("Diagnose", 1, 50)]),
                &BookingFeeTable::default(),
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::InvalidTransition {
                from: ServiceRequestStatus::Confirmed,
                ..
            }
        ));
    }

    #[test]
    fn approve_requires_awaiting_status_and_customer() {
        let f = fixture();
        let mut sr = open_request(&f);
        assert!(matches!(
            sr.approve(&f.customer, Utc::now()).unwrap_err(),
            WorkflowError::InvalidTransition { .. }
        ));

        sr.edit_details(
            &f.technician,
            quote(ComplexityTier::Simple, vec![priced("Diagnose", 1, 50)]),
            &BookingFeeTable::default(),
            Utc::now(),
        )
        .unwrap();
        assert!(matches!(
            sr.approve(&f.technician, Utc::now()).unwrap_err(),
            WorkflowError::Forbidden(_)
        ));
    }

    #[test]
    fn other_technicians_are_forbidden() {
        let f = fixture();
        let mut sr = confirmed_request(&f);
        let intruder = Principal::technician(Uuid::new_v4());
        let err = sr
            .update_status(&intruder, status(ServiceRequestStatus::InProgress), Utc::now())
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Forbidden(_)));
    }

    #[test]
    fn generic_status_update_rejects_protected_targets() {
        let f = fixture();
        let mut sr = confirmed_request(&f);
        for target in [
            ServiceRequestStatus::Completed,
            ServiceRequestStatus::AwaitingQuoteApproval,
        ] {
            let err = sr
                .update_status(&f.technician, status(target), Utc::now())
                .unwrap_err();
            assert_eq!(err.field(), Some("status"));
        }
        assert_eq!(sr.status, ServiceRequestStatus::Confirmed);
    }

    #[test]
    fn leaving_completed_clears_completed_at() {
        let f = fixture();
        let mut sr = confirmed_request(&f);
        sr.mark_booking_fee_received(&f.admin, BookingFeePaymentInput::default(), Utc::now())
            .unwrap();
        sr.complete(&f.technician, Utc::now()).unwrap();
        assert!(sr.completed_at.is_some());

        sr.update_status(&f.technician, status(ServiceRequestStatus::InProgress), Utc::now())
            .unwrap();
        assert!(sr.completed_at.is_none());
    }

    #[test]
    fn cancelled_is_terminal_for_status_updates() {
        let f = fixture();
        let mut sr = confirmed_request(&f);
        sr.update_status(&f.technician, status(ServiceRequestStatus::Cancelled), Utc::now())
            .unwrap();
        let err = sr
            .update_status(&f.technician, status(ServiceRequestStatus::Pending), Utc::now())
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
    }

    #[test]
    fn customer_can_cancel_before_confirmation_only() {
        let f = fixture();
        let mut sr = open_request(&f);
        sr.cancel(&f.customer, Utc::now()).unwrap();
        assert_eq!(sr.status, ServiceRequestStatus::Cancelled);
        assert!(!ServiceRequestStatus::ACTIVE.contains(&sr.status));

        let mut confirmed = confirmed_request(&f);
        assert!(confirmed.cancel(&f.customer, Utc::now()).is_err());
    }

    #[test]
    fn technician_fee_payment_needs_method_and_quote() {
        let f = fixture();
        let mut sr = open_request(&f);
        let input = BookingFeePaymentInput {
            method: Some("bank_transfer".into()),
            reference: Some("TX-991".into()),
        };
        assert_eq!(
            sr.pay_booking_fee(&f.technician, input.clone(), Utc::now())
                .unwrap_err(),
            WorkflowError::BookingFeeNotQuoted
        );

        let mut sr = confirmed_request(&f);
        let err = sr
            .pay_booking_fee(&f.technician, BookingFeePaymentInput::default(), Utc::now())
            .unwrap_err();
        assert_eq!(err.field(), Some("method"));

        sr.pay_booking_fee(&f.technician, input.clone(), Utc::now())
            .unwrap();
        assert_eq!(sr.booking_fee_status, BookingFeeStatus::Paid);
        assert_eq!(sr.booking_fee_reference.as_deref(), Some("TX-991"));

        assert_eq!(
            sr.pay_booking_fee(&f.technician, input, Utc::now())
                .unwrap_err(),
            WorkflowError::BookingFeeAlreadyPaid
        );
    }

    #[test]
    fn only_admins_mark_fee_received() {
        let f = fixture();
        let mut sr = confirmed_request(&f);
        let err = sr
            .mark_booking_fee_received(&f.technician, BookingFeePaymentInput::default(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Forbidden(_)));
    }

    #[test]
    fn booking_fee_follows_complexity_only() {
        let f = fixture();
        let fees = BookingFeeTable::new(Decimal::from(5), Decimal::from(15), Decimal::from(25));
        let mut sr = open_request(&f);
        sr.edit_details(
            &f.technician,
            quote(ComplexityTier::Complex, vec![priced("Board repair", 3, 100)]),
            &fees,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(sr.booking_fee_total, Some(Decimal::from(25)));
        assert_eq!(sr.receipt_total, Decimal::from(300));
    }

    #[test]
    fn customer_paid_confirms_pending_request() {
        let f = fixture();
        let mut sr = open_request(&f);
        sr.record_customer_payment(
            &f.technician,
            CustomerPaymentInput {
                customer_payment_status: CustomerPaymentStatus::Paid,
                customer_payment_method: Some(CustomerPaymentMethod::Cash),
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(sr.status, ServiceRequestStatus::Confirmed);
        assert_eq!(sr.customer_payment_status, CustomerPaymentStatus::Paid);
        assert_eq!(sr.customer_payment_method, Some(CustomerPaymentMethod::Cash));
    }

    #[test]
    fn request_confirmed_by_payment_can_still_be_completed() {
        let f = fixture();
        let fees = BookingFeeTable::default();
        let mut sr = open_request(&f);
        sr.record_customer_payment(
            &f.technician,
            CustomerPaymentInput {
                customer_payment_status: CustomerPaymentStatus::Paid,
                customer_payment_method: None,
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(sr.status, ServiceRequestStatus::Confirmed);
        assert_eq!(
            sr.mark_booking_fee_received(&f.admin, BookingFeePaymentInput::default(), Utc::now())
                .unwrap_err(),
            WorkflowError::BookingFeeNotQuoted
        );

        sr.edit_details(
            &f.technician,
            quote(ComplexityTier::Standard, vec![priced("Screen", 1, 120)]),
            &fees,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(sr.status, ServiceRequestStatus::Confirmed);
        assert_eq!(sr.booking_fee_total, Some(Decimal::from(20)));

        sr.mark_booking_fee_received(&f.admin, BookingFeePaymentInput::default(), Utc::now())
            .unwrap();
        sr.complete(&f.technician, Utc::now()).unwrap();
        assert_eq!(sr.status, ServiceRequestStatus::Completed);

        // Once quoted the normal rule applies again
        assert!(matches!(
            sr.edit_details(
                &f.technician,
                quote(ComplexityTier::Standard, vec![priced("Screen", 1, 120)]),
                &fees,
                Utc::now(),
            )
            .unwrap_err(),
            WorkflowError::InvalidTransition { .. }
        ));
    }

    #[test]
    fn partial_payment_leaves_status_alone() {
        let f = fixture();
        let mut sr = open_request(&f);
        sr.record_customer_payment(
            &f.technician,
            CustomerPaymentInput {
                customer_payment_status: CustomerPaymentStatus::Partial,
                customer_payment_method: None,
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(sr.status, ServiceRequestStatus::Pending);
        assert_eq!(sr.customer_payment_status, CustomerPaymentStatus::Partial);
    }

    #[test]
    fn update_receipt_recomputes_after_confirmation() {
        let f = fixture();
        let mut sr = confirmed_request(&f);
        sr.update_receipt(
            &f.technician,
            UpdateReceiptInput {
                items: vec![priced("Diagnose", 1, 50), priced("SSD", 1, 120)],
                receipt_notes: Some("Replaced drive".into()),
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(sr.receipt_total, Decimal::from(170));
        assert_eq!(sr.amount, Decimal::from(170));
        assert_eq!(sr.receipt_notes.as_deref(), Some("Replaced drive"));

        let mut pending = open_request(&f);
        assert!(pending
            .update_receipt(
                &f.technician,
                UpdateReceiptInput {
                    items: vec![priced("Diagnose", 1, 50)],
                    receipt_notes: None,
                },
                Utc::now(),
            )
            .is_err());
    }

    #[test]
    fn attachments_record_uploader_and_enforce_limits() {
        let f = fixture();
        let mut sr = open_request(&f);
        let now = Utc::now();

        sr.add_receipts(&f.customer, vec!["receipts/a.jpg".into()], now)
            .unwrap();
        let entry = &sr.receipt_attachments[0];
        assert_eq!(entry.uploaded_by_type, Some(Role::Customer));
        assert_eq!(entry.uploaded_by_id, Some(f.customer.id));
        assert_eq!(entry.uploaded_at, Some(now));

        let six = (0..6).map(|i| format!("receipts/{i}.jpg")).collect();
        assert_eq!(
            sr.add_receipts(&f.technician, six, now).unwrap_err(),
            WorkflowError::TooManyAttachments { max: 5 }
        );

        let stranger = Principal::customer(Uuid::new_v4());
        assert!(matches!(
            sr.add_receipts(&stranger, vec!["receipts/x.jpg".into()], now)
                .unwrap_err(),
            WorkflowError::Forbidden(_)
        ));
        assert!(sr
            .add_receipts(&f.admin, vec!["receipts/admin.pdf".into()], now)
            .is_ok());
    }

    #[test]
    fn attachment_removal_rules() {
        let f = fixture();
        let mut sr = open_request(&f);
        let now = Utc::now();
        sr.add_receipts(&f.technician, vec!["receipts/Tech.jpg".into()], now)
            .unwrap();
        sr.add_receipts(&f.customer, vec!["receipts/cust.jpg".into()], now)
            .unwrap();

        assert!(matches!(
            sr.remove_receipt(&f.admin, "receipts/tech.jpg", now)
                .unwrap_err(),
            WorkflowError::Forbidden(_)
        ));
        assert!(matches!(
            sr.remove_receipt(&f.technician, "receipts/cust.jpg", now)
                .unwrap_err(),
            WorkflowError::Forbidden(_)
        ));
        assert!(matches!(
            sr.remove_receipt(&f.customer, "receipts/missing.jpg", now)
                .unwrap_err(),
            WorkflowError::NotFound(_)
        ));
        // Outsiders learn nothing about which paths exist
        let stranger = Principal::customer(Uuid::new_v4());
        for path in ["receipts/missing.jpg", "receipts/cust.jpg"] {
            assert!(matches!(
                sr.remove_receipt(&stranger, path, now).unwrap_err(),
                WorkflowError::Forbidden(_)
            ));
        }
        assert_eq!(sr.receipt_attachments.len(), 2);

        let removed = sr
            .remove_receipt(&f.technician, "\\receipts\\TECH.jpg", now)
            .unwrap();
        assert_eq!(removed.path, "receipts/Tech.jpg");
        sr.remove_receipt(&f.admin, "receipts/cust.jpg", now)
            .unwrap();
        assert!(sr.receipt_attachments.is_empty());
    }

    #[test]
    fn receipt_lookup_requires_access_first() {
        let f = fixture();
        let mut sr = open_request(&f);
        sr.add_receipts(&f.customer, vec!["receipts/a/one.png".into()], Utc::now())
            .unwrap();

        assert_eq!(
            sr.find_receipt(&f.technician, "receipts/a/one.png")
                .unwrap()
                .uploaded_by_id,
            Some(f.customer.id)
        );
        assert!(sr.find_receipt(&f.admin, "receipts/a/one.png").is_ok());
        assert!(matches!(
            sr.find_receipt(&f.customer, "receipts/a/two.png").unwrap_err(),
            WorkflowError::NotFound(_)
        ));

        let outsider = Principal::technician(Uuid::new_v4());
        for path in ["receipts/a/one.png", "receipts/a/two.png"] {
            assert!(matches!(
                sr.find_receipt(&outsider, path).unwrap_err(),
                WorkflowError::Forbidden(_)
            ));
        }
    }

    #[test]
    fn visibility_limited_to_participants_and_admins() {
        let f = fixture();
        let sr = open_request(&f);
        assert!(sr.ensure_visible_to(&f.customer).is_ok());
        assert!(sr.ensure_visible_to(&f.technician).is_ok());
        assert!(sr.ensure_visible_to(&f.admin).is_ok());
        assert!(sr
            .ensure_visible_to(&Principal::technician(Uuid::new_v4()))
            .is_err());
    }

    #[test]
    fn transition_table_is_exhaustive_over_statuses() {
        use ServiceRequestStatus::*;
        let all = [
            Pending,
            AwaitingQuoteApproval,
            Confirmed,
            InProgress,
            Completed,
            Cancelled,
        ];
        for from in all {
            let approve = next_status(from, WorkflowAction::Approve);
            assert_eq!(approve.is_ok(), from == AwaitingQuoteApproval);

            let complete = next_status(from, WorkflowAction::Complete);
            assert_eq!(
                complete.is_ok(),
                matches!(from, Confirmed | InProgress | Completed)
            );

            // Customer payment never fails; it only promotes pending
            let paid = next_status(from, WorkflowAction::CustomerPaid).unwrap();
            assert_eq!(paid, if from == Pending { Confirmed } else { from });
        }
    }

    #[test]
    fn notes_are_trimmed_and_bounded() {
        assert_eq!(clean_notes("n", Some("  ".into())).unwrap(), None);
        assert_eq!(
            clean_notes("n", Some(" ok ".into())).unwrap().as_deref(),
            Some("ok")
        );
        assert!(clean_notes("n", Some("x".repeat(MAX_NOTES_LEN + 1))).is_err());
    }

    #[test]
    fn timestamps_move_forward_on_mutation() {
        let f = fixture();
        let mut sr = open_request(&f);
        let later = sr.created_at + Duration::minutes(5);
        sr.cancel(&f.customer, later).unwrap();
        assert_eq!(sr.updated_at, later);
        assert!(sr.completed_at.is_none());
    }
}
