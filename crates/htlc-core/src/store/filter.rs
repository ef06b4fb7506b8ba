//! Predicate combinators for payment listing.

use crate::models::{
    ConversionStatus, HtlcDetails, HtlcStatus, ListPaymentsRequest, Payment, PaymentDetails,
    PaymentDetailsFilter, PaymentStatus, PaymentType,
};

/// A composable test over a payment
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Predicate {
    /// Every inner predicate holds (true when empty)
    All(Vec<Predicate>),
    /// At least one inner predicate holds (false when empty)
    Any(Vec<Predicate>),
    PaymentType(Vec<PaymentType>),
    Status(Vec<PaymentStatus>),
    Details(PaymentDetailsFilter),
    /// Created at or after, unix seconds
    CreatedFrom(u64),
    /// Created strictly before, unix seconds
    CreatedBefore(u64),
}

impl Predicate {
    pub fn matches(&self, payment: &Payment) -> bool {
        match self {
            Predicate::All(inner) => inner.iter().all(|p| p.matches(payment)),
            Predicate::Any(inner) => inner.iter().any(|p| p.matches(payment)),
            Predicate::PaymentType(types) => types.contains(&payment.payment_type),
            Predicate::Status(statuses) => statuses.contains(&payment.status),
            Predicate::Details(filter) => details_match(filter, payment),
            Predicate::CreatedFrom(from) => payment.timestamp >= *from,
            Predicate::CreatedBefore(to) => payment.timestamp < *to,
        }
    }

    /// Build the conjunction described by a list request.
    ///
    /// Absent or empty filter components match everything; the per-rail
    /// details filters are a union.
    pub fn from_request(request: &ListPaymentsRequest) -> Self {
        let mut parts = Vec::new();

        if let Some(types) = non_empty(&request.type_filter) {
            parts.push(Predicate::PaymentType(types.to_vec()));
        }
        if let Some(statuses) = non_empty(&request.status_filter) {
            parts.push(Predicate::Status(statuses.to_vec()));
        }
        if let Some(filters) = non_empty(&request.payment_details_filter) {
            parts.push(Predicate::Any(
                filters.iter().cloned().map(Predicate::Details).collect(),
            ));
        }
        if let Some(from) = request.from_timestamp {
            parts.push(Predicate::CreatedFrom(from));
        }
        if let Some(to) = request.to_timestamp {
            parts.push(Predicate::CreatedBefore(to));
        }

        Predicate::All(parts)
    }
}

fn non_empty<T>(values: &Option<Vec<T>>) -> Option<&[T]> {
    values.as_deref().filter(|v| !v.is_empty())
}

fn details_match(filter: &PaymentDetailsFilter, payment: &Payment) -> bool {
    match (filter, &payment.details) {
        (
            PaymentDetailsFilter::Spark {
                htlc_status,
                conversion_refund_needed,
            },
            PaymentDetails::Spark {
                htlc_details,
                conversion_status,
                ..
            },
        ) => {
            htlc_status_matches(htlc_status, htlc_details)
                && conversion_matches(*conversion_refund_needed, *conversion_status)
        }
        (
            PaymentDetailsFilter::Lightning {
                htlc_status,
                has_lnurl_preimage,
            },
            PaymentDetails::Lightning {
                htlc_details,
                lnurl_preimage,
                ..
            },
        ) => {
            htlc_status_matches(htlc_status, htlc_details)
                && has_lnurl_preimage.map_or(true, |wanted| lnurl_preimage.is_some() == wanted)
        }
        // Filters are rail-scoped
        _ => false,
    }
}

/// A status set requires HTLC details with one of the listed statuses
fn htlc_status_matches(wanted: &Option<Vec<HtlcStatus>>, details: &Option<HtlcDetails>) -> bool {
    match non_empty(wanted) {
        None => true,
        Some(statuses) => details
            .as_ref()
            .is_some_and(|d| statuses.contains(&d.status)),
    }
}

fn conversion_matches(refund_needed: Option<bool>, status: Option<ConversionStatus>) -> bool {
    match (refund_needed, status) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(wanted), Some(status)) => (status == ConversionStatus::RefundNeeded) == wanted,
    }
}
