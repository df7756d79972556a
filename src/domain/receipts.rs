//! Receipt line items and booking-fee computation
//!
//! All money is fixed-point with two fractional digits, rounded half-up.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use super::errors::{WorkflowError, WorkflowResult};

/// Maximum number of line items on a single receipt
pub const MAX_LINE_ITEMS: usize = 50;

/// Maximum length of a line item description
pub const MAX_DESCRIPTION_LEN: usize = 255;

/// Round to two decimal places (half-up) and pin the scale so totals
/// serialize as e.g. `"50.00"`.
pub fn money(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}

/// Complexity tier deciding the booking fee
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityTier {
    Simple,
    Standard,
    Complex,
}

impl ComplexityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplexityTier::Simple => "simple",
            ComplexityTier::Standard => "standard",
            ComplexityTier::Complex => "complex",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "simple" => Some(ComplexityTier::Simple),
            "standard" => Some(ComplexityTier::Standard),
            "complex" => Some(ComplexityTier::Complex),
            _ => None,
        }
    }
}

/// Configured booking fee per complexity tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingFeeTable {
    simple: Decimal,
    standard: Decimal,
    complex: Decimal,
}

impl BookingFeeTable {
    pub fn new(simple: Decimal, standard: Decimal, complex: Decimal) -> Self {
        Self {
            simple: money(simple),
            standard: money(standard),
            complex: money(complex),
        }
    }

    pub fn fee_for(&self, tier: ComplexityTier) -> Decimal {
        match tier {
            ComplexityTier::Simple => self.simple,
            ComplexityTier::Standard => self.standard,
            ComplexityTier::Complex => self.complex,
        }
    }
}

impl Default for BookingFeeTable {
    fn default() -> Self {
        Self::new(Decimal::from(10), Decimal::from(20), Decimal::from(40))
    }
}

/// A single priced line on a receipt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineItem {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

impl LineItem {
    pub fn line_total(&self) -> Decimal {
        money(self.quantity * self.unit_price)
    }
}

/// Line item as submitted by a client; every field is checked explicitly so
/// failures can name the offending item.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LineItemInput {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "qty")]
    pub quantity: Option<Decimal>,
    #[serde(default)]
    pub unit_price: Option<Decimal>,
}

/// Sum of `quantity * unit_price` over all items
pub fn receipt_total(items: &[LineItem]) -> Decimal {
    money(items.iter().map(|item| item.quantity * item.unit_price).sum())
}

/// Validate items submitted by a customer. Prices are optional and default to zero.
pub fn validate_requested_items(items: &[LineItemInput]) -> WorkflowResult<Vec<LineItem>> {
    validate_items(items, false)
}

/// Validate items priced by a technician. Every field is required.
pub fn validate_priced_items(items: &[LineItemInput]) -> WorkflowResult<Vec<LineItem>> {
    validate_items(items, true)
}

fn validate_items(items: &[LineItemInput], price_required: bool) -> WorkflowResult<Vec<LineItem>> {
    if items.is_empty() {
        return Err(WorkflowError::invalid("items", "At least one item is required"));
    }
    if items.len() > MAX_LINE_ITEMS {
        return Err(WorkflowError::invalid(
            "items",
            format!("At most {} items are allowed", MAX_LINE_ITEMS),
        ));
    }

    items
        .iter()
        .enumerate()
        .map(|(index, input)| {
            let description = input
                .description
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .ok_or_else(|| {
                    WorkflowError::invalid(
                        format!("items.{index}.description"),
                        "A description is required",
                    )
                })?;
            if description.chars().count() > MAX_DESCRIPTION_LEN {
                return Err(WorkflowError::invalid(
                    format!("items.{index}.description"),
                    format!("Description may not exceed {} characters", MAX_DESCRIPTION_LEN),
                ));
            }

            let quantity = input.quantity.ok_or_else(|| {
                WorkflowError::invalid(format!("items.{index}.quantity"), "A quantity is required")
            })?;
            if quantity <= Decimal::ZERO {
                return Err(WorkflowError::invalid(
                    format!("items.{index}.quantity"),
                    "Quantity must be greater than zero",
                ));
            }

            let unit_price = match input.unit_price {
                Some(price) => price,
                None if price_required => {
                    return Err(WorkflowError::invalid(
                        format!("items.{index}.unit_price"),
                        "A unit price is required",
                    ))
                }
                None => Decimal::ZERO,
            };
            if unit_price < Decimal::ZERO {
                return Err(WorkflowError::invalid(
                    format!("items.{index}.unit_price"),
                    "Unit price may not be negative",
                ));
            }

            Ok(LineItem {
                description: description.to_string(),
                quantity,
                unit_price: money(unit_price),
            })
        })
        .collect()
}
