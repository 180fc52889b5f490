use std::collections::HashSet;

use rand::Rng;
use serde::Deserialize;

use crate::error::AppError;

/// Uniform unit price across all menu items, in dollars.
pub const UNIT_PRICE: f64 = 4.0;

pub const ORDER_ID_LEN: usize = 6;
const ORDER_ID_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Attempts at generating an order id before accepting a collision.
const ORDER_ID_ATTEMPTS: usize = 5;

pub const CONFIRMATION_SUBJECT: &str = "2025 ASDA Philanthropy Fundraiser: Payment Confirmed!";

/// Display names for the item quantity columns, in canonical column order.
pub const ITEM_LABELS: [&str; 4] = [
    "Cheese Roll",
    "Potato Ball",
    "Guava & Cheese Strudel",
    "Chicken Empanada",
];

/// Form payload for the intake endpoint. Quantities arrive as free-text
/// fields; anything absent or unparseable coerces to zero.
#[derive(Debug, Deserialize)]
pub struct OrderForm {
    pub name: String,
    pub email: String,
    pub phone: String,
    #[serde(default, rename = "cheeseRoll")]
    pub cheese_roll: Option<String>,
    #[serde(default, rename = "potatoBall")]
    pub potato_ball: Option<String>,
    #[serde(default, rename = "guavaStrudel")]
    pub guava_strudel: Option<String>,
    #[serde(default, rename = "chickenEmpanada")]
    pub chicken_empanada: Option<String>,
}

impl OrderForm {
    pub fn quantities(&self) -> [u32; 4] {
        [
            parse_quantity(self.cheese_roll.as_deref()),
            parse_quantity(self.potato_ball.as_deref()),
            parse_quantity(self.guava_strudel.as_deref()),
            parse_quantity(self.chicken_empanada.as_deref()),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Paid,
}

impl PaymentStatus {
    /// A row counts as paid only on the exact operator-written marker.
    pub fn from_cell(cell: &str) -> Self {
        if cell == "paid" {
            PaymentStatus::Paid
        } else {
            PaymentStatus::Pending
        }
    }

    pub fn as_cell(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
        }
    }
}

/// One logical pre-order, backed by one row in the Orders sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRecord {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub quantities: [u32; 4],
    pub total: f64,
    pub notified: bool,
    pub payment_status: PaymentStatus,
    pub order_id: String,
}

impl OrderRecord {
    pub fn from_form(form: &OrderForm, order_id: String) -> Self {
        let quantities = form.quantities();
        Self {
            name: form.name.clone(),
            email: form.email.clone(),
            phone: form.phone.clone(),
            quantities,
            total: order_total(&quantities),
            notified: false,
            payment_status: PaymentStatus::Pending,
            order_id,
        }
    }

    pub fn from_row(row: &[String], map: &ColumnMap) -> Self {
        let quantities = [
            parse_quantity(Some(cell(row, map.cheese_roll))),
            parse_quantity(Some(cell(row, map.potato_ball))),
            parse_quantity(Some(cell(row, map.guava_strudel))),
            parse_quantity(Some(cell(row, map.chicken_empanada))),
        ];
        Self {
            name: cell(row, map.name).to_string(),
            email: cell(row, map.email).to_string(),
            phone: cell(row, map.phone).to_string(),
            quantities,
            total: cell(row, map.total).parse().unwrap_or(0.0),
            notified: cell(row, map.notified_flag).eq_ignore_ascii_case("true"),
            payment_status: PaymentStatus::from_cell(cell(row, map.payment_status)),
            order_id: cell(row, map.order_id).to_string(),
        }
    }

    /// Cells in the canonical column order the Orders sheet is laid out in.
    pub fn to_row(&self) -> Vec<String> {
        let mut row = vec![self.name.clone(), self.email.clone(), self.phone.clone()];
        row.extend(self.quantities.iter().map(|q| q.to_string()));
        row.push(format_total(self.total));
        row.push(if self.notified { "true" } else { "false" }.to_string());
        row.push(self.payment_status.as_cell().to_string());
        row.push(self.order_id.clone());
        row
    }

    /// Selection predicate for the reconciliation run: paid, and the
    /// notified flag has never been written as "true" (any casing).
    pub fn awaiting_notification(&self) -> bool {
        self.payment_status == PaymentStatus::Paid && !self.notified
    }
}

/// Column positions resolved from the Orders header row, so a reordered
/// sheet cannot misdirect a read.
#[derive(Debug, Clone, Copy)]
pub struct ColumnMap {
    pub name: usize,
    pub email: usize,
    pub phone: usize,
    pub cheese_roll: usize,
    pub potato_ball: usize,
    pub guava_strudel: usize,
    pub chicken_empanada: usize,
    pub total: usize,
    pub notified_flag: usize,
    pub payment_status: usize,
    pub order_id: usize,
}

impl ColumnMap {
    pub fn from_headers(headers: &[String]) -> Result<Self, AppError> {
        let find = |header: &str| {
            headers
                .iter()
                .position(|h| h.trim() == header)
                .ok_or_else(|| AppError::Store(format!("orders sheet is missing column {header:?}")))
        };
        Ok(Self {
            name: find("name")?,
            email: find("email")?,
            phone: find("phone")?,
            cheese_roll: find("cheeseRoll")?,
            potato_ball: find("potatoBall")?,
            guava_strudel: find("guavaStrudel")?,
            chicken_empanada: find("chickenEmpanada")?,
            total: find("total")?,
            notified_flag: find("notifiedFlag")?,
            payment_status: find("paymentStatus")?,
            order_id: find("orderId")?,
        })
    }
}

/// The Sheets API drops trailing empty cells, so short rows read as empty.
pub fn cell(row: &[String], index: usize) -> &str {
    row.get(index).map(String::as_str).unwrap_or("")
}

/// Negative and out-of-range values coerce to 0 like any other
/// unparseable input.
pub fn parse_quantity(raw: Option<&str>) -> u32 {
    raw.and_then(|v| v.trim().parse::<u32>().ok()).unwrap_or(0)
}

pub fn order_total(quantities: &[u32; 4]) -> f64 {
    quantities.iter().map(|&q| q as u64).sum::<u64>() as f64 * UNIT_PRICE
}

/// Whole-dollar totals render without a decimal point, matching what the
/// sheet has always held.
pub fn format_total(total: f64) -> String {
    if total.fract() == 0.0 {
        format!("{}", total as i64)
    } else {
        format!("{total}")
    }
}

pub fn generate_order_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ORDER_ID_LEN)
        .map(|_| ORDER_ID_ALPHABET[rng.gen_range(0..ORDER_ID_ALPHABET.len())] as char)
        .collect()
}

/// Reject-and-regenerate on collision with an already-issued id, with a
/// bounded number of attempts.
pub fn unique_order_id(existing: &HashSet<String>) -> String {
    pick_unique(generate_order_id, existing)
}

fn pick_unique<F: FnMut() -> String>(mut generate: F, existing: &HashSet<String>) -> String {
    let mut candidate = generate();
    for _ in 1..ORDER_ID_ATTEMPTS {
        if !existing.contains(&candidate) {
            break;
        }
        candidate = generate();
    }
    candidate
}

/// Plain-text confirmation email: item breakdown (zero-quantity items
/// omitted), order id, and the event info block.
pub fn confirmation_body(order: &OrderRecord) -> String {
    let mut lines = Vec::new();
    lines.push(format!("Hello {},", order.name));
    lines.push(String::new());
    lines.push("Thank you for your order! Your payment has been confirmed.".to_string());
    lines.push(String::new());
    lines.push(format!("Order #{}", order.order_id));
    lines.push(String::new());
    lines.push("Order Details:".to_string());
    for (label, qty) in ITEM_LABELS.iter().zip(order.quantities.iter()) {
        if *qty > 0 {
            lines.push(format!("- {label}(s): {qty}"));
        }
    }
    lines.push(String::new());
    lines.push("Event Info:".to_string());
    lines.push("When: Monday, March 3rd, 2025 at Lunch".to_string());
    lines.push("Where: In the Courtyard".to_string());
    lines.push(String::new());
    lines.push("We are excited to see you soon!".to_string());
    lines.push(String::new());
    lines.push("Best regards,".to_string());
    lines.push("UCLA ASDA Philanthropy".to_string());
    lines.join("\n")
}
