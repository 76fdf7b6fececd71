//! Utility functions for formatting and common operations
//!
//! Centralized formatting utilities for consistent display of currency and
//! decimal values, plus the rounding conventions used by reporting.

use rust_decimal::Decimal;

/// Currency symbol options for formatting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrencySymbol {
    /// Include "$" prefix (US dollar)
    Usd,
    /// No currency symbol (for table cells, calculations display)
    None,
}

/// Core formatting function with full control over output.
///
/// Formats a Decimal value using US locale conventions:
/// - Thousands separator: `,` (comma)
/// - Decimal separator: `.` (period)
///
/// # Examples
/// ```
/// use folio::utils::{format_currency_with_width, CurrencySymbol};
/// use rust_decimal::Decimal;
/// use std::str::FromStr;
///
/// let v = Decimal::from_str("1234.56").unwrap();
/// assert_eq!(
///     format_currency_with_width(v, 0, CurrencySymbol::Usd),
///     "$1,234.56"
/// );
/// ```
pub fn format_currency_with_width(value: Decimal, width: usize, symbol: CurrencySymbol) -> String {
    let is_negative = value < Decimal::ZERO;
    let abs_value = value.abs();

    let formatted = format!("{:.2}", abs_value);
    let parts: Vec<&str> = formatted.split('.').collect();

    let integer_part = parts[0];
    let decimal_part = parts.get(1).unwrap_or(&"00");

    let with_separators: String = integer_part
        .chars()
        .rev()
        .enumerate()
        .flat_map(|(i, c)| {
            if i > 0 && i % 3 == 0 {
                vec![',', c]
            } else {
                vec![c]
            }
        })
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();

    let sign = if is_negative { "-" } else { "" };
    let prefix = match symbol {
        CurrencySymbol::Usd => "$",
        CurrencySymbol::None => "",
    };

    let result = format!("{}{}{}.{}", prefix, sign, with_separators, decimal_part);

    if width > 0 && result.len() < width {
        format!("{:>width$}", result, width = width)
    } else {
        result
    }
}

/// Format as US dollars with symbol: "$1,234.56"
pub fn format_currency(value: Decimal) -> String {
    format_currency_with_width(value, 0, CurrencySymbol::Usd)
}

/// Format as US dollars, right-aligned to the given width.
pub fn format_currency_aligned(value: Decimal, width: usize) -> String {
    format_currency_with_width(value, width, CurrencySymbol::Usd)
}

/// Monetary amounts round to cents in reports.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp(2)
}

/// Prices round to four decimal places in reports.
pub fn round_price(value: Decimal) -> Decimal {
    value.round_dp(4)
}

/// Share quantities round to six decimal places in reports.
pub fn round_qty(value: Decimal) -> Decimal {
    value.round_dp(6)
}
