//! Returns engine: daily balance/flow rows -> normalized performance
//! series.
//!
//! Every mode is a pure transformation of an ascending-by-date slice of
//! daily rows; all of them return an empty series for empty input rather
//! than failing.

use chrono::NaiveDate;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Serialize;
use std::str::FromStr;

use crate::db::{self, PerformanceDailyPoint};
use crate::error::Result;

/// Requested performance series shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesMode {
    /// Raw balances, unchanged.
    Equity,
    /// Time-weighted return index, 100-based.
    Twr,
    /// Cumulative contribution-neutral dollar P&L.
    Pnl,
    /// 100-based index compounding the recorded daily returns.
    Index,
    /// 100-based index of VOO close-to-close changes.
    VooIndex,
    /// 100-based index of QQQ close-to-close changes.
    QqqIndex,
}

impl SeriesMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeriesMode::Equity => "equity",
            SeriesMode::Twr => "twr",
            SeriesMode::Pnl => "pnl",
            SeriesMode::Index => "index",
            SeriesMode::VooIndex => "voo_index",
            SeriesMode::QqqIndex => "qqq_index",
        }
    }
}

impl FromStr for SeriesMode {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "equity" => Ok(SeriesMode::Equity),
            "twr" => Ok(SeriesMode::Twr),
            "pnl" => Ok(SeriesMode::Pnl),
            "index" => Ok(SeriesMode::Index),
            "voo_index" => Ok(SeriesMode::VooIndex),
            "qqq_index" => Ok(SeriesMode::QqqIndex),
            _ => Err(()),
        }
    }
}

/// One point of a computed series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub value: Decimal,
}

const INDEX_BASE: Decimal = Decimal::ONE_HUNDRED;

/// Compute the requested series over ascending daily rows.
pub fn compute_series(rows: &[PerformanceDailyPoint], mode: SeriesMode) -> Vec<SeriesPoint> {
    match mode {
        SeriesMode::Equity => rows
            .iter()
            .map(|r| SeriesPoint {
                date: r.date,
                value: r.balance,
            })
            .collect(),

        SeriesMode::Pnl => {
            let mut total = Decimal::ZERO;
            rows.iter()
                .map(|r| {
                    total += r.dollar_change.unwrap_or(Decimal::ZERO);
                    SeriesPoint {
                        date: r.date,
                        value: total.round_dp(2),
                    }
                })
                .collect()
        }

        SeriesMode::Twr => twr_series(rows),

        SeriesMode::Index => compound_series(rows, |r, _| r.daily_return),
        SeriesMode::VooIndex => benchmark_series(rows, |r| r.voo_close),
        SeriesMode::QqqIndex => benchmark_series(rows, |r| r.qqq_close),
    }
}

/// Time-weighted return index: starts at 100 on the first date; each
/// subsequent day compounds the flow-adjusted single-period return
///
///   r = (balance - net_flow - prev_balance) / prev_balance
///
/// The return is zero when the previous balance is not positive or when
/// the day has no recorded net_flow — missing flow data must produce a
/// flat index, not a fabricated return.
fn twr_series(rows: &[PerformanceDailyPoint]) -> Vec<SeriesPoint> {
    let mut out = Vec::with_capacity(rows.len());
    let mut index = INDEX_BASE;
    let mut prev_balance: Option<Decimal> = None;

    for r in rows {
        if let Some(prev) = prev_balance {
            let ret = match r.net_flow {
                Some(flow) if prev > Decimal::ZERO => (r.balance - flow - prev) / prev,
                _ => Decimal::ZERO,
            };
            index *= Decimal::ONE + ret;
        }
        prev_balance = Some(r.balance);
        out.push(SeriesPoint {
            date: r.date,
            value: index.round_dp(4),
        });
    }

    out
}

/// 100-based multiplicative index over a per-day return; missing returns
/// compound as zero, so an all-missing series stays flat at 100.
fn compound_series(
    rows: &[PerformanceDailyPoint],
    ret_of: fn(&PerformanceDailyPoint, usize) -> Option<Decimal>,
) -> Vec<SeriesPoint> {
    let mut out = Vec::with_capacity(rows.len());
    let mut index = INDEX_BASE;

    for (i, r) in rows.iter().enumerate() {
        if i > 0 {
            let ret = ret_of(r, i).unwrap_or(Decimal::ZERO);
            index *= Decimal::ONE + ret;
        }
        out.push(SeriesPoint {
            date: r.date,
            value: index.round_dp(4),
        });
    }

    out
}

/// Benchmark index from day-over-day close changes. A date with a missing
/// close contributes zero return; the last seen close carries forward as
/// the comparison base.
fn benchmark_series(
    rows: &[PerformanceDailyPoint],
    close_of: fn(&PerformanceDailyPoint) -> Option<Decimal>,
) -> Vec<SeriesPoint> {
    let mut out = Vec::with_capacity(rows.len());
    let mut index = INDEX_BASE;
    let mut prev_close: Option<Decimal> = None;

    for (i, r) in rows.iter().enumerate() {
        let close = close_of(r);
        if i > 0 {
            if let (Some(prev), Some(cur)) = (prev_close, close) {
                if prev > Decimal::ZERO {
                    index *= Decimal::ONE + (cur - prev) / prev;
                }
            }
        }
        if close.is_some() {
            prev_close = close;
        }
        out.push(SeriesPoint {
            date: r.date,
            value: index.round_dp(4),
        });
    }

    out
}

/// Read the last `window` daily rows from the store and compute a series.
pub fn performance_series(
    conn: &Connection,
    mode: SeriesMode,
    window: Option<usize>,
) -> Result<Vec<SeriesPoint>> {
    let rows = db::performance_window(conn, window)?;
    Ok(compute_series(&rows, mode))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, d).unwrap()
    }

    fn row(d: u32, balance: Decimal) -> PerformanceDailyPoint {
        PerformanceDailyPoint {
            date: date(d),
            balance,
            dollar_change: None,
            daily_return: None,
            net_flow: None,
            voo_close: None,
            qqq_close: None,
            source_file: None,
        }
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("twr".parse::<SeriesMode>().ok(), Some(SeriesMode::Twr));
        assert_eq!("EQUITY".parse::<SeriesMode>().ok(), Some(SeriesMode::Equity));
        assert_eq!(
            "voo_index".parse::<SeriesMode>().ok(),
            Some(SeriesMode::VooIndex)
        );
        assert_eq!("sharpe".parse::<SeriesMode>().ok(), None);
        assert_eq!(SeriesMode::QqqIndex.as_str(), "qqq_index");
    }

    #[test]
    fn test_all_modes_empty_input_empty_series() {
        for mode in [
            SeriesMode::Equity,
            SeriesMode::Twr,
            SeriesMode::Pnl,
            SeriesMode::Index,
            SeriesMode::VooIndex,
            SeriesMode::QqqIndex,
        ] {
            assert!(compute_series(&[], mode).is_empty());
        }
    }

    #[test]
    fn test_equity_passthrough() {
        let rows = vec![row(1, dec!(1000)), row(2, dec!(1100.55))];
        let s = compute_series(&rows, SeriesMode::Equity);
        assert_eq!(s[0].value, dec!(1000));
        assert_eq!(s[1].value, dec!(1100.55));
    }

    #[test]
    fn test_pnl_cumulative_with_missing_days() {
        let mut r1 = row(1, dec!(1000));
        r1.dollar_change = Some(dec!(10.004));
        let r2 = row(2, dec!(1000)); // no dollar_change: counts as zero
        let mut r3 = row(3, dec!(1000));
        r3.dollar_change = Some(dec!(-5.50));

        let s = compute_series(&[r1, r2, r3], SeriesMode::Pnl);
        assert_eq!(s[0].value, dec!(10.00));
        assert_eq!(s[1].value, dec!(10.00));
        assert_eq!(s[2].value, dec!(4.50));
    }

    #[test]
    fn test_twr_flow_adjusted_compounding() {
        // balances 1000 -> 1100 (no flow) -> 1050 after withdrawing 100:
        // r1 = 0.10, r2 = (1050 + 100 - 1100)/1100 = 50/1100
        // index: 100, 110, 110 * (1 + 50/1100) = 115
        let mut r1 = row(1, dec!(1000));
        r1.net_flow = Some(Decimal::ZERO);
        let mut r2 = row(2, dec!(1100));
        r2.net_flow = Some(Decimal::ZERO);
        let mut r3 = row(3, dec!(1050));
        r3.net_flow = Some(dec!(-100));

        let s = compute_series(&[r1, r2, r3], SeriesMode::Twr);
        assert_eq!(s[0].value, dec!(100));
        assert_eq!(s[1].value, dec!(110.0000));
        assert_eq!(s[2].value, dec!(115.0000));
    }

    #[test]
    fn test_twr_missing_flow_is_flat() {
        let r1 = row(1, dec!(1000));
        let r2 = row(2, dec!(1200)); // balance jumped but no flow recorded
        let s = compute_series(&[r1, r2], SeriesMode::Twr);
        assert_eq!(s[1].value, dec!(100));
    }

    #[test]
    fn test_twr_zero_previous_balance_is_flat() {
        let mut r1 = row(1, Decimal::ZERO);
        r1.net_flow = Some(Decimal::ZERO);
        let mut r2 = row(2, dec!(500));
        r2.net_flow = Some(dec!(500));
        let s = compute_series(&[r1, r2], SeriesMode::Twr);
        assert_eq!(s[1].value, dec!(100));
    }

    #[test]
    fn test_index_mode_flat_on_all_missing_returns() {
        let rows = vec![row(1, dec!(1000)), row(2, dec!(900)), row(3, dec!(1200))];
        let s = compute_series(&rows, SeriesMode::Index);
        assert!(s.iter().all(|p| p.value == dec!(100)));
    }

    #[test]
    fn test_index_mode_compounds_recorded_returns() {
        let r1 = row(1, dec!(1000));
        let mut r2 = row(2, dec!(1019.7));
        r2.daily_return = Some(dec!(0.0197));
        let mut r3 = row(3, dec!(1013.2));
        r3.daily_return = Some(dec!(-0.0064));

        let s = compute_series(&[r1, r2, r3], SeriesMode::Index);
        assert_eq!(s[0].value, dec!(100));
        assert_eq!(s[1].value, dec!(101.9700));
        // 101.97 * (1 - 0.0064) = 101.317392
        assert_eq!(s[2].value, dec!(101.3174));
    }

    #[test]
    fn test_benchmark_index_with_gap() {
        let mut r1 = row(1, dec!(1000));
        r1.voo_close = Some(dec!(500));
        let r2 = row(2, dec!(1000)); // missing close: zero return
        let mut r3 = row(3, dec!(1000));
        r3.voo_close = Some(dec!(510)); // compared against day 1 close

        let s = compute_series(&[r1, r2, r3], SeriesMode::VooIndex);
        assert_eq!(s[0].value, dec!(100));
        assert_eq!(s[1].value, dec!(100));
        assert_eq!(s[2].value, dec!(102.0000));
    }
}
