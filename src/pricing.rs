// Stay price computation with per-night peak-rate surcharges
//
// Totals here are informational; the backend prices the order authoritatively.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::models::{DateRange, Id, PeakRateInterval, RoomVariant};

// Price of a single night of a stay.
#[derive(Debug, Clone, PartialEq)]
pub struct NightlyRate {
    pub date: NaiveDate,
    pub base_price: Decimal,
    pub surcharge: Decimal,
    // Position of the applied interval in the peak-rate input, if any.
    pub peak_rate_index: Option<usize>,
}

impl NightlyRate {
    pub fn total(&self) -> Decimal {
        self.base_price + self.surcharge
    }

    pub fn is_peak(&self) -> bool {
        self.peak_rate_index.is_some()
    }
}

pub struct PriceEngine;

impl PriceEngine {
    // Total price of the stay. Returns zero when the range has no nights,
    // which callers must read as an incomplete selection rather than a quote.
    pub fn compute_total(
        room_variant: &RoomVariant,
        date_range: &DateRange,
        peak_rates: &[PeakRateInterval],
    ) -> Decimal {
        Self::nightly_breakdown(room_variant, date_range, peak_rates)
            .iter()
            .map(NightlyRate::total)
            .sum()
    }

    // Per-night prices for the stay, check-in night first.
    pub fn nightly_breakdown(
        room_variant: &RoomVariant,
        date_range: &DateRange,
        peak_rates: &[PeakRateInterval],
    ) -> Vec<NightlyRate> {
        date_range
            .night_dates()
            .map(|date| Self::rate_for_day(room_variant, date, peak_rates))
            .collect()
    }

    // Calendar view: one entry per day in `[range.start, range.end)`.
    pub fn daily_rates(
        room_variant: &RoomVariant,
        range: &DateRange,
        peak_rates: &[PeakRateInterval],
    ) -> Vec<NightlyRate> {
        Self::nightly_breakdown(room_variant, range, peak_rates)
    }

    pub fn rate_for_day(
        room_variant: &RoomVariant,
        date: NaiveDate,
        peak_rates: &[PeakRateInterval],
    ) -> NightlyRate {
        // First match wins; overlapping intervals are never summed.
        let applied = peak_rates
            .iter()
            .enumerate()
            .find(|(_, rate)| rate.room_variant_id == room_variant.id && rate.covers(date));

        NightlyRate {
            date,
            base_price: room_variant.base_price_per_night,
            surcharge: applied.map_or(Decimal::ZERO, |(_, rate)| rate.additional_price),
            peak_rate_index: applied.map(|(index, _)| index),
        }
    }

    // Display-only scaling, e.g. thousands in a calendar cell. Never feed
    // the result back into a total.
    pub fn display_amount(amount: Decimal, divisor: Decimal) -> Decimal {
        if divisor.is_zero() {
            return amount;
        }
        (amount / divisor).normalize()
    }
}

// Keeps the intervals of one room variant, preserving input order.
pub fn peak_rates_for(room_variant_id: Id, peak_rates: &[PeakRateInterval]) -> Vec<PeakRateInterval> {
    peak_rates
        .iter()
        .filter(|rate| rate.room_variant_id == room_variant_id)
        .cloned()
        .collect()
}
