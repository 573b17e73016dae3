// Data structures shared with the rental backend
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub type Id = i64;

// Stay dates, calendar precision only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(with = "calendar_date")]
    pub start: NaiveDate,
    #[serde(with = "calendar_date")]
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    // Number of nights between check-in and check-out. Zero or negative
    // means the selection is incomplete.
    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn is_valid(&self) -> bool {
        self.nights() >= 1
    }

    // Iterates the nights of the stay (check-in day up to, excluding, check-out).
    pub fn night_dates(&self) -> impl Iterator<Item = NaiveDate> {
        let start = self.start;
        (0..self.nights().max(0)).map(move |offset| start + chrono::Duration::days(offset))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomVariant {
    pub id: Id,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "price", alias = "basePricePerNight")]
    pub base_price_per_night: Decimal,
    #[serde(default)]
    pub capacity: Option<u32>,
    #[serde(default)]
    pub property_id: Option<Id>,
}

impl RoomVariant {
    pub fn new(id: Id, base_price_per_night: Decimal) -> Self {
        Self {
            id,
            name: None,
            base_price_per_night,
            capacity: None,
            property_id: None,
        }
    }
}

// Per-night surcharge window, inclusive on both ends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "PeakRateWire")]
pub struct PeakRateInterval {
    pub id: Option<Id>,
    pub room_variant_id: Id,
    #[serde(with = "calendar_date")]
    pub start_date: NaiveDate,
    #[serde(with = "calendar_date")]
    pub end_date: NaiveDate,
    pub additional_price: Decimal,
}

impl PeakRateInterval {
    pub fn new(
        room_variant_id: Id,
        start_date: NaiveDate,
        end_date: NaiveDate,
        additional_price: Decimal,
    ) -> Self {
        Self {
            id: None,
            room_variant_id,
            start_date,
            end_date,
            additional_price,
        }
    }

    pub fn covers(&self, day: NaiveDate) -> bool {
        self.start_date <= day && day <= self.end_date
    }
}

#[derive(Debug, Deserialize)]
struct IdRef {
    id: Id,
}

// The peak-rate endpoint nests the room as `roomVariant: {id}`; older payloads
// carry a flat `roomVariantId`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PeakRateWire {
    #[serde(default)]
    id: Option<Id>,
    #[serde(default)]
    room_variant_id: Option<Id>,
    #[serde(default)]
    room_variant: Option<IdRef>,
    #[serde(with = "calendar_date")]
    start_date: NaiveDate,
    #[serde(with = "calendar_date")]
    end_date: NaiveDate,
    additional_price: Decimal,
}

impl TryFrom<PeakRateWire> for PeakRateInterval {
    type Error = String;

    fn try_from(wire: PeakRateWire) -> Result<Self, Self::Error> {
        let room_variant_id = wire
            .room_variant_id
            .or(wire.room_variant.map(|r| r.id))
            .ok_or_else(|| "peak rate without room variant".to_string())?;

        Ok(Self {
            id: wire.id,
            room_variant_id,
            start_date: wire.start_date,
            end_date: wire.end_date,
            additional_price: wire.additional_price,
        })
    }
}

// Order submission payload for POST /orders
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub user: EntityRef,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_price: Decimal,
    pub is_paid: bool,
    pub order_items: Vec<OrderItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub room_variant: EntityRef,
    #[serde(with = "calendar_date")]
    pub start_date: NaiveDate,
    #[serde(with = "calendar_date")]
    pub end_date: NaiveDate,
    pub guest: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: Id,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    #[serde(default)]
    pub id: Option<Id>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub total_price: Option<Decimal>,
}

// List endpoints answer either `{ "data": [...] }` or a bare array
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Listing<T> {
    Wrapped { data: Vec<T> },
    Bare(Vec<T>),
}

impl<T> Listing<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Listing::Wrapped { data } => data,
            Listing::Bare(items) => items,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Single<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> Single<T> {
    pub fn into_inner(self) -> T {
        match self {
            Single::Wrapped { data } => data,
            Single::Bare(item) => item,
        }
    }
}

// Dates arrive either as `2025-06-01` or as full timestamps; time of day is dropped.
pub mod calendar_date {
    use chrono::{DateTime, NaiveDate, NaiveDateTime};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d";

    pub fn serialize<S>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&date.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid date: {raw}")))
    }

    pub fn parse(raw: &str) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(raw, FORMAT)
            .ok()
            .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
            .or_else(|| {
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|dt| dt.date())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
    }

    #[test]
    fn test_date_range_nights() {
        assert_eq!(DateRange::new(day(1), day(6)).nights(), 5);
        assert_eq!(DateRange::new(day(6), day(1)).nights(), -5);
        assert!(!DateRange::new(day(3), day(3)).is_valid());

        let nights: Vec<_> = DateRange::new(day(1), day(4)).night_dates().collect();
        assert_eq!(nights, vec![day(1), day(2), day(3)]);
        assert_eq!(DateRange::new(day(4), day(1)).night_dates().count(), 0);
    }

    #[test]
    fn test_peak_rate_accepts_nested_and_flat_room() {
        let nested = r#"{"id": 7, "roomVariant": {"id": 3}, "startDate": "2025-06-03",
            "endDate": "2025-06-05T00:00:00Z", "additionalPrice": 20000}"#;
        let flat = r#"{"roomVariantId": 3, "startDate": "2025-06-03",
            "endDate": "2025-06-05", "additionalPrice": "20000"}"#;

        let nested: PeakRateInterval = serde_json::from_str(nested).unwrap();
        let flat: PeakRateInterval = serde_json::from_str(flat).unwrap();

        assert_eq!(nested.room_variant_id, 3);
        assert_eq!(nested.id, Some(7));
        assert_eq!(nested.end_date, day(5));
        assert_eq!(flat.additional_price, dec!(20000));
        assert!(flat.covers(day(3)) && flat.covers(day(5)));
        assert!(!flat.covers(day(6)));
    }

    #[test]
    fn test_peak_rate_without_room_is_rejected() {
        let json = r#"{"startDate": "2025-06-03", "endDate": "2025-06-05", "additionalPrice": 1}"#;
        assert!(serde_json::from_str::<PeakRateInterval>(json).is_err());
    }

    #[test]
    fn test_listing_shapes() {
        let wrapped: Listing<RoomVariant> =
            serde_json::from_str(r#"{"data": [{"id": 1, "price": 100000}]}"#).unwrap();
        let bare: Listing<RoomVariant> =
            serde_json::from_str(r#"[{"id": 1, "price": 100000, "capacity": 2}]"#).unwrap();

        assert_eq!(wrapped.into_vec()[0].base_price_per_night, dec!(100000));
        assert_eq!(bare.into_vec()[0].capacity, Some(2));
    }

    #[test]
    fn test_order_request_wire_format() {
        let order = OrderRequest {
            user: EntityRef { id: 9 },
            total_price: dec!(560000),
            is_paid: false,
            order_items: vec![OrderItem {
                room_variant: EntityRef { id: 3 },
                start_date: day(1),
                end_date: day(6),
                guest: 2,
            }],
        };

        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["user"]["id"], 9);
        assert_eq!(json["totalPrice"], 560000.0);
        assert_eq!(json["isPaid"], false);
        assert_eq!(json["orderItems"][0]["roomVariant"]["id"], 3);
        assert_eq!(json["orderItems"][0]["startDate"], "2025-06-01");
        assert_eq!(json["orderItems"][0]["guest"], 2);
    }
}
