// Booking flow: selection validation, live quotes and order submission
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::api::{ApiError, RentalApi};
use crate::models::{DateRange, EntityRef, Id, OrderItem, OrderRequest, OrderResponse, PeakRateInterval, RoomVariant};
use crate::pricing::{peak_rates_for, NightlyRate, PriceEngine};
use crate::session::{AuthError, SessionTokenManager};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing room selection")]
    MissingRoom,

    #[error("Missing stay dates")]
    MissingDates,

    #[error("Check-out must be after check-in")]
    InvalidDateRange,

    #[error("At least one guest is required")]
    NoGuests,

    #[error("Room holds at most {capacity} guests, {requested} requested")]
    OverCapacity { capacity: u32, requested: u32 },
}

#[derive(Error, Debug)]
pub enum BookingError {
    #[error("Invalid booking: {0}")]
    Validation(#[from] ValidationError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Backend error: {0}")]
    Api(#[from] ApiError),
}

impl BookingError {
    pub fn requires_reauthentication(&self) -> bool {
        matches!(self, BookingError::Auth(e) if e.requires_reauthentication())
    }
}

// What the booking form has collected so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookingDraft {
    pub room_variant: Option<RoomVariant>,
    pub dates: Option<DateRange>,
    pub guests: u32,
}

// A draft that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingSelection {
    pub room_variant: RoomVariant,
    pub dates: DateRange,
    pub guests: u32,
}

impl BookingDraft {
    pub fn validate(&self) -> Result<BookingSelection, ValidationError> {
        let room_variant = self.room_variant.clone().ok_or(ValidationError::MissingRoom)?;
        let dates = self.dates.ok_or(ValidationError::MissingDates)?;

        if !dates.is_valid() {
            return Err(ValidationError::InvalidDateRange);
        }
        if self.guests == 0 {
            return Err(ValidationError::NoGuests);
        }
        if let Some(capacity) = room_variant.capacity {
            if self.guests > capacity {
                return Err(ValidationError::OverCapacity {
                    capacity,
                    requested: self.guests,
                });
            }
        }

        Ok(BookingSelection {
            room_variant,
            dates,
            guests: self.guests,
        })
    }
}

impl BookingSelection {
    pub fn to_order(&self, user_id: Id, total_price: Decimal) -> OrderRequest {
        OrderRequest {
            user: EntityRef { id: user_id },
            total_price,
            is_paid: false,
            order_items: vec![OrderItem {
                room_variant: EntityRef {
                    id: self.room_variant.id,
                },
                start_date: self.dates.start,
                end_date: self.dates.end,
                guest: self.guests,
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub room_variant: RoomVariant,
    pub dates: DateRange,
    pub nights: Vec<NightlyRate>,
    // Zero when the date range has no nights.
    pub total: Decimal,
}

impl Quote {
    pub fn compute(room_variant: RoomVariant, dates: DateRange, peak_rates: &[PeakRateInterval]) -> Self {
        let nights = PriceEngine::nightly_breakdown(&room_variant, &dates, peak_rates);
        let total = nights.iter().map(NightlyRate::total).sum();
        Self {
            room_variant,
            dates,
            nights,
            total,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.dates.is_valid()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuoteTicket {
    generation: u64,
    room_variant_id: Id,
}

impl QuoteTicket {
    pub fn room_variant_id(&self) -> Id {
        self.room_variant_id
    }
}

// Last-write-wins guard for peak-rate fetches. Only the most recently
// started fetch may update the displayed price.
#[derive(Debug, Default)]
pub struct QuoteTracker {
    generation: AtomicU64,
}

impl QuoteTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, room_variant_id: Id) -> QuoteTicket {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        QuoteTicket {
            generation,
            room_variant_id,
        }
    }

    pub fn is_current(&self, ticket: &QuoteTicket) -> bool {
        self.generation.load(Ordering::SeqCst) == ticket.generation
    }

    // Rates for the ticket's room, or `None` when a newer selection or a
    // cancellation superseded the fetch.
    pub fn accept(
        &self,
        ticket: &QuoteTicket,
        peak_rates: Vec<PeakRateInterval>,
    ) -> Option<Vec<PeakRateInterval>> {
        if !self.is_current(ticket) {
            tracing::debug!(
                room_variant_id = ticket.room_variant_id,
                "discarding superseded peak-rate result"
            );
            return None;
        }
        Some(peak_rates_for(ticket.room_variant_id, &peak_rates))
    }

    // Invalidates every outstanding ticket, e.g. when the view goes away.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct BookingService {
    api: Arc<dyn RentalApi>,
    sessions: Arc<SessionTokenManager>,
    tracker: QuoteTracker,
}

impl BookingService {
    pub fn new(api: Arc<dyn RentalApi>, sessions: Arc<SessionTokenManager>) -> Self {
        Self {
            api,
            sessions,
            tracker: QuoteTracker::new(),
        }
    }

    pub async fn room_variants(&self, property_id: Id) -> Result<Vec<RoomVariant>, BookingError> {
        Ok(self.api.room_variants_for_property(property_id).await?)
    }

    // Price the selection with the room's current peak rates. `Ok(None)`
    // means a newer selection (or cancellation) made this result obsolete.
    pub async fn quote(&self, room_variant_id: Id, dates: DateRange) -> Result<Option<Quote>, BookingError> {
        let ticket = self.tracker.begin(room_variant_id);

        let fetched = futures::try_join!(
            self.api.room_variant(room_variant_id),
            self.api.peak_rates(room_variant_id)
        );
        let (room_variant, peak_rates) = match fetched {
            Ok(fetched) => fetched,
            // a superseded fetch may not surface its failure either
            Err(_) if !self.tracker.is_current(&ticket) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let Some(peak_rates) = self.tracker.accept(&ticket, peak_rates) else {
            return Ok(None);
        };
        Ok(Some(Quote::compute(room_variant, dates, &peak_rates)))
    }

    pub fn cancel_pending(&self) {
        self.tracker.cancel();
    }

    // Validates locally, prices the stay and submits the order. The backend
    // recomputes the authoritative price.
    pub async fn submit(&self, draft: &BookingDraft) -> Result<OrderResponse, BookingError> {
        let selection = draft.validate()?;

        let peak_rates = self.api.peak_rates(selection.room_variant.id).await?;
        let total = PriceEngine::compute_total(&selection.room_variant, &selection.dates, &peak_rates);

        let tokens = self.sessions.ensure_fresh_token().await?;
        let user_id = tokens
            .access_token
            .claims
            .effective_user_id()
            .parse::<Id>()
            .map_err(|_| AuthError::TokenInvalid("user id is not numeric".to_string()))?;

        let order = selection.to_order(user_id, total);
        tracing::info!(
            user_id,
            room_variant_id = selection.room_variant.id,
            nights = selection.dates.nights(),
            %total,
            "submitting order"
        );
        Ok(self.api.submit_order(&order, &tokens.access_token.value).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::mock_auth::MockAuthApi;
    use crate::store::MemorySessionStore;
    use crate::token::TokenDecoder;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use test_case::test_case;
    use tokio_test::{assert_err, assert_ok};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
    }

    fn room(id: Id, price: Decimal) -> RoomVariant {
        RoomVariant {
            capacity: Some(4),
            ..RoomVariant::new(id, price)
        }
    }

    struct MockRentalApi {
        rooms: HashMap<Id, RoomVariant>,
        peak_rates: Vec<PeakRateInterval>,
        delays_ms: HashMap<Id, u64>,
        failing: HashSet<Id>,
        peak_rate_calls: AtomicUsize,
        orders: Mutex<Vec<(OrderRequest, String)>>,
    }

    impl MockRentalApi {
        fn new() -> Self {
            Self {
                rooms: HashMap::from([(3, room(3, dec!(100000))), (4, room(4, dec!(80000)))]),
                peak_rates: vec![
                    PeakRateInterval::new(3, day(3), day(5), dec!(20000)),
                    PeakRateInterval::new(4, day(1), day(30), dec!(5000)),
                ],
                delays_ms: HashMap::new(),
                failing: HashSet::new(),
                peak_rate_calls: AtomicUsize::new(0),
                orders: Mutex::new(Vec::new()),
            }
        }

        async fn delay(&self, id: Id) {
            if let Some(ms) = self.delays_ms.get(&id) {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            }
        }
    }

    #[async_trait]
    impl RentalApi for MockRentalApi {
        async fn room_variant(&self, id: Id) -> Result<RoomVariant, ApiError> {
            self.rooms.get(&id).cloned().ok_or(ApiError::ApiResponseError {
                status_code: 404,
                message: "Room variant not found".to_string(),
            })
        }

        async fn room_variants_for_property(&self, _property_id: Id) -> Result<Vec<RoomVariant>, ApiError> {
            Ok(self.rooms.values().cloned().collect())
        }

        async fn peak_rates(&self, room_variant_id: Id) -> Result<Vec<PeakRateInterval>, ApiError> {
            self.peak_rate_calls.fetch_add(1, Ordering::SeqCst);
            self.delay(room_variant_id).await;
            if self.failing.contains(&room_variant_id) {
                return Err(ApiError::NetworkError("connection reset".to_string()));
            }
            // unfiltered on purpose: the tracker must drop other rooms' intervals
            Ok(self.peak_rates.clone())
        }

        async fn submit_order(&self, order: &OrderRequest, access_token: &str) -> Result<OrderResponse, ApiError> {
            self.orders.lock().push((order.clone(), access_token.to_string()));
            Ok(OrderResponse {
                id: Some(501),
                status: Some("PENDING".to_string()),
                total_price: Some(order.total_price),
            })
        }
    }

    async fn service(api: MockRentalApi) -> (Arc<MockRentalApi>, Arc<MockAuthApi>, BookingService) {
        let rental = Arc::new(api);
        let auth = Arc::new(MockAuthApi::new());
        let sessions = Arc::new(SessionTokenManager::new(
            auth.clone(),
            Arc::new(MemorySessionStore::new()),
            TokenDecoder::opaque(),
            0,
        ));
        sessions
            .authenticate_with_credentials("ayu@example.com", "pw")
            .await
            .unwrap();
        (rental.clone(), auth, BookingService::new(rental, sessions))
    }

    fn draft() -> BookingDraft {
        BookingDraft {
            room_variant: Some(room(3, dec!(100000))),
            dates: Some(DateRange::new(day(1), day(6))),
            guests: 2,
        }
    }

    #[test_case(BookingDraft { room_variant: None, ..draft() }, ValidationError::MissingRoom ; "no room")]
    #[test_case(BookingDraft { dates: None, ..draft() }, ValidationError::MissingDates ; "no dates")]
    #[test_case(BookingDraft { dates: Some(DateRange::new(day(6), day(6))), ..draft() }, ValidationError::InvalidDateRange ; "zero nights")]
    #[test_case(BookingDraft { guests: 0, ..draft() }, ValidationError::NoGuests ; "no guests")]
    #[test_case(BookingDraft { guests: 5, ..draft() }, ValidationError::OverCapacity { capacity: 4, requested: 5 } ; "over capacity")]
    fn test_draft_validation(draft: BookingDraft, expected: ValidationError) {
        assert_eq!(draft.validate(), Err(expected));
    }

    #[test]
    fn test_selection_to_order() {
        let selection = draft().validate().unwrap();
        let order = selection.to_order(42, dec!(560000));

        assert_eq!(order.user.id, 42);
        assert!(!order.is_paid);
        assert_eq!(order.order_items.len(), 1);
        assert_eq!(order.order_items[0].room_variant.id, 3);
        assert_eq!(order.order_items[0].end_date, day(6));
        assert_eq!(order.order_items[0].guest, 2);
    }

    #[test]
    fn test_tracker_last_write_wins() {
        let tracker = QuoteTracker::new();
        let first = tracker.begin(3);
        let second = tracker.begin(4);

        assert!(tracker.accept(&first, vec![]).is_none());
        assert!(tracker.accept(&second, vec![]).is_some());

        tracker.cancel();
        assert!(!tracker.is_current(&second));
    }

    #[tokio::test]
    async fn test_quote_applies_room_peak_rates() {
        let (_, _, service) = service(MockRentalApi::new()).await;

        let quote = service
            .quote(3, DateRange::new(day(1), day(6)))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(quote.total, dec!(560000));
        assert_eq!(quote.nights.len(), 5);
        assert!(quote.is_complete());
    }

    #[tokio::test]
    async fn test_incomplete_range_quotes_zero() {
        let (_, _, service) = service(MockRentalApi::new()).await;
        let quote = service
            .quote(3, DateRange::new(day(6), day(2)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(quote.total, Decimal::ZERO);
        assert!(!quote.is_complete());
    }

    #[tokio::test]
    async fn test_superseded_quote_is_discarded() {
        let mut api = MockRentalApi::new();
        api.delays_ms.insert(3, 60);
        let (_, _, service) = service(api).await;
        let dates = DateRange::new(day(1), day(3));

        let (slow, fast) = tokio::join!(service.quote(3, dates), service.quote(4, dates));

        assert!(slow.unwrap().is_none());
        assert_eq!(fast.unwrap().unwrap().total, dec!(170000));
    }

    #[tokio::test]
    async fn test_superseded_quote_failure_is_discarded() {
        let mut api = MockRentalApi::new();
        api.delays_ms.insert(3, 50);
        api.failing.insert(3);
        let (_, _, service) = service(api).await;
        let dates = DateRange::new(day(1), day(3));

        let (slow, fast) = tokio::join!(service.quote(3, dates), service.quote(4, dates));

        assert!(assert_ok!(slow).is_none());
        assert_eq!(fast.unwrap().unwrap().total, dec!(170000));
    }

    #[tokio::test]
    async fn test_latest_quote_failure_is_reported() {
        let mut api = MockRentalApi::new();
        api.failing.insert(3);
        let (_, _, service) = service(api).await;

        let err = assert_err!(service.quote(3, DateRange::new(day(1), day(3))).await);
        assert!(matches!(err, BookingError::Api(ApiError::NetworkError(_))));
    }

    #[tokio::test]
    async fn test_zero_priced_room_quote_is_complete() {
        let mut api = MockRentalApi::new();
        api.rooms.insert(5, room(5, Decimal::ZERO));
        let (_, _, service) = service(api).await;

        let quote = service
            .quote(5, DateRange::new(day(1), day(3)))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(quote.total, Decimal::ZERO);
        assert_eq!(quote.nights.len(), 2);
        assert!(quote.is_complete());
    }

    #[tokio::test]
    async fn test_cancel_discards_pending_quote() {
        let mut api = MockRentalApi::new();
        api.delays_ms.insert(3, 40);
        let (_, _, service) = service(api).await;

        let (result, _) = tokio::join!(service.quote(3, DateRange::new(day(1), day(3))), async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            service.cancel_pending();
        });

        assert!(result.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_room_is_a_backend_error() {
        let (_, _, service) = service(MockRentalApi::new()).await;
        let err = service
            .quote(99, DateRange::new(day(1), day(3)))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Api(ApiError::ApiResponseError { status_code: 404, .. })));
    }

    #[tokio::test]
    async fn test_submit_posts_priced_order() {
        let (rental, _, service) = service(MockRentalApi::new()).await;

        let response = service.submit(&draft()).await.unwrap();

        assert_eq!(response.id, Some(501));
        let orders = rental.orders.lock();
        let (order, bearer) = &orders[0];
        assert_eq!(order.user.id, 42);
        assert_eq!(order.total_price, dec!(560000));
        assert!(!bearer.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_draft_makes_no_network_call() {
        let (rental, _, service) = service(MockRentalApi::new()).await;

        let err = service
            .submit(&BookingDraft { dates: None, ..draft() })
            .await
            .unwrap_err();

        assert!(matches!(err, BookingError::Validation(ValidationError::MissingDates)));
        assert_eq!(rental.peak_rate_calls.load(Ordering::SeqCst), 0);
        assert!(rental.orders.lock().is_empty());
    }

    #[tokio::test]
    async fn test_submit_with_expired_session_requires_sign_in() {
        let rental = Arc::new(MockRentalApi::new());
        let auth = Arc::new(MockAuthApi::new());
        auth.set_access_ttl(-10);
        auth.fail_refresh.store(true, Ordering::SeqCst);
        let sessions = Arc::new(SessionTokenManager::new(
            auth.clone(),
            Arc::new(MemorySessionStore::new()),
            TokenDecoder::opaque(),
            0,
        ));
        sessions.authenticate_with_credentials("a@b.c", "pw").await.unwrap();
        let service = BookingService::new(rental.clone(), sessions);

        let err = service.submit(&draft()).await.unwrap_err();

        assert!(err.requires_reauthentication());
        assert!(rental.orders.lock().is_empty());
    }
}
