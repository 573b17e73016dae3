// Client core for the vacation-rental marketplace front-end

// Export modules for each concern
pub mod api;
pub mod booking;
pub mod config;
pub mod models;
pub mod pricing;
pub mod session;
pub mod store;
pub mod token;

// Re-export key types for convenience
pub use api::{ApiError, AuthApi, HttpBackend, RentalApi};
pub use booking::{BookingDraft, BookingError, BookingService, Quote, QuoteTracker, ValidationError};
pub use config::{ClientConfig, ConfigError};
pub use models::{DateRange, Id, OrderRequest, OrderResponse, PeakRateInterval, RoomVariant};
pub use pricing::{NightlyRate, PriceEngine};
pub use session::{AuthError, Session, SessionState, SessionTokenManager, TokenPair, UserProfile};
pub use store::{store_for, FileSessionStore, MemorySessionStore, SessionStore, StoreError};
pub use token::{TokenClaims, TokenDecoder, TokenVerification};
