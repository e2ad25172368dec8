pub mod coordinator;
pub mod in_flight;
pub mod ports;
pub mod session;
pub mod snapshot;
pub mod wire;

pub use coordinator::{BookingCoordinator, RedirectUrl, ReturnUrls};
pub use in_flight::{InFlight, InFlightGuard};
pub use ports::{
    AddressCandidate, AddressLookup, AdminGateway, PaymentSetupGateway, QuotePersistence,
    ReferralValidator,
};
pub use session::{
    AddressSearch, AddressSelection, BookingSession, ReferralOutcome, SetupResolution, SetupReturn,
};
pub use snapshot::{
    FileSnapshotStore, InMemorySnapshotStore, SnapshotError, SnapshotStore, SNAPSHOT_KEY,
};
