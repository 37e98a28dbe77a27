// Data models
// Request envelopes, session state, meter bindings and usage samples

pub mod de;
pub mod envelope;
pub mod meter;
pub mod session;

pub use envelope::{Method, RequestEnvelope, TransportResponse};
pub use meter::{
    BalanceSnapshot, DailyReading, DailySample, DailyUsage, MeterBinding, MonthlySample,
    MonthlyUsage, YearTotals,
};
pub use session::{AuthState, RequestKey, RunContext, Session, UserIdentity};
