pub mod config;
pub mod intent;
pub mod loan;
pub mod session;
pub mod tenant;

pub use intent::{route, Capability, RouteInput};
pub use loan::{InfoType, NO_ACTIVE_LOAN_MESSAGE};
pub use session::{PartialCredentials, PendingIntent, Session, SessionStatus};
pub use tenant::TenantDirectory;
