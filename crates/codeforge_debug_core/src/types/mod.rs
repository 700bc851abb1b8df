mod requests;
mod responses;
mod session;

pub use requests::LaunchRequest;
pub use responses::{CommandOutput, KillOutcome, ManualConnect, PersistAction, PersistOutcome};
pub use session::{ContainerHandle, DebugSession, FuzzerExecutable, SessionState};
