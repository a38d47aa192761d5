//! Entity models mirrored from the remote read model.

mod change;
mod event;
mod run;
mod session;
mod step;

pub use change::{ChangeKind, ChangeMessage, EntityKind, EntityRecord, EntityRef};
pub use event::{BrowserEvent, CoderunEvent};
pub use run::ExecutionRun;
pub use session::{ExecutionSession, RewriteStatus};
pub use step::{StepRecord, StepType};
