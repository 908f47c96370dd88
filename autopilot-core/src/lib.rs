pub mod checks;
pub mod factory;
pub mod forge;
pub mod manager;
pub mod state_machine;

#[cfg(test)]
pub(crate) mod testing;

pub use checks::{collect_failed_checks, IgnoreList, WorkflowCheckResult};
pub use factory::{InvalidPrKey, ManagerFactory, PrKey};
pub use forge::*;
pub use manager::{
    Collaborators, EntityManager, ManagerError, ManagerOptions, ManagerSettings, PauseScope,
    StatusSnapshot,
};
pub use state_machine::{
    CopilotEvent, CopilotState, LogLevel, ObservedEventKind, StateContext, StateInfo,
    StateMachine,
};
