pub mod authz;
pub mod config;
pub mod domain;
pub mod errors;

pub use authz::{
    AccessPolicy, AuthContext, AuthorizationGate, Condition, GuardedOperation, StaticGrantGate,
};
pub use domain::employee::{Avatar, Department, EmployeeId, EmployeeProfile, Position};
pub use domain::nomination::{
    FinalizationId, FinalizationRecord, MetricSnapshot, Nomination, NominationId,
    PopulatedNomination, Vote, VoteLedger, VoteValue, VoterId, WinnerCheck,
};
pub use domain::period::{timestamp_now, PeriodRange, PeriodWindow, WinnerScope};
pub use errors::{ApplicationError, DomainError, InterfaceError};

pub use chrono;
pub use rust_decimal;
