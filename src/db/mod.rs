//! Persistence layer: sea-orm entities for the three tables, the enum
//! vocabulary shared with the domain, and the repository port the polling
//! core consumes.

pub mod entities;
pub mod enums;
pub mod repository;

pub use repository::{
    DevicePollingParameter, NewDevice, NewPollingHistory, PgRepository, Repository,
    RepositoryError,
};
