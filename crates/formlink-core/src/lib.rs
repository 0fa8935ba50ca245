pub mod config;
pub mod crm;
pub mod engine;
pub mod error;
pub mod form;
pub mod io;
pub mod mapping;
pub mod memory;
pub mod relationship;
pub mod resolver;
pub mod store;
pub mod types;

pub use config::EngineConfig;
pub use crm::{Contact, CrmRead, CrmWrite, Relationship};
pub use engine::{FormEngine, LoadReport, MakeReport, ValidationError};
pub use error::{FormlinkError, Result};
pub use form::{FormDefinition, Submission};
pub use memory::MemoryCrm;
pub use store::ActionOutputStore;
