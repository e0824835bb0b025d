pub mod audit;
pub mod codec;
pub mod config;
pub mod corpus;
pub mod engine;
pub mod error;
pub mod identifier;
pub mod models;
pub mod relationships;
pub mod repository;
pub mod sync;
pub mod template;

// Re-export commonly used types
pub use audit::{AuditReport, AsymmetricEdge, DriftedRow, DuplicateId, MissingRow, MultiplyListed};
pub use config::{determine_config, get_config_path, GraphConfig, CONFIG_ENV_VAR, LOCAL_CONFIG_FILE};
pub use corpus::DocumentEntry;
pub use engine::{Engine, SaveOutcome};
pub use error::{GraphError, Result};
pub use identifier::IdAllocator;
pub use models::{
    CapabilityData, DependencyEdge, DocumentKind, EnablerData, IdPrefix, Identifier,
    // Placeholder values for new rows and documents
    DEFAULT_APPROVAL, DEFAULT_PRIORITY, DEFAULT_STATUS,
};
pub use relationships::{RelationshipManager, ReparentOutcome};
pub use repository::DocumentRepository;
pub use sync::{DependencySynchronizer, SyncReport};
